mod artifacts;
mod build;
mod versions;

pub(crate) use artifacts::{list_recipes, package, verify};
pub(crate) use build::build;
pub(crate) use versions::check_versions;
