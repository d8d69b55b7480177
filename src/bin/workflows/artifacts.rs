use std::path::{Path, PathBuf};

use anyhow::Result;
use artifact_hub::error::HubError;
use artifact_hub::packager::{self, PackageSpec};
use artifact_hub::recipe::RecipeBook;
use artifact_hub::HubConfig;

pub(crate) fn package(
    package: &str,
    version: &str,
    arch: &str,
    out_dir: &Path,
    strip_prefix: Option<&Path>,
    files: &[PathBuf],
) -> Result<i32> {
    let spec = PackageSpec {
        package,
        version,
        arch,
    };
    let inputs = packager::collect_inputs(files, strip_prefix)?;
    let metadata = packager::package(&spec, &inputs, out_dir)?;

    println!(
        "{}  {}",
        metadata.archive_sha256,
        out_dir.join(&metadata.archive_filename).display()
    );
    Ok(0)
}

pub(crate) fn verify(metadata: &Path) -> Result<i32> {
    let report = packager::verify_metadata_file(metadata)?;
    println!(
        "{}: OK (sha256 {}, {} members)",
        report.archive.display(),
        report.archive_sha256,
        report.members_checked
    );
    Ok(0)
}

pub(crate) fn list_recipes(config: &HubConfig) -> Result<i32> {
    let book = RecipeBook::new(&config.build.recipes_dir);
    let packages = book.packages()?;
    if packages.is_empty() {
        return Err(HubError::EnvironmentUnavailable(format!(
            "no recipes found under '{}'",
            book.dir().display()
        ))
        .into());
    }

    let mut incomplete = 0;
    for name in &packages {
        let recipe = book.find(name)?;
        let missing = recipe.missing_targets()?;
        if missing.is_empty() {
            println!("{name}");
        } else {
            incomplete += 1;
            println!("{name} (missing targets: {})", missing.join(", "));
        }
    }
    Ok(if incomplete == 0 { 0 } else { 1 })
}
