//! Per-package build recipes.
//!
//! A recipe is an opaque Makefile that knows how to fetch, statically compile
//! and package one upstream project. The orchestrator only cares about three
//! things: where the file is, what command runs its `all` target, and whether
//! that command exits zero.
//!
//! Resolution: `<recipes_dir>/<package>.mk`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HubError;

/// File extension of recipe Makefiles.
pub const RECIPE_EXTENSION: &str = "mk";

/// Targets every recipe must define. `all` runs the first six in order.
pub const CONTRACT_TARGETS: &[&str] = &[
    "prepare",
    "sys_deps",
    "get_source",
    "dependencies",
    "compile",
    "dist",
    "clean",
    "all",
];

/// Where the recipe is bound (read-only) inside the environment.
pub const RECIPE_MOUNT: &str = "/recipe/Makefile";

/// Where the host output directory is bound (read-write) inside the environment.
pub const OUT_MOUNT: &str = "/out";

/// Parameters handed to a recipe.
#[derive(Debug, Clone, Copy)]
pub struct RecipeParams<'a> {
    pub version: &'a str,
    pub arch: &'a str,
    pub out_dir: &'a str,
}

impl RecipeParams<'_> {
    /// `KEY=value` pairs, exported to the environment and passed to make.
    pub fn env(&self) -> [(&'static str, String); 3] {
        [
            ("VERSION", self.version.to_string()),
            ("ARCH", self.arch.to_string()),
            ("OUT_DIR", self.out_dir.to_string()),
        ]
    }
}

/// A build procedure for one package.
pub trait Recipe {
    /// Host file bound into the environment.
    fn source(&self) -> &Path;

    /// Command that runs the `all` target inside the environment.
    fn command(&self, params: &RecipeParams<'_>) -> Vec<String>;
}

/// Makefile-backed recipe.
#[derive(Debug, Clone)]
pub struct MakeRecipe {
    package: String,
    path: PathBuf,
}

impl MakeRecipe {
    pub fn new(package: &str, path: PathBuf) -> Self {
        Self {
            package: package.to_string(),
            path,
        }
    }

    /// Contract targets the Makefile does not declare.
    ///
    /// Only looks for `target:` at the start of a line; good enough for the
    /// flat Makefiles recipes are written as.
    pub fn missing_targets(&self) -> Result<Vec<&'static str>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| {
                format!(
                    "reading recipe for '{}' at '{}'",
                    self.package,
                    self.path.display()
                )
            })?;

        let declared: Vec<&str> = text
            .lines()
            .filter(|line| !line.starts_with(['\t', ' ', '#']))
            .filter_map(|line| {
                let (head, rest) = line.split_once(':')?;
                // `VAR := x` is an assignment, not a rule.
                if rest.starts_with('=') {
                    return None;
                }
                Some(head)
            })
            .flat_map(str::split_whitespace)
            .collect();

        Ok(CONTRACT_TARGETS
            .iter()
            .copied()
            .filter(|target| !declared.contains(target))
            .collect())
    }
}

impl Recipe for MakeRecipe {
    fn source(&self) -> &Path {
        &self.path
    }

    fn command(&self, params: &RecipeParams<'_>) -> Vec<String> {
        let mut cmd = vec![
            "make".to_string(),
            "-f".to_string(),
            RECIPE_MOUNT.to_string(),
            "all".to_string(),
        ];
        cmd.extend(params.env().iter().map(|(k, v)| format!("{k}={v}")));
        cmd
    }
}

/// The directory of recipe Makefiles.
#[derive(Debug, Clone)]
pub struct RecipeBook {
    dir: PathBuf,
}

impl RecipeBook {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, package: &str) -> PathBuf {
        self.dir.join(format!("{package}.{RECIPE_EXTENSION}"))
    }

    /// Package names with a recipe, sorted.
    pub fn packages(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut packages = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("reading recipes directory '{}'", self.dir.display()))?
        {
            let entry = entry.with_context(|| {
                format!("reading entry under recipes directory '{}'", self.dir.display())
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECIPE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            packages.push(name.to_string());
        }

        packages.sort();
        Ok(packages)
    }

    /// Resolve a package to its recipe.
    ///
    /// A missing recipe is an environment error: it is caught before any
    /// image is built.
    pub fn find(&self, package: &str) -> Result<MakeRecipe> {
        if package.contains(['/', '\\']) || package.contains("..") {
            return Err(HubError::Usage(format!(
                "package name '{package}' must not contain path separators"
            ))
            .into());
        }

        let path = self.path_for(package);
        if path.is_file() {
            return Ok(MakeRecipe::new(package, path));
        }

        let available = self.packages().unwrap_or_default();
        let available = if available.is_empty() {
            "(none)".to_string()
        } else {
            available.join(", ")
        };
        Err(HubError::EnvironmentUnavailable(format!(
            "no recipe for package '{}' at '{}'; available: {}",
            package,
            path.display(),
            available
        ))
        .into())
    }
}
