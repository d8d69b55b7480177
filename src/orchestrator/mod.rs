//! Build orchestration.
//!
//! [`Orchestrator::run_build`] turns a [`BuildRequest`] into an archive and
//! metadata file in the output directory:
//!
//! ```text
//! validate request ─► resolve recipe ─► check backend ─► lock output dir
//!        │                                                     │
//!   (no side effects on any failure above)                     ▼
//!                                         acquire BuildEnvironment (scoped)
//!                                              ├─ build image <id>:build
//!                                              ├─ run container <id>
//!                                              │     make -f /recipe/Makefile all
//!                                              └─ poll until exit / signal
//!                                         release: rm container, rm image
//!                                                      │
//!                                       verify <package>-<arch>.* (optional)
//! ```
//!
//! The environment is released on every path out of the build, including
//! recipe failure, setup failure and termination signals. The recipe's exit
//! code is returned unchanged through [`HubError::RecipeFailed`].

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, warn};

use crate::config::BuildConfig;
use crate::env_id::EnvironmentId;
use crate::environment::{BuildEnvironment, ContainerBackend, Execution, Mount, RunSpec};
use crate::error::HubError;
use crate::interrupt::Interrupt;
use crate::output_lock::OutputLock;
use crate::packager::{self, VerificationReport};
use crate::recipe::{Recipe, RecipeBook, RecipeParams, OUT_MOUNT, RECIPE_MOUNT};
use crate::request::BuildRequest;

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub environment: EnvironmentId,
    pub archive: PathBuf,
    pub metadata: PathBuf,
    /// `None` when output verification is disabled.
    pub verification: Option<VerificationReport>,
}

pub struct Orchestrator<'a> {
    config: &'a BuildConfig,
    backend: &'a dyn ContainerBackend,
    interrupt: Interrupt,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a BuildConfig,
        backend: &'a dyn ContainerBackend,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            config,
            backend,
            interrupt,
        }
    }

    /// Run one build from start to teardown.
    pub fn run_build(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let recipe = RecipeBook::new(&self.config.recipes_dir).find(&request.package)?;
        self.check_preconditions()?;

        let _lock = OutputLock::acquire(&self.config.output_dir)?;
        let out_dir = fs::canonicalize(&self.config.output_dir).with_context(|| {
            format!(
                "resolving output directory '{}'",
                self.config.output_dir.display()
            )
        })?;
        let recipe_path = fs::canonicalize(recipe.source())
            .with_context(|| format!("resolving recipe '{}'", recipe.source().display()))?;
        remove_previous_outputs(&out_dir, request)?;

        let id = EnvironmentId::generate(&self.config.image_prefix, request)?;
        info!(
            package = %request.package,
            version = %request.version,
            arch = %request.arch,
            environment = %id,
            "starting build"
        );

        let mut env = BuildEnvironment::acquire(self.backend, id.clone());
        let result = self.execute(&mut env, &recipe, &recipe_path, &out_dir, request);
        let cleanup = env.release();

        let code = match result {
            Ok(code) => code,
            Err(err) => {
                if let Err(cleanup_err) = cleanup {
                    warn!(environment = %id, "cleanup failed: {cleanup_err:#}");
                }
                return Err(err);
            }
        };
        cleanup.with_context(|| format!("tearing down environment '{id}'"))?;

        if code != 0 {
            return Err(HubError::RecipeFailed {
                package: request.package.clone(),
                code,
            }
            .into());
        }

        let archive = out_dir.join(packager::archive_file_name(&request.package, &request.arch));
        let metadata = out_dir.join(packager::metadata_file_name(&request.package, &request.arch));
        let verification = if self.config.verify_outputs {
            Some(verify_outputs(request, &metadata)?)
        } else {
            None
        };

        info!(archive = %archive.display(), "build finished");
        Ok(BuildOutcome {
            environment: id,
            archive,
            metadata,
            verification,
        })
    }

    fn check_preconditions(&self) -> Result<()> {
        self.backend.check_available().map_err(|err| {
            HubError::EnvironmentUnavailable(format!(
                "container backend '{}': {err:#}",
                self.backend.name()
            ))
        })?;

        if !self.config.environment.is_file() {
            return Err(HubError::EnvironmentUnavailable(format!(
                "build environment definition '{}' not found",
                self.config.environment.display()
            ))
            .into());
        }
        if !self.config.context.is_dir() {
            return Err(HubError::EnvironmentUnavailable(format!(
                "build context '{}' is not a directory",
                self.config.context.display()
            ))
            .into());
        }
        Ok(())
    }

    /// Build the image, run the recipe, return its exit code.
    fn execute(
        &self,
        env: &mut BuildEnvironment<'_>,
        recipe: &dyn Recipe,
        recipe_path: &Path,
        out_dir: &Path,
        request: &BuildRequest,
    ) -> Result<i32> {
        self.bail_if_interrupted(request)?;

        let image = env.image_tag();
        if let Err(err) =
            self.backend
                .build_image(&image, &self.config.environment, &self.config.context)
        {
            self.bail_if_interrupted(request)?;
            return Err(HubError::EnvironmentSetup(format!("building image '{image}': {err:#}")).into());
        }
        self.bail_if_interrupted(request)?;

        let params = RecipeParams {
            version: &request.version,
            arch: &request.arch,
            out_dir: OUT_MOUNT,
        };
        let spec = RunSpec {
            container_name: env.container_name().to_string(),
            image,
            mounts: vec![
                Mount {
                    host: recipe_path.to_path_buf(),
                    target: RECIPE_MOUNT.to_string(),
                    read_only: true,
                },
                Mount {
                    host: out_dir.to_path_buf(),
                    target: OUT_MOUNT.to_string(),
                    read_only: false,
                },
            ],
            env: params
                .env()
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            command: recipe.command(&params),
        };

        let mut execution = self.backend.start(&spec).map_err(|err| {
            HubError::EnvironmentSetup(format!(
                "starting container '{}': {err:#}",
                spec.container_name
            ))
        })?;

        self.wait(execution.as_mut(), request)
    }

    fn wait(&self, execution: &mut dyn Execution, request: &BuildRequest) -> Result<i32> {
        loop {
            let status = execution.try_wait()?;
            if self.interrupt.is_set() {
                if status.is_none() {
                    warn!(package = %request.package, "interrupted; stopping container");
                    if let Err(err) = execution.kill() {
                        warn!(package = %request.package, "stopping container failed: {err:#}");
                    }
                }
                return Err(HubError::Interrupted {
                    package: request.package.clone(),
                }
                .into());
            }
            if let Some(code) = status {
                info!(package = %request.package, code, "recipe finished");
                return Ok(code);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn bail_if_interrupted(&self, request: &BuildRequest) -> Result<()> {
        if self.interrupt.is_set() {
            return Err(HubError::Interrupted {
                package: request.package.clone(),
            }
            .into());
        }
        Ok(())
    }
}

/// Delete artifacts an earlier build left under the names this build writes,
/// so only files the recipe produces now can pass verification.
fn remove_previous_outputs(out_dir: &Path, request: &BuildRequest) -> Result<()> {
    for name in [
        packager::archive_file_name(&request.package, &request.arch),
        packager::metadata_file_name(&request.package, &request.arch),
    ] {
        let path = out_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "removed previous artifact"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("removing previous artifact '{}'", path.display()))
            }
        }
    }
    Ok(())
}

/// Check the recipe's outputs against the request and their own hashes.
pub fn verify_outputs(request: &BuildRequest, metadata_path: &Path) -> Result<VerificationReport> {
    if !metadata_path.is_file() {
        return Err(HubError::Verification(format!(
            "recipe succeeded but metadata '{}' was not written",
            metadata_path.display()
        ))
        .into());
    }

    let metadata = packager::read_metadata(metadata_path)
        .map_err(|err| HubError::Verification(format!("{err:#}")))?;

    let expected_archive = packager::archive_file_name(&request.package, &request.arch);
    let checks = [
        ("package", metadata.package.as_str(), request.package.as_str()),
        ("version", metadata.version.as_str(), request.version.as_str()),
        ("arch", metadata.arch.as_str(), request.arch.as_str()),
        (
            "archive_filename",
            metadata.archive_filename.as_str(),
            expected_archive.as_str(),
        ),
    ];
    for (field, recorded, expected) in checks {
        if recorded != expected {
            return Err(HubError::Verification(format!(
                "metadata '{}' records {field} '{recorded}', expected '{expected}'",
                metadata_path.display()
            ))
            .into());
        }
    }

    let dir = metadata_path.parent().unwrap_or(Path::new("."));
    packager::verify::verify_artifact(&metadata, dir)
}

#[cfg(test)]
mod tests;
