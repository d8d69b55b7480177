//! Container backends for disposable build environments.
//!
//! [`ContainerBackend`] is the narrow surface the orchestrator needs: build an
//! image, start one container from it, and remove both. [`DockerCli`] drives
//! any docker-compatible CLI (`docker`, `podman`, `nerdctl`).

pub mod guard;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

pub use guard::BuildEnvironment;

/// A bind mount into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to start the single container of an environment.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub container_name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    pub command: Vec<String>,
}

/// A started container, polled until it exits.
pub trait Execution {
    /// Exit code once finished. Death by signal maps to `128 + signal`.
    fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Stop the container and its client process.
    fn kill(&mut self) -> Result<()>;
}

pub trait ContainerBackend {
    fn name(&self) -> &str;

    /// Fail if the backend cannot currently run containers.
    fn check_available(&self) -> Result<()>;

    /// Build `tag` from the environment definition (a Dockerfile) and a
    /// build context directory.
    fn build_image(&self, tag: &str, definition: &Path, context: &Path) -> Result<()>;

    fn start(&self, spec: &RunSpec) -> Result<Box<dyn Execution>>;

    /// Remove a container; absent containers are not an error.
    fn remove_container(&self, name: &str) -> Result<()>;

    /// Remove an image; absent images are not an error.
    fn remove_image(&self, tag: &str) -> Result<()>;

    fn container_exists(&self, name: &str) -> Result<bool>;

    fn image_exists(&self, tag: &str) -> Result<bool>;
}

/// Docker-compatible command line backend.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a short management command, returning whether it succeeded.
    fn quiet(&self, args: &[&str]) -> Result<bool> {
        let status = self
            .command()
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("running `{} {}`", self.program, args.join(" ")))?;
        Ok(status.success())
    }
}

impl ContainerBackend for DockerCli {
    fn name(&self) -> &str {
        &self.program
    }

    fn check_available(&self) -> Result<()> {
        crate::preflight::check_container_backend(&self.program)
    }

    fn build_image(&self, tag: &str, definition: &Path, context: &Path) -> Result<()> {
        let status = self
            .command()
            .arg("build")
            .arg("--pull=false")
            .arg("--tag")
            .arg(tag)
            .arg("--file")
            .arg(definition)
            .arg(context)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("running `{} build` for '{}'", self.program, tag))?;

        if !status.success() {
            bail!(
                "`{} build` for '{}' failed with exit code {}",
                self.program,
                tag,
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }

    fn start(&self, spec: &RunSpec) -> Result<Box<dyn Execution>> {
        let mut cmd = self.command();
        cmd.arg("run").arg("--name").arg(&spec.container_name);

        for mount in &spec.mounts {
            let mut volume = format!("{}:{}", mount.host.display(), mount.target);
            volume.push_str(if mount.read_only { ":ro" } else { ":rw" });
            cmd.arg("--volume").arg(volume);
        }
        for (key, value) in &spec.env {
            cmd.arg("--env").arg(format!("{key}={value}"));
        }

        cmd.arg(&spec.image)
            .args(&spec.command)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().with_context(|| {
            format!(
                "starting container '{}' from '{}'",
                spec.container_name, spec.image
            )
        })?;

        Ok(Box::new(CliExecution {
            child,
            backend: self.clone(),
            container_name: spec.container_name.clone(),
        }))
    }

    fn remove_container(&self, name: &str) -> Result<()> {
        if !self.container_exists(name)? {
            return Ok(());
        }
        if !self.quiet(&["rm", "--force", name])? {
            bail!("`{} rm --force {}` failed", self.program, name);
        }
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<()> {
        if !self.image_exists(tag)? {
            return Ok(());
        }
        if !self.quiet(&["image", "rm", "--force", tag])? {
            bail!("`{} image rm --force {}` failed", self.program, tag);
        }
        Ok(())
    }

    fn container_exists(&self, name: &str) -> Result<bool> {
        self.quiet(&["container", "inspect", name])
    }

    fn image_exists(&self, tag: &str) -> Result<bool> {
        self.quiet(&["image", "inspect", tag])
    }
}

struct CliExecution {
    child: Child,
    backend: DockerCli,
    container_name: String,
}

impl Execution for CliExecution {
    fn try_wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("waiting on container '{}'", self.container_name))?;
        Ok(status.map(exit_code_of))
    }

    fn kill(&mut self) -> Result<()> {
        // Stopping the container makes the attached client exit on its own;
        // kill the client too in case the daemon is wedged.
        let _ = self.backend.quiet(&["kill", &self.container_name]);
        let _ = self.child.kill();
        self.child
            .wait()
            .with_context(|| format!("reaping client for '{}'", self.container_name))?;
        Ok(())
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
