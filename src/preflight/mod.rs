//! Preflight checks for build validation.
//!
//! Validates that the host can run a container build before anything is
//! created. A failure here is an environment error, never a partial build.
//!
//! # Example
//!
//! ```rust
//! use artifact_hub::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("docker") {
//!     println!("docker not installed");
//! }
//!
//! let tools = &[("docker", "docker-ce or docker.io")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command, package providing it). The error lists every
/// missing tool, not just the first.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Package hint for a container CLI name.
fn backend_package(backend: &str) -> &'static str {
    match backend {
        "docker" => "docker-ce or docker.io",
        "podman" => "podman",
        "nerdctl" => "nerdctl",
        _ => "a docker-compatible container CLI",
    }
}

/// Check that the container CLI is installed and its daemon answers.
pub fn check_container_backend(backend: &str) -> Result<()> {
    check_required_tools(&[(backend, backend_package(backend))])?;

    let output = Command::new(backend)
        .arg("info")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("running `{backend} info`"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "container backend '{}' is installed but not reachable (`{} info` exit {}): {}\n\
             Start the daemon or check that this user may talk to it.",
            backend,
            backend,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        // 'ls' should exist on any Unix system
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_failure_lists_package() {
        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err().to_string();
        assert!(err.contains("fake-package"));
    }

    #[test]
    fn missing_backend_cli_fails() {
        assert!(check_container_backend("no_such_container_cli_98765").is_err());
    }
}
