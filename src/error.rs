//! Error classification and process exit codes.
//!
//! Most of the crate returns `anyhow::Result` with context attached at every
//! step. Failures that must map to a specific exit status are raised as a
//! [`HubError`] at the point where the classification is known; the binary
//! recovers it with [`exit_code_for`].

use thiserror::Error;

/// Exit status for a missing or empty command-line argument.
pub const EXIT_USAGE: i32 = 64;
/// Exit status when produced artifacts do not match their metadata.
pub const EXIT_VERIFICATION: i32 = 65;
/// Exit status when a precondition for creating the environment is not met.
pub const EXIT_ENVIRONMENT_UNAVAILABLE: i32 = 69;
/// Exit status when creating or starting the environment failed.
pub const EXIT_ENVIRONMENT_SETUP: i32 = 71;
/// Exit status after a termination signal.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Exit status of `check-versions` when updates are available in check-only mode.
pub const EXIT_UPDATES_AVAILABLE: i32 = 1;
/// Exit status of `check-versions` on any error.
pub const EXIT_VERSION_CHECK: i32 = 2;

#[derive(Debug, Error)]
pub enum HubError {
    /// Missing or empty arguments. Nothing was created.
    #[error("usage error: {0}")]
    Usage(String),

    /// Backend unreachable, recipe missing, or output directory busy.
    /// Detected before any environment exists.
    #[error("environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    /// Image build or container launch failed. The environment was torn down.
    #[error("environment setup failed: {0}")]
    EnvironmentSetup(String),

    /// The recipe completed with a non-zero status.
    #[error("recipe for '{package}' failed with exit code {code}")]
    RecipeFailed { package: String, code: i32 },

    /// A termination signal arrived while the build was running.
    #[error("build of '{package}' interrupted by signal; environment removed")]
    Interrupted { package: String },

    /// Artifacts are missing or do not match the recorded hashes.
    #[error("artifact verification failed: {0}")]
    Verification(String),

    /// Network, parse, or registry failure in the version tracker.
    #[error("version check failed: {0}")]
    VersionCheck(String),
}

impl HubError {
    pub fn exit_code(&self) -> i32 {
        match self {
            HubError::Usage(_) => EXIT_USAGE,
            HubError::EnvironmentUnavailable(_) => EXIT_ENVIRONMENT_UNAVAILABLE,
            HubError::EnvironmentSetup(_) => EXIT_ENVIRONMENT_SETUP,
            HubError::RecipeFailed { code, .. } => *code,
            HubError::Interrupted { .. } => EXIT_INTERRUPTED,
            HubError::Verification(_) => EXIT_VERIFICATION,
            HubError::VersionCheck(_) => EXIT_VERSION_CHECK,
        }
    }
}

/// Find the [`HubError`] anywhere in an error chain and return its exit code.
///
/// Unclassified errors fall back to `fallback`.
pub fn exit_code_for(err: &anyhow::Error, fallback: i32) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HubError>())
        .map(HubError::exit_code)
        .unwrap_or(fallback)
}
