//! Build request validation.

use anyhow::Result;

use crate::error::HubError;

/// One (package, version, arch) build.
///
/// `arch` is passed to the recipe untouched; only the recipe knows which
/// architectures it can build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub package: String,
    pub version: String,
    pub arch: String,
}

impl BuildRequest {
    pub fn new(package: &str, version: &str, arch: &str) -> Result<Self> {
        let mut missing = Vec::new();
        for (label, value) in [("package", package), ("version", version), ("arch", arch)] {
            if value.trim().is_empty() {
                missing.push(label);
            }
        }
        if !missing.is_empty() {
            return Err(HubError::Usage(format!(
                "empty {}; expected `build <package> <version> <arch>`",
                missing.join(", ")
            ))
            .into());
        }

        Ok(Self {
            package: package.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
        })
    }

    /// Base name shared by the archive and metadata files.
    pub fn artifact_stem(&self) -> String {
        format!("{}-{}", self.package, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{exit_code_for, EXIT_USAGE};

    #[test]
    fn accepts_three_values() {
        let req = BuildRequest::new("tor", "tor-0.4.8.12", "x86_64").unwrap();
        assert_eq!(req.artifact_stem(), "tor-x86_64");
    }

    #[test]
    fn empty_field_is_usage_error() {
        let err = BuildRequest::new("tor", "  ", "x86_64").unwrap_err();
        assert_eq!(exit_code_for(&err, 1), EXIT_USAGE);
        assert!(err.to_string().contains("version"));
    }
}
