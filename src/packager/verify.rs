//! Consumer-side integrity checks for packaged artifacts.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{read_metadata, ArtifactMetadata};
use crate::error::HubError;
use crate::io::{sha256_file, sha256_reader};

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub archive: PathBuf,
    pub archive_sha256: String,
    pub members_checked: usize,
}

/// Verify the archive a metadata file describes.
///
/// The archive is looked up next to the metadata file. Any mismatch is a
/// [`HubError::Verification`].
pub fn verify_metadata_file(metadata_path: &Path) -> Result<VerificationReport> {
    let metadata = read_metadata(metadata_path)?;
    let dir = metadata_path.parent().unwrap_or(Path::new("."));
    verify_artifact(&metadata, dir)
}

/// Re-hash the archive and every member and compare against `metadata`.
pub fn verify_artifact(metadata: &ArtifactMetadata, dir: &Path) -> Result<VerificationReport> {
    if metadata.archive_filename.contains(['/', '\\']) {
        return Err(mismatch(format!(
            "archive_filename '{}' must be a bare file name",
            metadata.archive_filename
        )));
    }

    let archive = dir.join(&metadata.archive_filename);
    if !archive.is_file() {
        return Err(mismatch(format!("archive '{}' is missing", archive.display())));
    }

    let (actual, _size) = sha256_file(&archive)?;
    if actual != metadata.archive_sha256 {
        return Err(mismatch(format!(
            "archive hash mismatch for '{}'\n  expected: {}\n  actual:   {}",
            archive.display(),
            metadata.archive_sha256,
            actual
        )));
    }

    let actual_members = member_hashes(&archive).map_err(|err| mismatch(format!("{err:#}")))?;
    let mut expected: BTreeMap<&str, &str> = BTreeMap::new();
    for entry in &metadata.files {
        if expected.insert(&entry.path, &entry.sha256).is_some() {
            return Err(mismatch(format!(
                "metadata lists member '{}' more than once",
                entry.path
            )));
        }
    }

    for (path, sha) in &expected {
        match actual_members.get(*path) {
            None => {
                return Err(mismatch(format!(
                    "member '{}' listed in metadata is not in '{}'",
                    path,
                    archive.display()
                )))
            }
            Some(actual) if actual.as_str() != *sha => {
                return Err(mismatch(format!(
                    "member hash mismatch for '{}'\n  expected: {}\n  actual:   {}",
                    path, sha, actual
                )))
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = actual_members
        .keys()
        .find(|name| !expected.contains_key(name.as_str()))
    {
        return Err(mismatch(format!(
            "member '{}' in '{}' is not listed in metadata",
            extra,
            archive.display()
        )));
    }

    Ok(VerificationReport {
        archive,
        archive_sha256: actual,
        members_checked: expected.len(),
    })
}

fn member_hashes(archive: &Path) -> Result<BTreeMap<String, String>> {
    let f = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(f));
    let mut out = BTreeMap::new();

    let entries = tar
        .entries()
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", archive.display()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .with_context(|| format!("Invalid member path in {}", archive.display()))?
            .to_string_lossy()
            .replace('\\', "/");
        let (sha, _) = sha256_reader(entry)
            .with_context(|| format!("Failed to read member '{}'", name))?;
        if out.insert(name.clone(), sha).is_some() {
            bail!("'{}' contains member '{}' more than once", archive.display(), name);
        }
    }
    Ok(out)
}

fn mismatch(msg: String) -> anyhow::Error {
    HubError::Verification(msg).into()
}
