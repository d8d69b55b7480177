//! Artifact packaging.
//!
//! Turns a recipe's built files into `<package>-<arch>.tar.gz` plus
//! `<package>-<arch>.metadata.json` in the output directory.
//!
//! The archive is reproducible: members are sorted by archive path, headers
//! carry no timestamps or owners, modes are normalized to 0644/0755 and the
//! gzip header has no name or mtime. Packaging the same files twice produces
//! the same bytes and therefore the same `archive_sha256`.

pub mod verify;

use anyhow::{bail, Context, Result};
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use tar::Builder as TarBuilder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::io::{sha256_file, write_json_atomic};

pub use verify::{verify_metadata_file, VerificationReport};

/// Hash of one archive member's uncompressed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
}

/// The metadata record written next to each archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactMetadata {
    pub package: String,
    pub archive_filename: String,
    pub archive_sha256: String,
    pub version: String,
    pub arch: String,
    pub files: Vec<FileEntry>,
}

/// What the archive is for. Version and arch are recorded verbatim.
#[derive(Debug, Clone, Copy)]
pub struct PackageSpec<'a> {
    pub package: &'a str,
    pub version: &'a str,
    pub arch: &'a str,
}

/// A file to pack, and its path inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInput {
    pub archive_path: String,
    pub source: PathBuf,
}

pub fn archive_file_name(package: &str, arch: &str) -> String {
    format!("{package}-{arch}.tar.gz")
}

pub fn metadata_file_name(package: &str, arch: &str) -> String {
    format!("{package}-{arch}.metadata.json")
}

/// Expand files and directories into archive members.
///
/// Files keep their file name unless `strip_prefix` is given, in which case
/// the path relative to it is used. Directories contribute every regular file
/// below them, relative to the directory's parent (or to `strip_prefix`).
pub fn collect_inputs(paths: &[PathBuf], strip_prefix: Option<&Path>) -> Result<Vec<PackageInput>> {
    let mut inputs = Vec::new();

    for path in paths {
        let md = fs::metadata(path)
            .with_context(|| format!("reading build output '{}'", path.display()))?;

        let base = match strip_prefix {
            Some(prefix) => prefix.to_path_buf(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };

        if md.is_file() {
            inputs.push(PackageInput {
                archive_path: archive_path_for(path, &base)?,
                source: path.clone(),
            });
            continue;
        }

        if md.is_dir() {
            for ent in WalkDir::new(path).follow_links(true) {
                let ent = ent
                    .with_context(|| format!("walking build output '{}'", path.display()))?;
                if !ent.file_type().is_file() {
                    continue;
                }
                inputs.push(PackageInput {
                    archive_path: archive_path_for(ent.path(), &base)?,
                    source: ent.path().to_path_buf(),
                });
            }
            continue;
        }

        bail!(
            "build output '{}' is neither a file nor a directory",
            path.display()
        );
    }

    Ok(inputs)
}

fn archive_path_for(path: &Path, base: &Path) -> Result<String> {
    let rel = if base.as_os_str().is_empty() {
        path
    } else {
        path.strip_prefix(base).with_context(|| {
            format!(
                "'{}' is not below strip prefix '{}'",
                path.display(),
                base.display()
            )
        })?
    };
    let rel = rel.to_string_lossy().replace('\\', "/");
    validate_archive_path(&rel)?;
    Ok(rel)
}

/// Archive paths must be relative and must not climb out of the extraction root.
fn validate_archive_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("archive member path must not be empty");
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("archive member path '{path}' must be relative without '.' or '..'"),
        }
    }
    Ok(())
}

/// Write the archive and metadata for `spec` into `out_dir`.
///
/// The archive is assembled in a temp file and renamed into place; the
/// metadata is written last, so a metadata file on disk always describes a
/// complete archive.
pub fn package(
    spec: &PackageSpec<'_>,
    inputs: &[PackageInput],
    out_dir: &Path,
) -> Result<ArtifactMetadata> {
    if inputs.is_empty() {
        bail!("nothing to package for '{}'", spec.package);
    }
    for (label, value) in [
        ("package", spec.package),
        ("version", spec.version),
        ("arch", spec.arch),
    ] {
        if value.is_empty() {
            bail!("{label} must not be empty");
        }
    }

    let mut members: BTreeMap<&str, &PackageInput> = BTreeMap::new();
    for input in inputs {
        validate_archive_path(&input.archive_path)?;
        if members.insert(&input.archive_path, input).is_some() {
            bail!("duplicate archive member '{}'", input.archive_path);
        }
    }

    let mut files = Vec::with_capacity(members.len());
    for (path, input) in &members {
        let (sha256, _size) = sha256_file(&input.source)?;
        debug!(member = *path, %sha256, "hashed member");
        files.push(FileEntry {
            path: path.to_string(),
            sha256,
        });
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory '{}'", out_dir.display()))?;

    let archive_filename = archive_file_name(spec.package, spec.arch);
    let archive_path = out_dir.join(&archive_filename);
    let tmp_archive = out_dir.join(format!(".{archive_filename}.tmp-{}", std::process::id()));

    if let Err(err) = write_tar_gz(members.values().copied(), &tmp_archive) {
        let _ = fs::remove_file(&tmp_archive);
        return Err(err);
    }
    fs::rename(&tmp_archive, &archive_path).with_context(|| {
        format!(
            "renaming '{}' to '{}'",
            tmp_archive.display(),
            archive_path.display()
        )
    })?;

    let (archive_sha256, size_bytes) = sha256_file(&archive_path)?;

    let metadata = ArtifactMetadata {
        package: spec.package.to_string(),
        archive_filename,
        archive_sha256,
        version: spec.version.to_string(),
        arch: spec.arch.to_string(),
        files,
    };

    let metadata_path = out_dir.join(metadata_file_name(spec.package, spec.arch));
    write_json_atomic(&metadata_path, &metadata)
        .with_context(|| format!("writing metadata '{}'", metadata_path.display()))?;

    info!(
        archive = %archive_path.display(),
        sha256 = %metadata.archive_sha256,
        size_bytes,
        members = metadata.files.len(),
        "packaged artifact"
    );
    Ok(metadata)
}

/// Load a metadata file.
pub fn read_metadata(path: &Path) -> Result<ArtifactMetadata> {
    let bytes =
        fs::read(path).with_context(|| format!("reading metadata '{}'", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing metadata '{}'", path.display()))
}

fn write_tar_gz<'a>(members: impl Iterator<Item = &'a PackageInput>, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = GzBuilder::new().mtime(0).write(out, Compression::best());
    let mut builder = TarBuilder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);

    for input in members {
        let md = fs::metadata(&input.source)
            .with_context(|| format!("Failed to stat {}", input.source.display()))?;
        let mut f = File::open(&input.source)
            .with_context(|| format!("Failed to open {}", input.source.display()))?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(md.len());
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(normalized_mode(&md));
        header.set_cksum();
        builder
            .append_data(&mut header, &input.archive_path, &mut f)
            .with_context(|| format!("Failed to append {}", input.archive_path))?;
    }

    let encoder = builder
        .into_inner()
        .with_context(|| "Failed to finalize tar builder")?;
    let file = encoder.finish().with_context(|| "Failed to finish gzip stream")?;
    file.sync_all()?;
    Ok(())
}

fn normalized_mode(md: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if md.permissions().mode() & 0o111 != 0 {
            return 0o755;
        }
    }
    #[cfg(not(unix))]
    let _ = md;
    0o644
}
