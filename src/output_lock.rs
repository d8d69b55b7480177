//! Exclusive lock on a build output directory.
//!
//! Two builds writing `<package>-<arch>.tar.gz` into the same directory would
//! race on the same filenames, so a build holds this lock from before the
//! environment is created until after it is removed.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::HubError;

pub const LOCK_FILE_NAME: &str = ".artifact-hub.lock";

/// RAII guard: unlocks and removes the lock file on drop.
#[derive(Debug)]
pub struct OutputLock {
    file: File,
    path: PathBuf,
}

impl OutputLock {
    /// Create `output_dir` if needed and lock it without blocking.
    pub fn acquire(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir).with_context(|| {
            format!("creating output directory '{}'", output_dir.display())
        })?;
        let path = output_dir.join(LOCK_FILE_NAME);

        for _ in 0..ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("creating lock file '{}'", path.display()))?;

            if file.try_lock_exclusive().is_err() {
                return Err(busy(output_dir, &path));
            }

            // The previous holder unlinks the file before unlocking. If we
            // locked that unlinked inode, start over on the current one.
            if is_current(&file, &path)? {
                return Ok(Self { file, path });
            }
            let _ = FileExt::unlock(&file);
        }

        Err(busy(output_dir, &path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

const ACQUIRE_ATTEMPTS: usize = 4;

fn busy(output_dir: &Path, path: &Path) -> anyhow::Error {
    HubError::EnvironmentUnavailable(format!(
        "output directory '{}' is locked by another build ({})",
        output_dir.display(),
        path.display()
    ))
    .into()
}

/// True when `file` is still the inode linked at `path`.
fn is_current(file: &File, path: &Path) -> Result<bool> {
    let held = file
        .metadata()
        .with_context(|| format!("reading lock file '{}'", path.display()))?;
    let linked = match fs::metadata(path) {
        Ok(md) => md,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("reading lock file '{}'", path.display()))
        }
    };
    Ok(held.dev() == linked.dev() && held.ino() == linked.ino())
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}
