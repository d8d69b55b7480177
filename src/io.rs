//! Small filesystem helpers shared by the packager and the version tracker.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// Hex sha256 and byte length of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    sha256_reader(BufReader::new(f)).with_context(|| format!("Failed to read {}", path.display()))
}

/// Hex sha256 and byte length of everything `r` yields.
pub fn sha256_reader<R: Read>(mut r: R) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Replace `path` with `bytes` via a sibling temp file and rename.
///
/// Readers see either the old content or the new content, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("path without file name '{}'", path.display()))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let result = (|| -> Result<()> {
        let mut f =
            File::create(&tmp).with_context(|| format!("creating temp file '{}'", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("writing temp file '{}'", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("syncing temp file '{}'", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| {
            format!(
                "renaming temp file '{}' to '{}'",
                tmp.display(),
                path.display()
            )
        })
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Serialize `value` as pretty JSON (trailing newline) and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing '{}'", path.display()))?;
    payload.push(b'\n');
    write_atomic(path, &payload)
}
