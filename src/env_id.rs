//! Unique names for build environments.
//!
//! An identifier names both the image tag and the container, so it has to
//! satisfy docker's reference grammar: lowercase alphanumerics separated by
//! `.`, `_` or `-`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::request::BuildRequest;

const TOKEN_SALT_BITS: u32 = 32;
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Upper bound for the human-readable part, keeping names well under the
/// 128 byte tag limit.
const MAX_LABEL_LEN: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvironmentId(String);

impl EnvironmentId {
    /// `<prefix>-<package>-<version>-<arch>-<token>`, sanitized.
    pub fn generate(prefix: &str, request: &BuildRequest) -> Result<Self> {
        let label = format!(
            "{}-{}-{}-{}",
            sanitize(prefix),
            sanitize(&request.package),
            sanitize(&request.version),
            sanitize(&request.arch)
        );
        let label: String = label.chars().take(MAX_LABEL_LEN).collect();
        let label = label.trim_end_matches(['-', '.', '_']);
        Ok(Self(format!("{}-{}", label, process_token()?)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image reference used for this environment.
    pub fn image_tag(&self) -> String {
        format!("{}:build", self.0)
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A token distinct across processes and across calls within one process.
fn process_token() -> Result<String> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before UNIX_EPOCH while generating environment id")?
        .as_nanos();
    let pid_component = (std::process::id() as u128) << (TOKEN_SALT_BITS - 16);
    let seq_component = (TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed) as u128) & 0xFFFF;
    let entropy = (nanos << TOKEN_SALT_BITS) | pid_component | seq_component;
    Ok(base36_encode_u128(entropy))
}

// Base36 rather than base62: image names must be lowercase.
fn base36_encode_u128(mut value: u128) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut bytes = Vec::new();
    while value > 0 {
        let idx = (value % 36) as usize;
        bytes.push(ALPHABET[idx] as char);
        value /= 36;
    }
    bytes.iter().rev().collect()
}

fn sanitize(part: &str) -> String {
    let mut mapped = String::with_capacity(part.len());
    for c in part.chars() {
        let c = c.to_ascii_lowercase();
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' {
            c
        } else {
            '-'
        };
        // Separator runs like `.-` are not valid in image names.
        if !c.is_ascii_alphanumeric() && mapped.ends_with(['-', '.', '_']) {
            mapped.pop();
            mapped.push('-');
            continue;
        }
        mapped.push(c);
    }
    let trimmed = mapped.trim_matches(['-', '.', '_']);
    if trimmed.is_empty() {
        "x".to_string()
    } else {
        trimmed.to_string()
    }
}
