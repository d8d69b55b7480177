//! Tag classification and ordering.

use anyhow::{Context, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

/// Numeric version key of a tag: every run of digits, in order.
///
/// `tor-0.4.8.12` is `[0, 4, 8, 12]`, `release-1.19.0` is `[1, 19, 0]`.
/// Trailing zero components do not affect ordering, so `1.2` equals `1.2.0`.
#[derive(Debug, Clone)]
pub struct TagVersion(Vec<u64>);

impl TagVersion {
    /// `None` when the tag has no digits or a component overflows.
    pub fn parse(tag: &str) -> Option<Self> {
        let mut parts = Vec::new();
        let mut current: Option<u64> = None;
        for c in tag.chars() {
            match c.to_digit(10) {
                Some(d) => {
                    let next = current.unwrap_or(0).checked_mul(10)?.checked_add(d as u64)?;
                    current = Some(next);
                }
                None => {
                    if let Some(n) = current.take() {
                        parts.push(n);
                    }
                }
            }
        }
        if let Some(n) = current {
            parts.push(n);
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts))
        }
    }

    fn significant(&self) -> &[u64] {
        let end = self
            .0
            .iter()
            .rposition(|&n| n != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.0[..end]
    }
}

impl PartialEq for TagVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for TagVersion {}

impl PartialOrd for TagVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl fmt::Display for TagVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Decides which upstream tags are stable release candidates.
#[derive(Debug, Clone)]
pub struct StabilityPolicy {
    markers: Vec<String>,
    pattern: Regex,
}

impl StabilityPolicy {
    /// `markers` are matched case-insensitively anywhere in the tag;
    /// `tag_pattern` must match the whole tag.
    pub fn new(markers: &[String], tag_pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{tag_pattern})$");
        let pattern = Regex::new(&anchored)
            .with_context(|| format!("compiling tag pattern '{tag_pattern}'"))?;
        Ok(Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
            pattern,
        })
    }

    /// True when the tag carries a pre-release marker.
    pub fn is_prerelease(&self, tag: &str) -> bool {
        let lowered = tag.to_lowercase();
        self.markers.iter().any(|m| lowered.contains(m.as_str()))
    }

    pub fn is_stable(&self, tag: &str) -> bool {
        !self.is_prerelease(tag) && self.pattern.is_match(tag)
    }

    /// Highest stable tag by numeric version, or `None` if none qualify.
    ///
    /// Among tags with equal versions the first one listed wins.
    pub fn pick_latest<'t, I>(&self, tags: I) -> Option<&'t str>
    where
        I: IntoIterator<Item = &'t str>,
    {
        let mut best: Option<(&'t str, TagVersion)> = None;
        for tag in tags {
            if !self.is_stable(tag) {
                continue;
            }
            let Some(version) = TagVersion::parse(tag) else {
                continue;
            };
            let better = match &best {
                Some((_, current)) => version > *current,
                None => true,
            };
            if better {
                best = Some((tag, version));
            }
        }
        best.map(|(tag, _)| tag)
    }
}
