//! Staleness check for pinned versions.
//!
//! Every package in the registry is resolved against its upstream before
//! anything is written. Any failure aborts the whole run, so the registry is
//! either fully updated or untouched.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::registry::VersionRegistry;
use super::tags::{StabilityPolicy, TagVersion};
use super::upstream::TagSource;
use crate::config::{UpstreamConfig, VersionsConfig};
use crate::error::{HubError, EXIT_UPDATES_AVAILABLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Report only; never touch the registry.
    CheckOnly,
    /// Rewrite stale pins.
    Update,
}

/// A package whose upstream has a newer stable tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub package: String,
    pub pinned: String,
    pub latest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    UpToDate,
    /// Check-only mode found stale pins.
    UpdatesAvailable(Vec<PendingUpdate>),
    /// Update mode rewrote these pins.
    Updated(Vec<PendingUpdate>),
}

impl TrackerOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            TrackerOutcome::UpToDate | TrackerOutcome::Updated(_) => 0,
            TrackerOutcome::UpdatesAvailable(_) => EXIT_UPDATES_AVAILABLE,
        }
    }

    pub fn updates(&self) -> &[PendingUpdate] {
        match self {
            TrackerOutcome::UpToDate => &[],
            TrackerOutcome::UpdatesAvailable(u) | TrackerOutcome::Updated(u) => u,
        }
    }
}

pub struct VersionTracker<'a> {
    config: &'a VersionsConfig,
    upstreams: &'a BTreeMap<String, UpstreamConfig>,
    source: &'a dyn TagSource,
}

impl<'a> VersionTracker<'a> {
    pub fn new(
        config: &'a VersionsConfig,
        upstreams: &'a BTreeMap<String, UpstreamConfig>,
        source: &'a dyn TagSource,
    ) -> Self {
        Self {
            config,
            upstreams,
            source,
        }
    }

    /// Compare every pin in `registry_path` with upstream.
    ///
    /// Errors are [`HubError::VersionCheck`] and leave the file untouched.
    pub fn check(&self, registry_path: &Path, mode: CheckMode) -> Result<TrackerOutcome> {
        self.check_inner(registry_path, mode)
            .map_err(|err| HubError::VersionCheck(format!("{err:#}")).into())
    }

    fn check_inner(&self, registry_path: &Path, mode: CheckMode) -> Result<TrackerOutcome> {
        let registry = VersionRegistry::load(registry_path)?;

        let mut updates = Vec::new();
        for (package, pinned) in registry.entries() {
            let latest = self
                .latest_stable(package)
                .with_context(|| format!("resolving latest stable version of '{package}'"))?;

            let pinned_version = TagVersion::parse(pinned).ok_or_else(|| {
                anyhow!("pinned version '{pinned}' of '{package}' has no numeric components")
            })?;
            let latest_version = TagVersion::parse(&latest)
                .ok_or_else(|| anyhow!("upstream tag '{latest}' has no numeric components"))?;

            if latest_version > pinned_version {
                info!(package, pinned, %latest, "update available");
                updates.push(PendingUpdate {
                    package: package.to_string(),
                    pinned: pinned.to_string(),
                    latest,
                });
            } else {
                debug!(package, pinned, %latest, "up to date");
            }
        }

        if updates.is_empty() {
            return Ok(TrackerOutcome::UpToDate);
        }

        match mode {
            CheckMode::CheckOnly => Ok(TrackerOutcome::UpdatesAvailable(updates)),
            CheckMode::Update => {
                registry
                    .with_pins(
                        updates
                            .iter()
                            .map(|u| (u.package.as_str(), u.latest.as_str())),
                    )?
                    .save()?;
                info!(registry = %registry_path.display(), count = updates.len(), "registry updated");
                Ok(TrackerOutcome::Updated(updates))
            }
        }
    }

    fn latest_stable(&self, package: &str) -> Result<String> {
        let upstream = self.upstreams.get(package).ok_or_else(|| {
            anyhow!("no [upstream.{package}] configured; cannot enumerate its tags")
        })?;
        let policy = StabilityPolicy::new(&self.config.prerelease_markers, &upstream.tag_pattern)?;

        let tags = self.source.list_tags(package, upstream)?;
        policy
            .pick_latest(tags.iter().map(String::as_str))
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!(
                    "no stable tag among {} upstream tags matches '{}'",
                    tags.len(),
                    upstream.tag_pattern
                )
            })
    }
}
