//! Scoped ownership of one build environment.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::ContainerBackend;
use crate::env_id::EnvironmentId;

/// An environment's image and container, removed on release or drop.
///
/// Created before the image is built so that a failed build still has its
/// partial image cleaned up. Every exit path of a build (success, recipe
/// failure, setup failure, interruption, panic) passes through
/// [`BuildEnvironment::release`] or `Drop`.
pub struct BuildEnvironment<'a> {
    backend: &'a dyn ContainerBackend,
    id: EnvironmentId,
    released: bool,
}

impl<'a> BuildEnvironment<'a> {
    pub fn acquire(backend: &'a dyn ContainerBackend, id: EnvironmentId) -> Self {
        debug!(environment = %id, backend = backend.name(), "environment acquired");
        Self {
            backend,
            id,
            released: false,
        }
    }

    pub fn container_name(&self) -> &str {
        self.id.as_str()
    }

    pub fn image_tag(&self) -> String {
        self.id.image_tag()
    }

    /// Remove the container, then the image. Idempotent.
    ///
    /// Both removals are attempted even if the first fails.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let container = self
            .backend
            .remove_container(self.container_name())
            .with_context(|| format!("removing container '{}'", self.container_name()));
        let image = self
            .backend
            .remove_image(&self.image_tag())
            .with_context(|| format!("removing image '{}'", self.image_tag()));

        let result = container.and(image);
        if result.is_ok() {
            info!(environment = %self.id, "environment removed");
        }
        result
    }
}

impl Drop for BuildEnvironment<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(environment = %self.id, "cleanup failed: {err:#}");
        }
    }
}
