//! `artifact-hub.toml` loading.
//!
//! Every key is optional. A missing file yields the built-in defaults, which
//! include upstream locations for the packages this repository ships.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "artifact-hub.toml";

/// Overrides `[build] backend`.
pub const BACKEND_ENV: &str = "ARTIFACT_HUB_BACKEND";
/// Overrides `[build] output_dir`.
pub const OUTPUT_DIR_ENV: &str = "ARTIFACT_HUB_OUTPUT_DIR";

/// Tag substrings that mark an upstream tag as unstable.
pub const DEFAULT_PRERELEASE_MARKERS: &[&str] = &[
    "alpha", "beta", "rc", "test", "pre", "preview", "dev", "snapshot",
];

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub build: BuildConfig,
    pub versions: VersionsConfig,
    pub upstreams: BTreeMap<String, UpstreamConfig>,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub backend: String,
    pub environment: PathBuf,
    /// Build context handed to the image build.
    pub context: PathBuf,
    pub recipes_dir: PathBuf,
    pub output_dir: PathBuf,
    pub image_prefix: String,
    pub verify_outputs: bool,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct VersionsConfig {
    pub registry: PathBuf,
    pub prerelease_markers: Vec<String>,
    pub timeout: Duration,
    pub max_pages: u32,
    pub user_agent: String,
}

/// Where a package's release tags are listed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub kind: UpstreamKind,
    #[serde(default)]
    pub host: Option<String>,
    /// `owner/repo` on GitHub, the full project path on GitLab.
    pub project: String,
    /// Regex a stable tag must match in full.
    pub tag_pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    Github,
    Gitlab,
}

impl UpstreamConfig {
    pub fn host(&self) -> &str {
        match (&self.host, self.kind) {
            (Some(host), _) => host,
            (None, UpstreamKind::Github) => "api.github.com",
            (None, UpstreamKind::Gitlab) => "gitlab.com",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HubToml {
    #[serde(default)]
    build: BuildToml,
    #[serde(default)]
    versions: VersionsToml,
    #[serde(default)]
    upstream: BTreeMap<String, UpstreamConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    backend: Option<String>,
    environment: Option<PathBuf>,
    context: Option<PathBuf>,
    recipes_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    image_prefix: Option<String>,
    verify_outputs: Option<bool>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VersionsToml {
    registry: Option<PathBuf>,
    prerelease_markers: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    max_pages: Option<u32>,
    user_agent: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_toml(HubToml::default(), Path::new("."))
    }
}

impl HubConfig {
    /// Load `path` if it exists; otherwise use defaults relative to the
    /// working directory. Environment overrides apply either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.is_some();
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.is_file() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config '{}'", path.display()))?;
            Self::parse(&text, path.parent().unwrap_or(Path::new(".")))
                .with_context(|| format!("parsing config '{}'", path.display()))?
        } else if explicit {
            bail!("config file '{}' does not exist", path.display());
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse config text. Relative paths are resolved against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let parsed: HubToml = toml::from_str(text)?;
        let config = Self::from_toml(parsed, base_dir);
        config.validate()?;
        Ok(config)
    }

    fn from_toml(parsed: HubToml, base_dir: &Path) -> Self {
        let resolve = |p: Option<PathBuf>, default: &str| -> PathBuf {
            let p = p.unwrap_or_else(|| PathBuf::from(default));
            if p.is_absolute() || base_dir == Path::new(".") || base_dir.as_os_str().is_empty() {
                p
            } else {
                base_dir.join(p)
            }
        };

        let b = parsed.build;
        let build = BuildConfig {
            backend: b.backend.unwrap_or_else(|| "docker".to_string()),
            environment: resolve(b.environment, "build-env/Dockerfile"),
            context: resolve(b.context, "."),
            recipes_dir: resolve(b.recipes_dir, "recipes"),
            output_dir: resolve(b.output_dir, "dist"),
            image_prefix: b.image_prefix.unwrap_or_else(|| "artifact-hub".to_string()),
            verify_outputs: b.verify_outputs.unwrap_or(true),
            poll_interval: Duration::from_millis(b.poll_interval_ms.unwrap_or(200)),
        };

        let v = parsed.versions;
        let versions = VersionsConfig {
            registry: resolve(v.registry, "versions.json"),
            prerelease_markers: v.prerelease_markers.unwrap_or_else(|| {
                DEFAULT_PRERELEASE_MARKERS
                    .iter()
                    .map(|m| m.to_string())
                    .collect()
            }),
            timeout: Duration::from_secs(v.timeout_secs.unwrap_or(20)),
            max_pages: v.max_pages.unwrap_or(6),
            user_agent: v
                .user_agent
                .unwrap_or_else(|| "artifact-hub-version-checker/1.0".to_string()),
        };

        let mut upstreams = default_upstreams();
        upstreams.extend(parsed.upstream);

        Self {
            build,
            versions,
            upstreams,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.build.backend.trim().is_empty() {
            bail!("[build] backend must not be empty");
        }
        if self.build.image_prefix.is_empty()
            || !self
                .build
                .image_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c))
        {
            bail!(
                "[build] image_prefix '{}' must be lowercase alphanumeric (with - _ .)",
                self.build.image_prefix
            );
        }
        if self.versions.max_pages == 0 {
            bail!("[versions] max_pages must be >= 1");
        }
        for (package, upstream) in &self.upstreams {
            regex::Regex::new(&upstream.tag_pattern).with_context(|| {
                format!("[upstream.{package}] tag_pattern is not a valid regex")
            })?;
            if upstream.project.trim().is_empty() {
                bail!("[upstream.{package}] project must not be empty");
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(backend) = env::var(BACKEND_ENV) {
            if !backend.trim().is_empty() {
                self.build.backend = backend;
            }
        }
        if let Ok(dir) = env::var(OUTPUT_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.build.output_dir = PathBuf::from(dir);
            }
        }
    }
}

/// Upstream locations for the packages this repository builds.
pub fn default_upstreams() -> BTreeMap<String, UpstreamConfig> {
    let entries = [
        (
            "tor",
            UpstreamKind::Gitlab,
            Some("gitlab.torproject.org"),
            "tpo/core/tor",
            r"tor-\d+(?:\.\d+)+",
        ),
        (
            "unbound",
            UpstreamKind::Github,
            None,
            "NLnetLabs/unbound",
            r"release-\d+(?:\.\d+)+",
        ),
        (
            "udp2raw",
            UpstreamKind::Github,
            None,
            "wangyu-/udp2raw",
            r"\d+(?:\.\d+)+",
        ),
        (
            "wghttp",
            UpstreamKind::Github,
            None,
            "brsyuksel/wghttp",
            r"v\d+(?:\.\d+)+",
        ),
    ];

    entries
        .into_iter()
        .map(|(name, kind, host, project, pattern)| {
            (
                name.to_string(),
                UpstreamConfig {
                    kind,
                    host: host.map(str::to_string),
                    project: project.to_string(),
                    tag_pattern: pattern.to_string(),
                },
            )
        })
        .collect()
}
