//! Listing release tags from upstream forges.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::{UpstreamConfig, UpstreamKind};

/// Tags per page requested from the forge APIs.
pub const PAGE_SIZE: u32 = 100;

/// Source of tag names for a package.
pub trait TagSource {
    /// Every tag the upstream lists. Any transport or format problem is an error.
    fn list_tags(&self, package: &str, upstream: &UpstreamConfig) -> Result<Vec<String>>;
}

/// GitHub / GitLab REST tag listing.
pub struct HttpTagSource {
    client: Client,
    max_pages: u32,
}

impl HttpTagSource {
    pub fn new(user_agent: &str, timeout: Duration, max_pages: u32) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, max_pages })
    }

    fn fetch_page(&self, url: &str) -> Result<Value> {
        debug!(%url, "fetching tags");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .with_context(|| format!("requesting {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned HTTP {status}");
        }

        let body = response
            .text()
            .with_context(|| format!("reading response from {url}"))?;
        serde_json::from_str(&body).with_context(|| format!("parsing JSON from {url}"))
    }
}

impl TagSource for HttpTagSource {
    fn list_tags(&self, package: &str, upstream: &UpstreamConfig) -> Result<Vec<String>> {
        let base = tags_endpoint(upstream);
        let mut tags = Vec::new();

        for page in 1..=self.max_pages {
            let url = format!("{base}?per_page={PAGE_SIZE}&page={page}");
            let data = self
                .fetch_page(&url)
                .with_context(|| format!("listing tags for '{package}'"))?;
            let page_tags = tag_names(&data)
                .with_context(|| format!("unexpected tag listing for '{package}' from {url}"))?;
            if page_tags.is_empty() {
                break;
            }
            tags.extend(page_tags);
        }

        debug!(package, count = tags.len(), "listed upstream tags");
        Ok(tags)
    }
}

/// REST endpoint listing a project's tags.
pub fn tags_endpoint(upstream: &UpstreamConfig) -> String {
    match upstream.kind {
        UpstreamKind::Github => format!(
            "https://{}/repos/{}/tags",
            upstream.host(),
            upstream.project.trim_matches('/')
        ),
        UpstreamKind::Gitlab => format!(
            "https://{}/api/v4/projects/{}/repository/tags",
            upstream.host(),
            upstream.project.trim_matches('/').replace('/', "%2F")
        ),
    }
}

/// Extract `name` from every object of a tag listing page.
///
/// Both forges return an array of objects with a string `name`; anything else
/// means the response is not what we asked for.
pub fn tag_names(page: &Value) -> Result<Vec<String>> {
    let Value::Array(items) = page else {
        bail!("expected a JSON array of tags");
    };

    items
        .iter()
        .map(|item| {
            item.get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("tag entry without a string 'name': {item}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upstream(kind: UpstreamKind, host: Option<&str>, project: &str) -> UpstreamConfig {
        UpstreamConfig {
            kind,
            host: host.map(str::to_string),
            project: project.to_string(),
            tag_pattern: ".*".to_string(),
        }
    }

    #[test]
    fn github_endpoint() {
        let u = upstream(UpstreamKind::Github, None, "NLnetLabs/unbound");
        assert_eq!(
            tags_endpoint(&u),
            "https://api.github.com/repos/NLnetLabs/unbound/tags"
        );
    }

    #[test]
    fn gitlab_endpoint_encodes_project_path() {
        let u = upstream(
            UpstreamKind::Gitlab,
            Some("gitlab.torproject.org"),
            "tpo/core/tor",
        );
        assert_eq!(
            tags_endpoint(&u),
            "https://gitlab.torproject.org/api/v4/projects/tpo%2Fcore%2Ftor/repository/tags"
        );
    }

    #[test]
    fn names_from_listing() {
        let page = json!([{"name": "v1.0.0", "commit": {}}, {"name": "v1.1.0"}]);
        assert_eq!(tag_names(&page).unwrap(), vec!["v1.0.0", "v1.1.0"]);
        assert!(tag_names(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn malformed_listing_rejected() {
        assert!(tag_names(&json!({"message": "API rate limit exceeded"})).is_err());
        assert!(tag_names(&json!([{"name": 5}])).is_err());
        assert!(tag_names(&json!(["v1.0.0"])).is_err());
    }
}
