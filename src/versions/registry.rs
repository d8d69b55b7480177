//! The pinned version registry (`versions.json`).
//!
//! A flat JSON object mapping package name to pinned tag. Key order is kept
//! as found, and the file is always written with 4-space indentation, so
//! rewriting one entry leaves every other line untouched.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::io::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRegistry {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl VersionRegistry {
    /// Load and validate the registry. Every value must be a non-empty string.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading version registry '{}'", path.display()))?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .with_context(|| format!("parsing version registry '{}'", path.display()))?;
        let Value::Object(map) = value else {
            bail!(
                "version registry '{}' must contain a JSON object",
                path.display()
            );
        };

        let mut entries = Vec::with_capacity(map.len());
        for (package, pinned) in map {
            match pinned {
                Value::String(version) if !version.trim().is_empty() => {
                    entries.push((package, version));
                }
                other => bail!(
                    "version registry '{}': '{}' must map to a non-empty version string, found {}",
                    path.display(),
                    package,
                    other
                ),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// `(package, pinned version)` in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }

    /// A copy with the given pins replaced. Unknown packages are an error.
    pub fn with_pins<'u, I>(&self, pins: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'u str, &'u str)>,
    {
        let mut next = self.clone();
        for (package, version) in pins {
            let Some(slot) = next.entries.iter_mut().find(|(name, _)| name == package) else {
                bail!("package '{package}' is not in the version registry");
            };
            slot.1 = version.to_string();
        }
        Ok(next)
    }

    /// Serialized file content.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(p, v)| (p.clone(), Value::String(v.clone())))
            .collect();

        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        map.serialize(&mut ser)
            .context("serializing version registry")?;
        out.push(b'\n');
        Ok(out)
    }

    /// Replace the registry file in one rename.
    pub fn save(&self) -> Result<()> {
        let bytes = self.to_json()?;
        write_atomic(&self.path, &bytes)
            .with_context(|| format!("writing version registry '{}'", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REGISTRY: &str = "{\n    \"tor\": \"tor-0.4.8.9\",\n    \"unbound\": \"release-1.19.0\",\n    \"udp2raw\": \"20230206.0\"\n}\n";

    #[test]
    fn keeps_file_order() {
        let reg = VersionRegistry::parse(REGISTRY, Path::new("versions.json")).unwrap();
        let names: Vec<_> = reg.entries().map(|(p, _)| p).collect();
        assert_eq!(names, vec!["tor", "unbound", "udp2raw"]);
        assert!(reg.entries().any(|e| e == ("unbound", "release-1.19.0")));
    }

    #[test]
    fn canonical_file_roundtrips_byte_identical() {
        let reg = VersionRegistry::parse(REGISTRY, Path::new("versions.json")).unwrap();
        assert_eq!(reg.to_json().unwrap(), REGISTRY.as_bytes());
    }

    #[test]
    fn pin_changes_only_its_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("versions.json");
        fs::write(&path, REGISTRY).unwrap();

        let reg = VersionRegistry::load(&path).unwrap();
        reg.with_pins([("unbound", "release-1.20.0")])
            .unwrap()
            .save()
            .unwrap();

        let before: Vec<&str> = REGISTRY.lines().collect();
        let after_text = fs::read_to_string(&path).unwrap();
        let after: Vec<&str> = after_text.lines().collect();
        assert_eq!(before.len(), after.len());
        for (i, (b, a)) in before.iter().zip(&after).enumerate() {
            if i == 2 {
                assert_eq!(*a, "    \"unbound\": \"release-1.20.0\",");
            } else {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn malformed_registries_rejected() {
        let p = Path::new("versions.json");
        assert!(VersionRegistry::parse("[\"tor\"]", p).is_err());
        assert!(VersionRegistry::parse("{\"tor\": 4}", p).is_err());
        assert!(VersionRegistry::parse("{\"tor\": \"\"}", p).is_err());
        assert!(VersionRegistry::parse("{\"tor\": ", p).is_err());
    }

    #[test]
    fn unknown_pin_rejected() {
        let reg = VersionRegistry::parse(REGISTRY, Path::new("versions.json")).unwrap();
        assert!(reg.with_pins([("wghttp", "v1.0.0")]).is_err());
    }
}
