use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// A package-management universe with its own manifest format and registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Pip,
    Go,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 3] = [Ecosystem::Npm, Ecosystem::Pip, Ecosystem::Go];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Pip => "pip",
            Ecosystem::Go => "go",
        }
    }

    /// Ecosystems whose primary manifest exists directly under `root`.
    pub fn detect(root: &Path) -> Vec<Ecosystem> {
        let has = |file: &str| root.join(file).is_file();
        Self::ALL
            .into_iter()
            .filter(|eco| match eco {
                Ecosystem::Npm => has("package-lock.json") || has("npm-shrinkwrap.json"),
                Ecosystem::Pip => has("requirements.txt") || has("pyproject.toml"),
                Ecosystem::Go => has("go.mod"),
            })
            .collect()
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown ecosystem '{0}' (expected npm, pip or go)")]
pub struct UnknownEcosystem(pub String);

impl FromStr for Ecosystem {
    type Err = UnknownEcosystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" | "node" => Ok(Ecosystem::Npm),
            "pip" | "pypi" | "python" => Ok(Ecosystem::Pip),
            "go" | "golang" => Ok(Ecosystem::Go),
            other => Err(UnknownEcosystem(other.to_string())),
        }
    }
}

/// One package instance in a project's dependency graph.
///
/// Built fresh by a resolver on every run and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// `name@version`, unique within one resolution run.
    pub key: String,
    pub name: String,
    pub version: String,
    pub ecosystem: Ecosystem,
    /// 0 = root, 1 = direct, 2+ = transitive.
    pub depth: u32,
    /// Keys (or source labels) of everything that declared this dependency,
    /// in discovery order.
    pub parents: Vec<String>,
    /// Deprecation message already recorded in the lockfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_deprecated: Option<String>,
}

impl DependencyNode {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        ecosystem: Ecosystem,
        depth: u32,
    ) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            key: Self::make_key(&name, &version),
            name,
            version,
            ecosystem,
            depth,
            parents: Vec::new(),
            declared_deprecated: None,
        }
    }

    pub fn make_key(name: &str, version: &str) -> String {
        format!("{}@{}", name, version)
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.add_parent(parent);
        self
    }

    /// Records a parent, ignoring duplicates.
    pub fn add_parent(&mut self, parent: impl Into<String>) {
        let parent = parent.into();
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    pub fn is_direct(&self) -> bool {
        self.depth <= 1
    }

    pub fn is_transitive(&self) -> bool {
        self.depth >= 2
    }
}

/// Facts fetched from the authoritative registry for one package version.
///
/// Every field is optional: an empty value means "unknown", never "safe".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub last_publish: Option<DateTime<Utc>>,
    pub latest_version: Option<String>,
    pub license: Option<String>,
    pub deprecated: Option<String>,
    /// PyPI only.
    pub requires_python: Option<String>,
}

impl RegistryMetadata {
    pub fn is_empty(&self) -> bool {
        self.last_publish.is_none()
            && self.latest_version.is_none()
            && self.license.is_none()
            && self.deprecated.is_none()
            && self.requires_python.is_none()
    }
}

/// Registry metadata for a resolution run, keyed by [`DependencyNode::key`].
pub type MetadataMap = BTreeMap<String, RegistryMetadata>;

/// Risk signals derived from a node and its registry metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSignals {
    pub ancient: bool,
    pub deprecated: bool,
    pub fork_hint: bool,
    pub old_python: bool,
    pub months_since_publish: Option<u32>,
    pub reasons: Vec<String>,
}

impl RiskSignals {
    pub fn is_problematic(&self) -> bool {
        self.ancient || self.deprecated || self.fork_hint || self.old_python
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_and_parents() {
        let mut node = DependencyNode::new("left-pad", "1.3.0", Ecosystem::Npm, 2);
        assert_eq!(node.key, "left-pad@1.3.0");
        node.add_parent("a@1.0.0");
        node.add_parent("a@1.0.0");
        node.add_parent("b@2.0.0");
        assert_eq!(node.parents, vec!["a@1.0.0", "b@2.0.0"]);
        assert!(node.is_transitive());
        assert!(!node.is_direct());
    }

    #[test]
    fn test_ecosystem_from_str() {
        assert_eq!("PyPI".parse::<Ecosystem>(), Ok(Ecosystem::Pip));
        assert_eq!("golang".parse::<Ecosystem>(), Ok(Ecosystem::Go));
        assert!("cargo".parse::<Ecosystem>().is_err());
    }

    #[test]
    fn test_ecosystem_serialization() {
        let json = serde_json::to_string(&Ecosystem::Npm).unwrap();
        assert_eq!(json, "\"npm\"");
    }

    #[test]
    fn test_detect_ecosystems() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "six\n").unwrap();
        assert_eq!(
            Ecosystem::detect(dir.path()),
            vec![Ecosystem::Pip, Ecosystem::Go]
        );
    }

    #[test]
    fn test_empty_metadata() {
        assert!(RegistryMetadata::default().is_empty());
        let meta = RegistryMetadata {
            license: Some("MIT".into()),
            ..Default::default()
        };
        assert!(!meta.is_empty());
    }
}
