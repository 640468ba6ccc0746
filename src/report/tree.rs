//! Optional transitive enrichment for ecosystems whose manifest carries no tree.
//!
//! A pip project's requirements only name direct dependencies. When the output of
//! `pipdeptree --json` (flat) or `pipdeptree --json-tree` (nested) is available it
//! is loaded into a [`TransitiveTree`] and merged into the resolved nodes with
//! [`enrich_with_tree`]. Reports work the same with or without this stage.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::model::DependencyNode;
use crate::resolve::pip::{normalize_name, ANY_VERSION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePackage {
    pub name: String,
    pub version: String,
    /// Normalised names of direct requirements.
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitiveTree {
    packages: BTreeMap<String, TreePackage>,
}

fn package_name(value: &Value) -> Option<&str> {
    value
        .get("package_name")
        .or_else(|| value.get("key"))
        .and_then(Value::as_str)
}

fn installed_version(value: &Value) -> Option<&str> {
    value.get("installed_version").and_then(Value::as_str)
}

impl TransitiveTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses either pipdeptree JSON layout. Returns `None` for anything else.
    pub fn from_pipdeptree_json(json: &str) -> Option<Self> {
        let doc: Value = serde_json::from_str(json).ok()?;
        let items = doc.as_array()?;
        let mut tree = Self::new();

        for item in items {
            if let Some(package) = item.get("package") {
                // flat: {"package": {...}, "dependencies": [{...}]}
                let name = package_name(package)?;
                let version = installed_version(package).unwrap_or(ANY_VERSION);
                let requires = item
                    .get("dependencies")
                    .and_then(Value::as_array)
                    .map(|deps| deps.iter().filter_map(package_name).map(normalize_name).collect())
                    .unwrap_or_default();
                tree.insert(name, version, requires);
            } else {
                tree.insert_nested(item)?;
            }
        }
        Some(tree)
    }

    fn insert_nested(&mut self, item: &Value) -> Option<()> {
        let name = package_name(item)?;
        let version = installed_version(item).unwrap_or(ANY_VERSION);
        let children = item
            .get("dependencies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let requires = children
            .iter()
            .filter_map(package_name)
            .map(normalize_name)
            .collect();
        self.insert(name, version, requires);
        for child in &children {
            self.insert_nested(child)?;
        }
        Some(())
    }

    /// Adds a package; an already-known package keeps the union of requirements.
    pub fn insert(&mut self, name: &str, version: &str, requires: Vec<String>) {
        let entry = self
            .packages
            .entry(normalize_name(name))
            .or_insert_with(|| TreePackage {
                name: name.to_string(),
                version: version.to_string(),
                requires: Vec::new(),
            });
        for req in requires {
            if !entry.requires.contains(&req) {
                entry.requires.push(req);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&TreePackage> {
        self.packages.get(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Merges `tree` into resolved `nodes`: unpinned versions are filled from the
/// installed version, and every package reachable from the existing nodes is
/// added with its breadth-first depth and all of its parents.
pub fn enrich_with_tree(nodes: &[DependencyNode], tree: &TransitiveTree) -> Vec<DependencyNode> {
    let mut out: Vec<DependencyNode> = Vec::with_capacity(nodes.len());
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut queue = VecDeque::new();

    for node in nodes {
        let mut node = node.clone();
        let normalized = normalize_name(&node.name);
        if node.version == ANY_VERSION {
            if let Some(pkg) = tree.get(&node.name) {
                node.version = pkg.version.clone();
                node.key = DependencyNode::make_key(&node.name, &node.version);
            }
        }
        if let Some(&idx) = by_name.get(&normalized) {
            for parent in node.parents {
                out[idx].add_parent(parent);
            }
            continue;
        }
        by_name.insert(normalized.clone(), out.len());
        queue.push_back(normalized);
        out.push(node);
    }

    while let Some(name) = queue.pop_front() {
        let Some(&idx) = by_name.get(&name) else {
            continue;
        };
        let Some(pkg) = tree.get(&name) else {
            continue;
        };
        let (parent_key, parent_depth, ecosystem) = {
            let parent = &out[idx];
            (parent.key.clone(), parent.depth.max(1), parent.ecosystem)
        };
        for child in &pkg.requires {
            match by_name.get(child) {
                Some(&existing) => out[existing].add_parent(parent_key.clone()),
                None => {
                    let (child_name, child_version) = match tree.get(child) {
                        Some(p) => (p.name.clone(), p.version.clone()),
                        None => (child.clone(), ANY_VERSION.to_string()),
                    };
                    let node = DependencyNode::new(child_name, child_version, ecosystem, parent_depth + 1)
                        .with_parent(parent_key.clone());
                    by_name.insert(child.clone(), out.len());
                    queue.push_back(child.clone());
                    out.push(node);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ecosystem;

    const FLAT: &str = r#"[
        {"package": {"key": "requests", "package_name": "requests", "installed_version": "2.31.0"},
         "dependencies": [
            {"key": "urllib3", "package_name": "urllib3", "installed_version": "2.0.7", "required_version": ">=1.21.1"},
            {"key": "idna", "package_name": "idna", "installed_version": "3.4", "required_version": ">=2.5"}
         ]},
        {"package": {"key": "urllib3", "package_name": "urllib3", "installed_version": "2.0.7"}, "dependencies": []},
        {"package": {"key": "idna", "package_name": "idna", "installed_version": "3.4"}, "dependencies": []},
        {"package": {"key": "flask", "package_name": "Flask", "installed_version": "3.0.0"},
         "dependencies": [{"key": "werkzeug", "package_name": "Werkzeug", "installed_version": "3.0.1"}]},
        {"package": {"key": "werkzeug", "package_name": "Werkzeug", "installed_version": "3.0.1"},
         "dependencies": [{"key": "markupsafe", "package_name": "MarkupSafe", "installed_version": "2.1.3"}]},
        {"package": {"key": "markupsafe", "package_name": "MarkupSafe", "installed_version": "2.1.3"}, "dependencies": []}
    ]"#;

    #[test]
    fn test_enrich_adds_transitive_depth_and_parents() {
        let tree = TransitiveTree::from_pipdeptree_json(FLAT).unwrap();
        assert_eq!(tree.len(), 6);

        let direct = vec![
            DependencyNode::new("requests", "2.31.0", Ecosystem::Pip, 1).with_parent("requirements.txt"),
            DependencyNode::new("flask", "*", Ecosystem::Pip, 1).with_parent("requirements.txt"),
        ];
        let nodes = enrich_with_tree(&direct, &tree);
        let by_name = |n: &str| nodes.iter().find(|x| x.name == n).unwrap();

        assert_eq!(nodes.len(), 6);
        assert_eq!(by_name("flask").version, "3.0.0");
        assert_eq!(by_name("flask").key, "flask@3.0.0");
        assert_eq!(by_name("urllib3").depth, 2);
        assert_eq!(by_name("urllib3").parents, vec!["requests@2.31.0"]);
        assert_eq!(by_name("MarkupSafe").depth, 3);
        assert_eq!(by_name("MarkupSafe").parents, vec!["Werkzeug@3.0.1"]);
    }

    #[test]
    fn test_nested_layout() {
        let nested = r#"[{"key": "a", "package_name": "a", "installed_version": "1",
            "dependencies": [{"key": "b", "package_name": "b", "installed_version": "2",
                "dependencies": [{"key": "c", "package_name": "c", "installed_version": "3", "dependencies": []}]}]}]"#;
        let tree = TransitiveTree::from_pipdeptree_json(nested).unwrap();
        assert_eq!(tree.get("b").unwrap().requires, vec!["c"]);

        let nodes = enrich_with_tree(&[DependencyNode::new("a", "1", Ecosystem::Pip, 1)], &tree);
        assert_eq!(nodes.iter().map(|n| n.depth).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rejects_non_tree_json() {
        assert!(TransitiveTree::from_pipdeptree_json(r#"{"a": 1}"#).is_none());
        assert!(TransitiveTree::from_pipdeptree_json("nope").is_none());
    }
}
