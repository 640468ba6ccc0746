//! npm lockfile resolver.
//!
//! Flattens `package-lock.json` (v2/v3 `packages` map, or the legacy v1 nested
//! `dependencies` tree) into a path-keyed entry table, reconstructs parent→child
//! edges with node's `node_modules` lookup rules, and walks the graph breadth-first
//! from the root package.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

use crate::model::{DependencyNode, Ecosystem};
use crate::traits::{read_optional, EcosystemResolver, Resolution, ResolveError};

pub const MANIFEST: &str = "package.json";
pub const LOCKFILE: &str = "package-lock.json";
pub const SHRINKWRAP: &str = "npm-shrinkwrap.json";

/// Resolves npm projects from their lockfile.
#[derive(Debug, Default, Clone)]
pub struct NpmResolver;

#[derive(Debug, Clone, Default, PartialEq)]
struct LockEntry {
    name: String,
    version: String,
    deprecated: Option<String>,
    /// Resolved location for `link: true` workspace entries.
    link: Option<String>,
    edges: Vec<String>,
}

impl LockEntry {
    fn key(&self) -> String {
        DependencyNode::make_key(&self.name, &self.version)
    }
}

#[async_trait]
impl EcosystemResolver for NpmResolver {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    async fn resolve(&self, root: &Path) -> Result<Resolution, ResolveError> {
        let (lock_name, lock_text) = match read_optional(&root.join(SHRINKWRAP)).await? {
            Some(text) => (SHRINKWRAP, text),
            None => match read_optional(&root.join(LOCKFILE)).await? {
                Some(text) => (LOCKFILE, text),
                None => {
                    return Ok(Resolution::NotFound {
                        manifest: LOCKFILE.to_string(),
                    })
                }
            },
        };

        let lock: Value = serde_json::from_str(&lock_text)
            .map_err(|e| ResolveError::malformed(lock_name, e))?;
        let manifest = match read_optional(&root.join(MANIFEST)).await? {
            Some(text) => Some(
                serde_json::from_str::<Value>(&text)
                    .map_err(|e| ResolveError::malformed(MANIFEST, e))?,
            ),
            None => None,
        };

        let entries = lock_entries(&lock, manifest.as_ref())
            .map_err(|reason| ResolveError::malformed(lock_name, reason))?;
        let nodes = walk(&entries);
        debug!(
            lockfile = lock_name,
            entries = entries.len(),
            reachable = nodes.len(),
            "Resolved npm lockfile"
        );
        Ok(Resolution::Found(nodes))
    }
}

/// Builds the path-keyed entry table for either lockfile layout.
fn lock_entries(
    lock: &Value,
    manifest: Option<&Value>,
) -> Result<BTreeMap<String, LockEntry>, String> {
    let lock = lock
        .as_object()
        .ok_or_else(|| "top level is not a JSON object".to_string())?;

    if let Some(packages) = lock.get("packages").and_then(Value::as_object) {
        let mut entries = BTreeMap::new();
        for (path, raw) in packages {
            let Some(raw) = raw.as_object() else {
                debug!(path = %path, "Skipping non-object lockfile entry");
                continue;
            };
            if let Some(entry) = modern_entry(path, raw, manifest) {
                entries.insert(path.clone(), entry);
            }
        }
        if !entries.contains_key("") {
            entries.insert(String::new(), root_entry(lock, manifest, None));
        }
        return Ok(entries);
    }

    if let Some(deps) = lock.get("dependencies").and_then(Value::as_object) {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), root_entry(lock, manifest, Some(deps)));
        flatten_legacy("", deps, &mut entries);
        return Ok(entries);
    }

    Err("neither a `packages` nor a `dependencies` map is present".to_string())
}

fn modern_entry(path: &str, raw: &Map<String, Value>, manifest: Option<&Value>) -> Option<LockEntry> {
    let is_root = path.is_empty();
    let name = str_field(raw, "name")
        .or_else(|| {
            if is_root {
                manifest.and_then(|m| m.get("name")).and_then(Value::as_str)
            } else {
                None
            }
        })
        .map(str::to_string)
        .unwrap_or_else(|| name_from_path(path));

    let link = match raw.get("link").and_then(Value::as_bool) {
        Some(true) => str_field(raw, "resolved").map(str::to_string),
        _ => None,
    };

    let version = match str_field(raw, "version") {
        Some(v) => v.to_string(),
        None if is_root || link.is_some() => "0.0.0".to_string(),
        None => {
            debug!(path = %path, "Skipping lockfile entry without a version");
            return None;
        }
    };

    let mut sections = vec!["dependencies", "optionalDependencies", "peerDependencies"];
    if is_root {
        sections.push("devDependencies");
    }

    Some(LockEntry {
        name,
        version,
        deprecated: str_field(raw, "deprecated").map(str::to_string),
        link,
        edges: edge_names(raw, &sections),
    })
}

fn root_entry(
    lock: &Map<String, Value>,
    manifest: Option<&Value>,
    legacy_deps: Option<&Map<String, Value>>,
) -> LockEntry {
    let manifest_obj = manifest.and_then(Value::as_object);
    let name = str_field(lock, "name")
        .or_else(|| manifest_obj.and_then(|m| str_field(m, "name")))
        .unwrap_or("root")
        .to_string();
    let version = str_field(lock, "version")
        .or_else(|| manifest_obj.and_then(|m| str_field(m, "version")))
        .unwrap_or("0.0.0")
        .to_string();

    let edges = match manifest_obj {
        Some(m) => edge_names(
            m,
            &[
                "dependencies",
                "devDependencies",
                "optionalDependencies",
                "peerDependencies",
            ],
        ),
        None => legacy_deps
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default(),
    };

    LockEntry {
        name,
        version,
        deprecated: None,
        link: None,
        edges,
    }
}

/// Rewrites the v1 nested tree into v2-style `node_modules` paths.
fn flatten_legacy(prefix: &str, deps: &Map<String, Value>, out: &mut BTreeMap<String, LockEntry>) {
    for (dep_name, raw) in deps {
        let Some(raw) = raw.as_object() else {
            continue;
        };
        let path = if prefix.is_empty() {
            format!("node_modules/{}", dep_name)
        } else {
            format!("{}/node_modules/{}", prefix, dep_name)
        };

        if let Some(version) = str_field(raw, "version") {
            // Aliased installs are recorded as `npm:<real-name>@<version>`.
            let (name, version) = match version.strip_prefix("npm:") {
                Some(alias) => match alias.rfind('@') {
                    Some(at) if at > 0 => (alias[..at].to_string(), alias[at + 1..].to_string()),
                    _ => (dep_name.clone(), alias.to_string()),
                },
                None => (dep_name.clone(), version.to_string()),
            };
            let edges = raw
                .get("requires")
                .and_then(Value::as_object)
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default();
            out.insert(
                path.clone(),
                LockEntry {
                    name,
                    version,
                    deprecated: str_field(raw, "deprecated").map(str::to_string),
                    link: None,
                    edges,
                },
            );
        }

        if let Some(nested) = raw.get("dependencies").and_then(Value::as_object) {
            flatten_legacy(&path, nested, out);
        }
    }
}

/// Breadth-first walk from the root entry. A key reached through several
/// parents keeps all of them and the depth at which it was first seen.
fn walk(entries: &BTreeMap<String, LockEntry>) -> Vec<DependencyNode> {
    let Some(root) = entries.get("") else {
        return Vec::new();
    };
    let root_key = root.key();

    let mut nodes: Vec<DependencyNode> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::from([String::new()]);
    let mut queue: VecDeque<(String, u32)> = VecDeque::from([(String::new(), 0)]);

    while let Some((path, depth)) = queue.pop_front() {
        let Some(entry) = entries.get(&path) else {
            continue;
        };
        let parent_key = if path.is_empty() {
            root_key.clone()
        } else {
            entry.key()
        };

        for dep in &entry.edges {
            let Some(child_path) = resolve_child(entries, &path, dep) else {
                debug!(from = %path, dependency = %dep, "Unresolvable lockfile edge");
                continue;
            };
            let Some(child) = entries.get(&child_path) else {
                continue;
            };
            let key = child.key();
            let idx = *by_key.entry(key).or_insert_with(|| {
                let mut node =
                    DependencyNode::new(&child.name, &child.version, Ecosystem::Npm, depth + 1);
                node.declared_deprecated = child.deprecated.clone();
                nodes.push(node);
                nodes.len() - 1
            });
            if nodes[idx].key != parent_key {
                nodes[idx].add_parent(&parent_key);
            }
            if visited.insert(child_path.clone()) {
                queue.push_back((child_path, depth + 1));
            }
        }
    }

    nodes
}

/// Finds where `dep` is installed as seen from the package at `from`:
/// the nested `node_modules` first, then each ancestor up to the hoisted root.
fn resolve_child(entries: &BTreeMap<String, LockEntry>, from: &str, dep: &str) -> Option<String> {
    let mut base = from.to_string();
    loop {
        let candidate = if base.is_empty() {
            format!("node_modules/{}", dep)
        } else {
            format!("{}/node_modules/{}", base, dep)
        };
        if let Some(entry) = entries.get(&candidate) {
            return match &entry.link {
                Some(target) if entries.contains_key(target) => Some(target.clone()),
                _ => Some(candidate),
            };
        }
        if base.is_empty() {
            return None;
        }
        base = parent_location(&base);
    }
}

fn parent_location(path: &str) -> String {
    match path.rfind("/node_modules/") {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn name_from_path(path: &str) -> String {
    match path.rfind("node_modules/") {
        Some(idx) => path[idx + "node_modules/".len()..].to_string(),
        None => path.rsplit('/').next().unwrap_or(path).to_string(),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn edge_names(obj: &Map<String, Value>, sections: &[&str]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for section in sections {
        if let Some(deps) = obj.get(*section).and_then(Value::as_object) {
            for name in deps.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
    }
    names
}
