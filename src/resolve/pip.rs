//! Python requirement manifests.
//!
//! `requirements.txt` (with `-r` includes) wins; otherwise only the `[project]`
//! and `[project.optional-dependencies]` tables of `pyproject.toml` are read.
//! No transitive resolution happens here, every entry is a direct dependency.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{DependencyNode, Ecosystem};
use crate::traits::{read_optional, EcosystemResolver, Resolution, ResolveError};

pub const REQUIREMENTS: &str = "requirements.txt";
pub const PYPROJECT: &str = "pyproject.toml";

/// Version recorded for requirements without a usable version specifier.
pub const ANY_VERSION: &str = "*";

#[derive(Debug, Default, Clone)]
pub struct PipResolver;

/// One parsed requirement specifier, e.g. `requests[socks]>=2.0 ; python_version > "3"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Option<String>,
    /// Operator of the clause the version came from (`==`, `>=`, `~=`, `===`).
    pub operator: Option<String>,
    pub version: String,
    pub marker: Option<String>,
}

impl Requirement {
    /// PEP 503 normalised name used for comparisons.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .replace(['_', '.'], "-")
}

const OPERATORS: [&str; 8] = ["===", "==", "~=", ">=", "<=", "!=", ">", "<"];
const VERSIONED_OPERATORS: [&str; 4] = ["===", "==", "~=", ">="];

/// Parses a single requirement specifier. Option lines, URLs and local paths
/// yield `None`.
pub fn parse_requirement(spec: &str) -> Option<Requirement> {
    let spec = spec.trim();
    if spec.is_empty()
        || spec.starts_with('-')
        || spec.starts_with('.')
        || spec.starts_with('/')
        || spec.contains("://")
    {
        return None;
    }

    let (body, marker) = match spec.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
        None => (spec, None),
    };
    // Direct references (`name @ https://...`) carry no registry version.
    if body.contains('@') {
        return None;
    }

    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(body.len());
    let name = &body[..name_len];
    if name.is_empty() {
        return None;
    }

    let mut rest = body[name_len..].trim_start();
    let mut extras = None;
    if let Some(after) = rest.strip_prefix('[') {
        let close = after.find(']')?;
        extras = Some(after[..close].trim().to_string());
        rest = after[close + 1..].trim_start();
    }
    let rest = rest.trim_start_matches('(').trim_end_matches(')').trim();

    let mut operator = None;
    let mut version = ANY_VERSION.to_string();
    for clause in rest.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let op = OPERATORS.iter().find(|op| clause.starts_with(**op))?;
        if VERSIONED_OPERATORS.contains(op) {
            let v = clause[op.len()..].trim();
            if !v.is_empty() {
                operator = Some(op.to_string());
                version = v.to_string();
                break;
            }
        }
    }

    Some(Requirement {
        name: name.to_string(),
        extras,
        operator,
        version,
        marker,
    })
}

/// Strips a pip-style comment: `#` at line start or preceded by whitespace.
pub fn strip_comment(line: &str) -> (&str, Option<&str>) {
    if line.trim_start().starts_with('#') {
        return ("", Some(line.trim_start()));
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return (&line[..i], Some(&line[i..]));
        }
    }
    (line, None)
}

/// Returns the include target of a `-r`/`--requirement` line.
fn include_target(line: &str) -> Option<&str> {
    let line = line.trim();
    let rest = line
        .strip_prefix("--requirement")
        .or_else(|| line.strip_prefix("-r"))?;
    let rest = rest.trim_start_matches('=').trim();
    (!rest.is_empty()).then_some(rest)
}

/// Joins backslash continuations into logical lines.
fn logical_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for raw in text.lines() {
        match raw.strip_suffix('\\') {
            Some(head) => current.push_str(head),
            None => {
                current.push_str(raw);
                out.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[derive(Default)]
struct NodeSet {
    nodes: Vec<DependencyNode>,
    by_key: HashMap<String, usize>,
}

impl NodeSet {
    fn add(&mut self, req: &Requirement, label: &str) {
        let key = DependencyNode::make_key(&req.name, &req.version);
        let idx = *self.by_key.entry(key).or_insert_with(|| {
            self.nodes
                .push(DependencyNode::new(&req.name, &req.version, Ecosystem::Pip, 1));
            self.nodes.len() - 1
        });
        self.nodes[idx].add_parent(label);
    }
}

/// Lexically resolves `.` and `..` so include cycles are detected.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn label_for(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

async fn resolve_requirements(root: &Path, text: String) -> Result<Vec<DependencyNode>, ResolveError> {
    let mut set = NodeSet::default();
    let first = normalize_path(&root.join(REQUIREMENTS));
    let root = normalize_path(root);
    let root = root.as_path();
    let mut seen: HashSet<PathBuf> = HashSet::from([first.clone()]);
    let mut queue: VecDeque<(PathBuf, String)> = VecDeque::from([(first, text)]);

    while let Some((path, text)) = queue.pop_front() {
        let label = label_for(root, &path);
        let dir = path.parent().unwrap_or(root).to_path_buf();

        for line in logical_lines(&text) {
            let (code, _) = strip_comment(&line);
            let code = code.trim();
            if code.is_empty() {
                continue;
            }
            if let Some(target) = include_target(code) {
                let include = normalize_path(&dir.join(target));
                if !seen.insert(include.clone()) {
                    continue;
                }
                match read_optional(&include).await {
                    Ok(Some(text)) => queue.push_back((include, text)),
                    Ok(None) => warn!(file = %label, include = %target, "Included requirements file not found"),
                    Err(e) => warn!(file = %label, error = %e, "Skipping unreadable include"),
                }
                continue;
            }
            match parse_requirement(code) {
                Some(req) => set.add(&req, &label),
                None => debug!(file = %label, line = %code, "Skipping requirement line"),
            }
        }
    }

    Ok(set.nodes)
}

fn resolve_pyproject(text: &str) -> Result<Vec<DependencyNode>, ResolveError> {
    let doc: toml::Value = toml::from_str(text).map_err(|e| ResolveError::malformed(PYPROJECT, e))?;
    let mut set = NodeSet::default();
    let Some(project) = doc.get("project") else {
        return Ok(Vec::new());
    };

    if let Some(deps) = project.get("dependencies").and_then(toml::Value::as_array) {
        for req in deps.iter().filter_map(toml::Value::as_str).filter_map(parse_requirement) {
            set.add(&req, PYPROJECT);
        }
    }
    if let Some(groups) = project
        .get("optional-dependencies")
        .and_then(toml::Value::as_table)
    {
        for (group, deps) in groups {
            let label = format!("{}[{}]", PYPROJECT, group);
            for req in deps
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(toml::Value::as_str)
                .filter_map(parse_requirement)
            {
                set.add(&req, &label);
            }
        }
    }
    Ok(set.nodes)
}

#[async_trait]
impl EcosystemResolver for PipResolver {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pip
    }

    async fn resolve(&self, root: &Path) -> Result<Resolution, ResolveError> {
        if let Some(text) = read_optional(&root.join(REQUIREMENTS)).await? {
            return Ok(Resolution::Found(resolve_requirements(root, text).await?));
        }
        if let Some(text) = read_optional(&root.join(PYPROJECT)).await? {
            return Ok(Resolution::Found(resolve_pyproject(&text)?));
        }
        Ok(Resolution::NotFound {
            manifest: format!("{} or {}", REQUIREMENTS, PYPROJECT),
        })
    }
}
