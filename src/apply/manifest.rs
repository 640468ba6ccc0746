//! Reading and rewriting the declared version of one dependency.
//!
//! Edits are minimal: `package.json` keeps its key order and the dependency's
//! section, requirement and `go.mod` lines keep their extras, markers and
//! comments. Each edited file is replaced atomically.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::version::{range_prefix, strip_range};
use crate::checkpoint::{tracked_files, write_atomic};
use crate::model::Ecosystem;
use crate::resolve::go::{self, split_go_comment};
use crate::resolve::npm;
use crate::resolve::pip::{self, normalize_name, parse_requirement, strip_comment, ANY_VERSION};

pub const NPM_SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "optionalDependencies",
    "peerDependencies",
];

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {file}: {reason}")]
    Malformed { file: String, reason: String },

    #[error("{package} is not declared in {file}")]
    NotDeclared { package: String, file: String },
}

impl ManifestError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ManifestError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The edit to make: `package` becomes `new_name` at `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestChange {
    pub package: String,
    /// Same as `package` for upgrades.
    pub new_name: String,
    pub version: String,
}

/// What was rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEdit {
    /// Path relative to the project root.
    pub file: String,
    pub previous_spec: String,
    pub new_spec: String,
}

fn read(path: &Path) -> Result<Option<String>, ManifestError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ManifestError::io(path, e)),
    }
}

fn write(path: &Path, text: &str) -> Result<(), ManifestError> {
    write_atomic(path, text.as_bytes()).map_err(|e| ManifestError::io(path, e))
}

/// Currently declared version of `package`, `None` when it is not declared.
/// npm prefers the installed version recorded in the lockfile; unpinned pip
/// requirements report `*`.
pub fn current_version(root: &Path, ecosystem: Ecosystem, package: &str) -> Result<Option<String>, ManifestError> {
    match ecosystem {
        Ecosystem::Npm => npm_current(root, package),
        Ecosystem::Pip => pip_current(root, package),
        Ecosystem::Go => go_current(root, package),
    }
}

/// Rewrites the manifest entry for `change.package`.
pub fn apply_change(root: &Path, ecosystem: Ecosystem, change: &ManifestChange) -> Result<ManifestEdit, ManifestError> {
    match ecosystem {
        Ecosystem::Npm => npm_apply(root, change),
        Ecosystem::Pip => pip_apply(root, change),
        Ecosystem::Go => go_apply(root, change),
    }
}

// npm

fn parse_json(file: &str, text: &str) -> Result<Value, ManifestError> {
    serde_json::from_str(text).map_err(|e| ManifestError::Malformed {
        file: file.to_string(),
        reason: e.to_string(),
    })
}

fn npm_declared(manifest: &Value, package: &str) -> Option<(&'static str, String)> {
    NPM_SECTIONS.iter().find_map(|section| {
        let spec = manifest.get(*section)?.get(package)?;
        Some((*section, spec.as_str().unwrap_or_default().to_string()))
    })
}

fn npm_current(root: &Path, package: &str) -> Result<Option<String>, ManifestError> {
    for lock_name in [npm::SHRINKWRAP, npm::LOCKFILE] {
        if let Some(text) = read(&root.join(lock_name))? {
            let lock = parse_json(lock_name, &text)?;
            let installed = lock
                .pointer(&format!("/packages/node_modules~1{}/version", package.replace('~', "~0").replace('/', "~1")))
                .or_else(|| lock.get("dependencies").and_then(|d| d.get(package)).and_then(|d| d.get("version")))
                .and_then(Value::as_str);
            if let Some(version) = installed {
                return Ok(Some(version.to_string()));
            }
            break;
        }
    }

    let Some(text) = read(&root.join(npm::MANIFEST))? else {
        return Ok(None);
    };
    let manifest = parse_json(npm::MANIFEST, &text)?;
    Ok(npm_declared(&manifest, package).map(|(_, spec)| strip_range(&spec)))
}

fn npm_apply(root: &Path, change: &ManifestChange) -> Result<ManifestEdit, ManifestError> {
    let path = root.join(npm::MANIFEST);
    let text = read(&path)?.ok_or_else(|| ManifestError::NotDeclared {
        package: change.package.clone(),
        file: npm::MANIFEST.to_string(),
    })?;
    let mut manifest = parse_json(npm::MANIFEST, &text)?;
    let (section, previous) = npm_declared(&manifest, &change.package).ok_or_else(|| ManifestError::NotDeclared {
        package: change.package.clone(),
        file: npm::MANIFEST.to_string(),
    })?;
    let new_spec = format!("{}{}", range_prefix(&previous), change.version);

    if let Some(Value::Object(deps)) = manifest.get_mut(section) {
        // Rebuild so a renamed key keeps its position.
        let mut rebuilt = Map::with_capacity(deps.len());
        for (key, value) in std::mem::take(deps) {
            if key == change.package {
                rebuilt.insert(change.new_name.clone(), Value::String(new_spec.clone()));
            } else if key != change.new_name {
                rebuilt.insert(key, value);
            }
        }
        *deps = rebuilt;
    }

    let trailing = if text.ends_with('\n') { "\n" } else { "" };
    let rendered = serde_json::to_string_pretty(&manifest).map_err(|e| ManifestError::Malformed {
        file: npm::MANIFEST.to_string(),
        reason: e.to_string(),
    })?;
    write(&path, &format!("{}{}", rendered, trailing))?;

    Ok(ManifestEdit {
        file: npm::MANIFEST.to_string(),
        previous_spec: previous,
        new_spec,
    })
}

// pip

/// Requirement files in lookup order.
fn requirement_files(root: &Path) -> Vec<String> {
    tracked_files(root, Ecosystem::Pip)
        .into_iter()
        .filter(|f| f.ends_with(".txt"))
        .collect()
}

fn requirement_version(spec: &str, package: &str) -> Option<String> {
    let req = parse_requirement(spec)?;
    (req.normalized_name() == normalize_name(package)).then_some(req.version)
}

fn pip_current(root: &Path, package: &str) -> Result<Option<String>, ManifestError> {
    for file in requirement_files(root) {
        let Some(text) = read(&root.join(&file))? else {
            continue;
        };
        if let Some(version) = text
            .lines()
            .find_map(|line| requirement_version(strip_comment(line).0, package))
        {
            return Ok(Some(version));
        }
    }
    let Some(text) = read(&root.join(pip::PYPROJECT))? else {
        return Ok(None);
    };
    Ok(pyproject_strings(&text)
        .into_iter()
        .find_map(|(_, _, spec)| requirement_version(&spec, package)))
}

/// Rewrites the name and version clause of a requirement, leaving extras,
/// marker and surrounding whitespace byte-identical.
fn rewrite_requirement(spec: &str, change: &ManifestChange) -> Option<String> {
    let req = parse_requirement(spec)?;
    if req.normalized_name() != normalize_name(&change.package) {
        return None;
    }
    let start = spec.len() - spec.trim_start().len();
    let name_end = start + req.name.len();
    let body_end = spec[..spec.find(';').unwrap_or(spec.len())].trim_end().len().max(name_end);

    let mut clause_start = name_end;
    let after_name = &spec[name_end..body_end];
    if after_name.trim_start().starts_with('[') {
        if let Some(close) = after_name.find(']') {
            clause_start = name_end + close + 1;
        }
    }

    let mut out = String::with_capacity(spec.len() + change.version.len());
    if normalize_name(&change.new_name) == normalize_name(&change.package) {
        out.push_str(&spec[..clause_start]);
    } else {
        out.push_str(&spec[..start]);
        out.push_str(&change.new_name);
    }
    out.push_str("==");
    out.push_str(&change.version);
    out.push_str(&spec[body_end..]);
    Some(out)
}

fn pip_apply(root: &Path, change: &ManifestChange) -> Result<ManifestEdit, ManifestError> {
    for file in requirement_files(root) {
        let path = root.join(&file);
        let Some(text) = read(&path)? else {
            continue;
        };
        let mut edit = None;
        let mut lines: Vec<String> = Vec::new();
        for line in text.lines() {
            let (code, _) = strip_comment(line);
            match (edit.is_none(), rewrite_requirement(code, change)) {
                (true, Some(new_code)) => {
                    edit = Some(ManifestEdit {
                        file: file.clone(),
                        previous_spec: code.trim().to_string(),
                        new_spec: new_code.trim().to_string(),
                    });
                    lines.push(format!("{}{}", new_code, &line[code.len()..]));
                }
                _ => lines.push(line.to_string()),
            }
        }
        if let Some(edit) = edit {
            let mut out = lines.join("\n");
            if text.ends_with('\n') {
                out.push('\n');
            }
            write(&path, &out)?;
            return Ok(edit);
        }
    }

    let path = root.join(pip::PYPROJECT);
    if let Some(text) = read(&path)? {
        for (line_idx, range, spec) in pyproject_strings(&text) {
            if let Some(new_spec) = rewrite_requirement(&spec, change) {
                let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
                lines[line_idx].replace_range(range, &new_spec);
                let mut out = lines.join("\n");
                if text.ends_with('\n') {
                    out.push('\n');
                }
                write(&path, &out)?;
                return Ok(ManifestEdit {
                    file: pip::PYPROJECT.to_string(),
                    previous_spec: spec,
                    new_spec,
                });
            }
        }
    }

    Err(ManifestError::NotDeclared {
        package: change.package.clone(),
        file: pip::REQUIREMENTS.to_string(),
    })
}

/// Quoted strings inside `[project].dependencies` and
/// `[project.optional-dependencies]`, as `(line index, byte range, content)`.
fn pyproject_strings(text: &str) -> Vec<(usize, std::ops::Range<usize>, String)> {
    let mut out = Vec::new();
    let mut table = String::new();
    let mut in_array = false;

    for (idx, line) in text.lines().enumerate() {
        let code = line.split('#').next().unwrap_or("");
        let trimmed = code.trim();
        if !in_array && trimmed.starts_with('[') {
            table = trimmed.trim_matches(|c: char| c == '[' || c == ']').trim().to_string();
            continue;
        }
        let scan = match table.as_str() {
            "project" => {
                if !in_array && trimmed.starts_with("dependencies") && trimmed.contains('=') {
                    in_array = true;
                }
                in_array
            }
            "project.optional-dependencies" => true,
            _ => false,
        };
        if !scan {
            continue;
        }

        // Walk quoted strings; a `]` outside quotes closes the dependencies array.
        let mut closed = false;
        let mut pos = 0;
        while pos < code.len() {
            let rest = &code[pos..];
            let Some(offset) = rest.find(|c: char| c == '"' || c == ']') else {
                break;
            };
            let at = pos + offset;
            if code[at..].starts_with(']') {
                closed = true;
                pos = at + 1;
                continue;
            }
            let Some(len) = code[at + 1..].find('"') else {
                break;
            };
            let content = &code[at + 1..at + 1 + len];
            if parse_requirement(content).is_some() {
                out.push((idx, at + 1..at + 1 + len, content.to_string()));
            }
            pos = at + len + 2;
        }
        if closed {
            in_array = false;
        }
    }
    out
}

// go

fn go_current(root: &Path, package: &str) -> Result<Option<String>, ManifestError> {
    let Some(text) = read(&root.join(go::GO_MOD))? else {
        return Ok(None);
    };
    Ok(go::parse_go_mod(&text)
        .requires
        .into_iter()
        .find(|r| r.path == package)
        .map(|r| r.version))
}

fn go_apply(root: &Path, change: &ManifestChange) -> Result<ManifestEdit, ManifestError> {
    let path = root.join(go::GO_MOD);
    let not_declared = || ManifestError::NotDeclared {
        package: change.package.clone(),
        file: go::GO_MOD.to_string(),
    };
    let text = read(&path)?.ok_or_else(not_declared)?;

    let mut in_require = false;
    let mut edit = None;
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let (code, _) = split_go_comment(line);
        let trimmed = code.trim();
        let mut tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if trimmed.starts_with("require") && trimmed.ends_with('(') {
            in_require = true;
        } else if in_require && trimmed == ")" {
            in_require = false;
        } else if tokens.first() == Some(&"require") {
            tokens.remove(0);
        } else if !in_require {
            tokens.clear();
        }

        if edit.is_none() && tokens.len() >= 2 && tokens[0].trim_matches('"') == change.package {
            let old = format!("{} {}", tokens[0], tokens[1]);
            let new = format!("{} {}", change.new_name, change.version);
            if let Some(pos) = line.find(&old) {
                let mut rewritten = line.to_string();
                rewritten.replace_range(pos..pos + old.len(), &new);
                edit = Some(ManifestEdit {
                    file: go::GO_MOD.to_string(),
                    previous_spec: old,
                    new_spec: new,
                });
                lines.push(rewritten);
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let edit = edit.ok_or_else(not_declared)?;
    let mut out = lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    write(&path, &out)?;
    Ok(edit)
}

/// Placeholder version used when a requirement has no pin.
pub fn is_unpinned(version: &str) -> bool {
    version == ANY_VERSION
}
