//! `go.mod` resolver.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use crate::model::{DependencyNode, Ecosystem};
use crate::traits::{read_optional, EcosystemResolver, Resolution, ResolveError};

pub const GO_MOD: &str = "go.mod";
pub const GO_SUM: &str = "go.sum";

#[derive(Debug, Default, Clone)]
pub struct GoResolver {
    confirm_checksums: bool,
}

impl GoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops requirements that have no matching `go.sum` line (when `go.sum` exists).
    pub fn with_checksum_confirmation(mut self, confirm: bool) -> Self {
        self.confirm_checksums = confirm;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoRequire {
    pub path: String,
    pub version: String,
    pub indirect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoReplace {
    pub old_path: String,
    pub old_version: Option<String>,
    pub new_path: String,
    /// `None` for filesystem replacements.
    pub new_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoModFile {
    pub module: Option<String>,
    pub requires: Vec<GoRequire>,
    pub replaces: Vec<GoReplace>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    Require,
    Replace,
    Other,
}

/// Splits a line into code and the text after `//`.
pub(crate) fn split_go_comment(line: &str) -> (&str, Option<&str>) {
    match line.find("//") {
        Some(idx) => (&line[..idx], Some(line[idx + 2..].trim())),
        None => (line, None),
    }
}

fn unquote(token: &str) -> String {
    token.trim_matches('"').trim_matches('`').to_string()
}

pub fn parse_go_mod(text: &str) -> GoModFile {
    let mut file = GoModFile::default();
    let mut block = Block::None;

    for line in text.lines() {
        let (code, comment) = split_go_comment(line);
        let tokens: Vec<&str> = code.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        if block != Block::None {
            if tokens[0] == ")" {
                block = Block::None;
                continue;
            }
            match block {
                Block::Require => push_require(&mut file, &tokens, comment),
                Block::Replace => push_replace(&mut file, &tokens),
                _ => {}
            }
            continue;
        }

        match tokens[0] {
            "module" if tokens.len() > 1 => file.module = Some(unquote(tokens[1])),
            "require" | "replace" | "exclude" | "retract" | "tool" | "godebug"
                if tokens.get(1) == Some(&"(") =>
            {
                block = match tokens[0] {
                    "require" => Block::Require,
                    "replace" => Block::Replace,
                    _ => Block::Other,
                };
            }
            "require" => push_require(&mut file, &tokens[1..], comment),
            "replace" => push_replace(&mut file, &tokens[1..]),
            _ => {}
        }
    }

    file
}

fn push_require(file: &mut GoModFile, tokens: &[&str], comment: Option<&str>) {
    if tokens.len() < 2 {
        debug!(line = ?tokens, "Skipping malformed require line");
        return;
    }
    file.requires.push(GoRequire {
        path: unquote(tokens[0]),
        version: unquote(tokens[1]),
        indirect: comment.map(|c| c.starts_with("indirect")).unwrap_or(false),
    });
}

fn push_replace(file: &mut GoModFile, tokens: &[&str]) {
    let Some(arrow) = tokens.iter().position(|t| *t == "=>") else {
        debug!(line = ?tokens, "Skipping malformed replace line");
        return;
    };
    let (old, new) = (&tokens[..arrow], &tokens[arrow + 1..]);
    if old.is_empty() || new.is_empty() {
        return;
    }
    file.replaces.push(GoReplace {
        old_path: unquote(old[0]),
        old_version: old.get(1).map(|v| unquote(v)),
        new_path: unquote(new[0]),
        new_version: new.get(1).map(|v| unquote(v)),
    });
}

/// `(module, version)` pairs listed in `go.sum`, with `/go.mod` suffixes folded.
pub fn parse_go_sum(text: &str) -> HashSet<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let module = parts.next()?;
            let version = parts.next()?;
            let version = version.strip_suffix("/go.mod").unwrap_or(version);
            Some((module.to_string(), version.to_string()))
        })
        .collect()
}

impl GoModFile {
    /// Requirement after applying any matching module replacement.
    fn effective(&self, req: &GoRequire) -> (String, String) {
        let replacement = self.replaces.iter().find(|r| {
            r.old_path == req.path
                && r.old_version.as_deref().map_or(true, |v| v == req.version)
        });
        match replacement {
            Some(GoReplace {
                new_path,
                new_version: Some(version),
                ..
            }) => (new_path.clone(), version.clone()),
            Some(r) => {
                debug!(module = %req.path, target = %r.new_path, "Local replacement, keeping required version");
                (req.path.clone(), req.version.clone())
            }
            None => (req.path.clone(), req.version.clone()),
        }
    }
}

#[async_trait]
impl EcosystemResolver for GoResolver {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Go
    }

    async fn resolve(&self, root: &Path) -> Result<Resolution, ResolveError> {
        let Some(text) = read_optional(&root.join(GO_MOD)).await? else {
            return Ok(Resolution::NotFound {
                manifest: GO_MOD.to_string(),
            });
        };
        let file = parse_go_mod(&text);
        let parent = file.module.clone().unwrap_or_else(|| GO_MOD.to_string());

        let confirmed = if self.confirm_checksums {
            read_optional(&root.join(GO_SUM)).await?.map(|s| parse_go_sum(&s))
        } else {
            None
        };

        let mut nodes: Vec<DependencyNode> = Vec::new();
        for req in &file.requires {
            let (path, version) = file.effective(req);
            if let Some(sums) = &confirmed {
                if !sums.contains(&(path.clone(), version.clone())) {
                    warn!(module = %path, version = %version, "Not confirmed by go.sum, skipping");
                    continue;
                }
            }
            let depth = if req.indirect { 2 } else { 1 };
            let key = DependencyNode::make_key(&path, &version);
            match nodes.iter_mut().find(|n| n.key == key) {
                Some(existing) => existing.depth = existing.depth.min(depth),
                None => nodes.push(DependencyNode::new(path, version, Ecosystem::Go, depth).with_parent(&parent)),
            }
        }

        Ok(Resolution::Found(nodes))
    }
}
