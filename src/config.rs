//! Project-level policy read from `lineage.config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::detect::DEFAULT_ANCIENT_MONTHS;

pub const CONFIG_FILE: &str = "lineage.config.json";
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 60_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Interactive yes/no on the terminal.
    #[default]
    Prompt,
    /// POST the proposal and wait for `{"approved": bool}`.
    Webhook,
    /// Everything is approved.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalPolicy {
    pub mode: ApprovalMode,
    /// Operation kinds that need approval: `major`, `replace`, `upgrade`, `minor`.
    pub require_for: Vec<String>,
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::Prompt,
            require_for: vec!["major".to_string(), "replace".to_string()],
            webhook_url: None,
            timeout_ms: DEFAULT_APPROVAL_TIMEOUT_MS,
        }
    }
}

impl ApprovalPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn requires(&self, kind: &str) -> bool {
        self.require_for.iter().any(|k| k.eq_ignore_ascii_case(kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Receive every event as a JSON POST.
    pub webhooks: Vec<String>,
    pub approval: ApprovalPolicy,
    pub platform_url: Option<String>,
    pub api_key: Option<String>,
    pub ancient_months: u32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            approval: ApprovalPolicy::default(),
            platform_url: None,
            api_key: None,
            ancient_months: DEFAULT_ANCIENT_MONTHS,
        }
    }
}

impl ProjectConfig {
    /// Loads `<root>/lineage.config.json`. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Self::parse(&text).map_err(|source| ConfigError::Malformed { path, source })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let stripped = strip_json_comments(text);
        if stripped.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&stripped)
    }
}

/// Removes `//` line comments and `/* */` block comments outside string literals.
pub fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        let lookahead = chars.peek().copied();
        match (c, lookahead) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
