//! Security-audit collaborator.
//!
//! Runs the ecosystem's own vulnerability scanner (`npm audit`, `pip-audit`) and
//! maps its JSON into an [`AuditSummary`]. A missing tool or unparseable output
//! is a silent `None`; findings are never invented.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::model::Ecosystem;
use crate::process::run_command;

pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub critical: u32,
    pub high: u32,
    pub moderate: u32,
    pub low: u32,
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub package: String,
    /// `critical`, `high`, `moderate`, `low`, or `unknown` when the scanner does not rate.
    pub severity: String,
    pub title: String,
    pub id: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub fix_versions: Vec<String>,
}

impl AuditSummary {
    pub fn total(&self) -> usize {
        self.vulnerabilities.len()
    }

    fn bump(&mut self, severity: &str) {
        match severity {
            "critical" => self.critical += 1,
            "high" => self.high += 1,
            "moderate" | "medium" => self.moderate += 1,
            "low" => self.low += 1,
            _ => {}
        }
    }
}

fn count(value: Option<&Value>) -> Option<u32> {
    value.and_then(Value::as_u64).map(|n| n as u32)
}

/// Maps `npm audit --json` (npm 7+) output.
pub fn parse_npm_audit(json: &str) -> Option<AuditSummary> {
    let doc: Value = serde_json::from_str(json).ok()?;
    let vulns = doc.get("vulnerabilities")?.as_object()?;
    let mut summary = AuditSummary::default();

    for (name, entry) in vulns {
        let severity = entry
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        // `via` mixes advisory objects with names of vulnerable dependencies.
        let advisory = entry
            .get("via")
            .and_then(Value::as_array)
            .and_then(|via| via.iter().find(|v| v.is_object()));
        let title = advisory
            .and_then(|a| a.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("vulnerable through {}", name));
        summary.bump(&severity);
        summary.vulnerabilities.push(Vulnerability {
            package: name.clone(),
            severity,
            title,
            id: advisory
                .and_then(|a| a.get("source"))
                .map(|s| s.to_string().trim_matches('"').to_string()),
            url: advisory
                .and_then(|a| a.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string),
            fix_versions: Vec::new(),
        });
    }

    // Prefer npm's own tallies when present.
    if let Some(meta) = doc.pointer("/metadata/vulnerabilities") {
        summary.critical = count(meta.get("critical")).unwrap_or(summary.critical);
        summary.high = count(meta.get("high")).unwrap_or(summary.high);
        summary.moderate = count(meta.get("moderate")).unwrap_or(summary.moderate);
        summary.low = count(meta.get("low")).unwrap_or(summary.low);
    }
    Some(summary)
}

/// Maps `pip-audit -f json` output (object form or the older bare list).
/// pip-audit does not rate severity, so findings are listed as `unknown`.
pub fn parse_pip_audit(json: &str) -> Option<AuditSummary> {
    let doc: Value = serde_json::from_str(json).ok()?;
    let deps = match &doc {
        Value::Array(items) => items,
        Value::Object(obj) => obj.get("dependencies")?.as_array()?,
        _ => return None,
    };

    let mut summary = AuditSummary::default();
    for dep in deps {
        let package = dep.get("name").and_then(Value::as_str).unwrap_or("?");
        for vuln in dep.get("vulns").and_then(Value::as_array).into_iter().flatten() {
            let id = vuln.get("id").and_then(Value::as_str).map(str::to_string);
            let title = vuln
                .get("description")
                .and_then(Value::as_str)
                .and_then(|d| d.lines().next())
                .map(str::to_string)
                .or_else(|| id.clone())
                .unwrap_or_else(|| "unnamed advisory".to_string());
            summary.vulnerabilities.push(Vulnerability {
                package: package.to_string(),
                severity: "unknown".to_string(),
                title,
                id,
                url: None,
                fix_versions: vuln
                    .get("fix_versions")
                    .and_then(Value::as_array)
                    .map(|v| v.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
            });
        }
    }
    Some(summary)
}

/// Runs the scanner for `ecosystem` in `root`. Go has no JSON-summarised
/// scanner wired in and always yields `None`.
pub async fn collect_audit(root: &Path, ecosystem: Ecosystem, limit: Duration) -> Option<AuditSummary> {
    let (program, args, parse): (&str, &[&str], fn(&str) -> Option<AuditSummary>) = match ecosystem {
        Ecosystem::Npm => ("npm", &["audit", "--json"], parse_npm_audit),
        Ecosystem::Pip => ("pip-audit", &["-f", "json"], parse_pip_audit),
        Ecosystem::Go => return None,
    };

    let outcome = match run_command(program, args, root, limit).await {
        Ok(outcome) => outcome,
        Err(e) => {
            debug!(program, error = %e, "Audit tool unavailable");
            return None;
        }
    };
    if outcome.timed_out {
        return None;
    }
    // Scanners exit non-zero when they find something; the JSON is still valid.
    let summary = parse(&outcome.stdout)?;
    info!(program, findings = summary.total(), "Collected security audit");
    Some(summary)
}
