//! Executive summary and the full "deep" report.

use serde::Serialize;
use std::fmt::{self, Write as _};

use super::chains::something_old_chains;
use super::render::{md_cell, to_markdown};
use super::suggest::ReplacementCatalog;
use super::{Report, ReportEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn assess(report: &Report) -> Self {
        let audit = report.audit.as_ref();
        if audit.map_or(false, |a| a.critical > 0) {
            return RiskLevel::Critical;
        }
        let s = &report.summary;
        let deprecated_direct = report
            .entries
            .iter()
            .any(|e| e.signals.deprecated && e.node.is_direct());
        let ancient_share = if s.total == 0 { 0 } else { s.ancient * 100 / s.total };
        if audit.map_or(false, |a| a.high > 0) || deprecated_direct || ancient_share >= 25 {
            return RiskLevel::High;
        }
        if report.problematic().next().is_some() || audit.map_or(false, |a| a.total() > 0) {
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        })
    }
}

/// The single most useful next action.
pub fn first_fix(report: &Report, catalog: &ReplacementCatalog) -> Option<String> {
    let problematic: Vec<&ReportEntry> = report.problematic().collect();
    let direct_first = || {
        problematic
            .iter()
            .copied()
            .filter(|e| e.node.is_direct())
            .chain(problematic.iter().copied().filter(|e| e.node.is_transitive()))
    };

    if let Some((entry, suggestion)) = direct_first()
        .find_map(|e| catalog.get(e.node.ecosystem, &e.node.name).map(|s| (e, s)))
    {
        return Some(format!(
            "Replace {} with {} ({})",
            entry.node.name, suggestion.replacement, suggestion.reason
        ));
    }
    if let Some(entry) = direct_first().find(|e| e.signals.deprecated) {
        return Some(format!("Replace or remove {} (deprecated)", entry.node.name));
    }
    direct_first()
        .find_map(|e| {
            let latest = e.metadata.latest_version.as_deref()?;
            (latest != e.node.version).then(|| format!("Upgrade {} from {} to {}", e.node.name, e.node.version, latest))
        })
        .or_else(|| {
            problematic
                .first()
                .map(|e| format!("Review {}: {}", e.node.name, e.signals.reasons.join("; ")))
        })
}

pub fn one_pager(report: &Report, catalog: &ReplacementCatalog) -> String {
    let level = RiskLevel::assess(report);
    let s = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "# Dependency health: {}\n", level);
    let _ = writeln!(
        out,
        "{} packages ({} direct, {} transitive): {} ancient, {} deprecated, {} possible forks, {} on end-of-life Python.",
        s.total, s.direct, s.transitive, s.ancient, s.deprecated, s.fork_hint, s.old_python
    );
    if let Some(audit) = &report.audit {
        let _ = writeln!(
            out,
            "Security audit: {} critical, {} high, {} moderate, {} low.",
            audit.critical, audit.high, audit.moderate, audit.low
        );
    }
    out.push('\n');

    let fix = first_fix(report, catalog).unwrap_or_else(|| "Nothing to fix right now.".to_string());
    let _ = writeln!(out, "**First fix:** {}\n", fix);

    let bottom = match level {
        RiskLevel::Critical => "Critical vulnerabilities are present; patch before the next release.",
        RiskLevel::High => "Several dependencies are abandoned or deprecated; schedule remediation this cycle.",
        RiskLevel::Medium => "A few dependencies need attention; fold upgrades into regular maintenance.",
        RiskLevel::Low => "Dependencies look healthy.",
    };
    let _ = writeln!(out, "**Bottom line:** {}", bottom);
    out
}

/// One-pager, full table, something-old chains and the audit section.
pub fn render_full(report: &Report, catalog: &ReplacementCatalog) -> String {
    let mut out = one_pager(report, catalog);
    out.push('\n');
    out.push_str(&to_markdown(report));

    let chains = something_old_chains(report);
    if !chains.is_empty() {
        let _ = writeln!(out, "\n## Something old in the tree\n");
        for chain in &chains {
            let _ = writeln!(out, "- {}", chain);
        }
    }

    if let Some(audit) = &report.audit {
        let _ = writeln!(out, "\n## Security audit\n");
        if audit.vulnerabilities.is_empty() {
            out.push_str("No known vulnerabilities.\n");
        } else {
            let _ = writeln!(out, "| Package | Severity | Advisory |");
            let _ = writeln!(out, "|---|---|---|");
            for vuln in &audit.vulnerabilities {
                let advisory = match &vuln.url {
                    Some(url) => format!("[{}]({})", md_cell(&vuln.title), url),
                    None => md_cell(&vuln.title),
                };
                let _ = writeln!(out, "| {} | {} | {} |", md_cell(&vuln.package), vuln.severity, advisory);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditSummary, Vulnerability};
    use crate::detect::{Detector, DetectorConfig};
    use crate::model::{DependencyNode, Ecosystem, MetadataMap, RegistryMetadata};
    use crate::report::build_report;
    use chrono::{Months, TimeZone, Utc};

    fn as_of() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    }

    fn report_with(nodes: Vec<DependencyNode>, meta: MetadataMap) -> Report {
        build_report(&nodes, &meta, &Detector::new(DetectorConfig::new(as_of())))
    }

    #[test]
    fn test_levels() {
        let clean = report_with(vec![DependencyNode::new("a", "1", Ecosystem::Npm, 1)], MetadataMap::new());
        assert_eq!(RiskLevel::assess(&clean), RiskLevel::Low);

        let critical = clean.clone().with_audit(Some(AuditSummary {
            critical: 1,
            ..Default::default()
        }));
        assert_eq!(RiskLevel::assess(&critical), RiskLevel::Critical);

        let mut dep = DependencyNode::new("request", "2.88.2", Ecosystem::Npm, 1);
        dep.declared_deprecated = Some("deprecated".into());
        let high = report_with(vec![dep], MetadataMap::new());
        assert_eq!(RiskLevel::assess(&high), RiskLevel::High);
    }

    #[test]
    fn test_one_pager_first_fix_prefers_catalog() {
        let mut meta = MetadataMap::new();
        meta.insert(
            "moment@2.10.0".into(),
            RegistryMetadata {
                last_publish: as_of().checked_sub_months(Months::new(30)),
                latest_version: Some("2.30.1".into()),
                ..Default::default()
            },
        );
        let report = report_with(vec![DependencyNode::new("moment", "2.10.0", Ecosystem::Npm, 1)], meta);
        let page = one_pager(&report, &ReplacementCatalog::builtin());
        assert!(page.starts_with("# Dependency health: HIGH"));
        assert!(page.contains("**First fix:** Replace moment with dayjs"));

        let page = one_pager(&report, &ReplacementCatalog::new());
        assert!(page.contains("**First fix:** Upgrade moment from 2.10.0 to 2.30.1"));
    }

    #[test]
    fn test_full_report_sections() {
        let direct = DependencyNode::new("express", "4.0.0", Ecosystem::Npm, 1).with_parent("app@1.0.0");
        let old = DependencyNode::new("qs", "0.1.0", Ecosystem::Npm, 2).with_parent("express@4.0.0");
        let mut meta = MetadataMap::new();
        meta.insert(
            "qs@0.1.0".into(),
            RegistryMetadata {
                last_publish: as_of().checked_sub_months(Months::new(60)),
                ..Default::default()
            },
        );
        let report = report_with(vec![direct, old], meta).with_audit(Some(AuditSummary {
            high: 1,
            vulnerabilities: vec![Vulnerability {
                package: "qs".into(),
                severity: "high".into(),
                title: "Prototype pollution".into(),
                id: None,
                url: Some("https://example.test/a".into()),
                fix_versions: vec![],
            }],
            ..Default::default()
        }));

        let full = render_full(&report, &ReplacementCatalog::builtin());
        assert!(full.contains("## Something old in the tree\n\n- express@4.0.0 > qs@0.1.0"));
        assert!(full.contains("| qs | high | [Prototype pollution](https://example.test/a) |"));

        let without_audit = render_full(&report.clone().with_audit(None), &ReplacementCatalog::builtin());
        assert!(!without_audit.contains("## Security audit"));
    }
}
