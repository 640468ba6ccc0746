//! Report synthesis.
//!
//! [`build_report`] attaches [`RiskSignals`] to every node and orders the
//! entries deterministically (ancient first, then depth, name and version), so
//! two runs over the same inputs produce identical reports that can be diffed
//! with [`diff_reports`].

pub mod chains;
pub mod onepager;
pub mod render;
pub mod suggest;
pub mod tree;

pub use chains::something_old_chains;
pub use onepager::{one_pager, render_full, RiskLevel};
pub use render::{to_csv, to_json, to_markdown, RenderError};
pub use suggest::{ReplacementCatalog, Suggestion};
pub use tree::{enrich_with_tree, TransitiveTree};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::audit::AuditSummary;
use crate::detect::Detector;
use crate::model::{DependencyNode, Ecosystem, MetadataMap, RegistryMetadata, RiskSignals};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub node: DependencyNode,
    pub metadata: RegistryMetadata,
    pub signals: RiskSignals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub direct: usize,
    pub transitive: usize,
    pub ancient: usize,
    pub deprecated: usize,
    pub fork_hint: usize,
    pub old_python: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// `None` for a report over zero nodes.
    pub ecosystem: Option<Ecosystem>,
    pub summary: Summary,
    pub entries: Vec<ReportEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditSummary>,
}

impl Report {
    pub fn with_audit(mut self, audit: Option<AuditSummary>) -> Self {
        self.audit = audit;
        self
    }

    /// Entries with at least one risk signal, in report order.
    pub fn problematic(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.signals.is_problematic())
    }

    pub fn entry(&self, key: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.node.key == key)
    }

    /// The dependency nodes in report order.
    pub fn nodes(&self) -> Vec<DependencyNode> {
        self.entries.iter().map(|e| e.node.clone()).collect()
    }
}

pub fn build_report(nodes: &[DependencyNode], metadata: &MetadataMap, detector: &Detector) -> Report {
    let mut entries: Vec<ReportEntry> = nodes
        .iter()
        .map(|node| {
            let meta = metadata.get(&node.key).cloned().unwrap_or_default();
            let signals = detector.analyze(node, &meta);
            ReportEntry {
                node: node.clone(),
                metadata: meta,
                signals,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.signals
            .ancient
            .cmp(&a.signals.ancient)
            .then(a.node.depth.cmp(&b.node.depth))
            .then_with(|| a.node.name.cmp(&b.node.name))
            .then_with(|| a.node.version.cmp(&b.node.version))
    });

    let mut summary = Summary {
        total: entries.len(),
        ..Default::default()
    };
    for entry in &entries {
        if entry.node.is_transitive() {
            summary.transitive += 1;
        } else {
            summary.direct += 1;
        }
        summary.ancient += entry.signals.ancient as usize;
        summary.deprecated += entry.signals.deprecated as usize;
        summary.fork_hint += entry.signals.fork_hint as usize;
        summary.old_python += entry.signals.old_python as usize;
    }

    Report {
        ecosystem: nodes.first().map(|n| n.ecosystem),
        summary,
        entries,
        audit: None,
    }
}

/// Package-level changes between two reports of the same project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportDiff {
    /// Names that are ancient now but were not before.
    pub newly_ancient: Vec<String>,
    pub newly_deprecated: Vec<String>,
    /// Names that were problematic before and are not anymore (or are gone).
    pub resolved: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReportDiff {
    pub fn is_empty(&self) -> bool {
        self.newly_ancient.is_empty()
            && self.newly_deprecated.is_empty()
            && self.resolved.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

/// Compares by package name, so an upgrade to a clean version counts as resolved.
pub fn diff_reports(old: &Report, new: &Report) -> ReportDiff {
    fn names(report: &Report, pick: impl Fn(&RiskSignals) -> bool) -> BTreeSet<String> {
        report
            .entries
            .iter()
            .filter(|e| pick(&e.signals))
            .map(|e| e.node.name.clone())
            .collect()
    }
    let diff = |a: BTreeSet<String>, b: BTreeSet<String>| -> Vec<String> { a.difference(&b).cloned().collect() };

    ReportDiff {
        newly_ancient: diff(names(new, |s| s.ancient), names(old, |s| s.ancient)),
        newly_deprecated: diff(names(new, |s| s.deprecated), names(old, |s| s.deprecated)),
        resolved: diff(
            names(old, RiskSignals::is_problematic),
            names(new, RiskSignals::is_problematic),
        ),
        added: diff(names(new, |_| true), names(old, |_| true)),
        removed: diff(names(old, |_| true), names(new, |_| true)),
    }
}
