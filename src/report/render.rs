//! JSON, Markdown and CSV renderings of a [`Report`].

use std::fmt::Write as _;
use thiserror::Error;

use super::suggest::ReplacementCatalog;
use super::Report;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Rendered output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn to_json(report: &Report) -> Result<String, RenderError> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub(crate) fn md_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Summary plus a table of problematic packages and their reasons.
pub fn to_markdown(report: &Report) -> String {
    let s = &report.summary;
    let mut out = String::new();
    let title = match report.ecosystem {
        Some(eco) => format!("# Dependency report ({})\n\n", eco),
        None => "# Dependency report\n\n".to_string(),
    };
    out.push_str(&title);

    let _ = writeln!(out, "| Metric | Count |");
    let _ = writeln!(out, "|---|---|");
    for (label, value) in [
        ("Total", s.total),
        ("Direct", s.direct),
        ("Transitive", s.transitive),
        ("Ancient", s.ancient),
        ("Deprecated", s.deprecated),
        ("Possible forks", s.fork_hint),
        ("Old Python", s.old_python),
    ] {
        let _ = writeln!(out, "| {} | {} |", label, value);
    }
    out.push('\n');

    let problematic: Vec<_> = report.problematic().collect();
    if problematic.is_empty() {
        out.push_str("No problematic dependencies found.\n");
        return out;
    }

    let _ = writeln!(out, "## Problematic packages\n");
    let _ = writeln!(out, "| Package | Version | Depth | Latest | Reasons |");
    let _ = writeln!(out, "|---|---|---|---|---|");
    for entry in problematic {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            md_cell(&entry.node.name),
            md_cell(&entry.node.version),
            entry.node.depth,
            md_cell(entry.metadata.latest_version.as_deref().unwrap_or("?")),
            md_cell(&entry.signals.reasons.join("; ")),
        );
    }
    out
}

/// One row per entry. With a catalog, `suggested_replacement` and
/// `suggestion_reason` columns are appended.
pub fn to_csv(report: &Report, suggestions: Option<&ReplacementCatalog>) -> Result<String, RenderError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![
        "name",
        "version",
        "ecosystem",
        "depth",
        "ancient",
        "deprecated",
        "fork_hint",
        "old_python",
        "months_since_publish",
        "latest_version",
        "license",
        "reasons",
    ];
    if suggestions.is_some() {
        header.extend(["suggested_replacement", "suggestion_reason"]);
    }
    writer.write_record(&header)?;

    for entry in &report.entries {
        let node = &entry.node;
        let signals = &entry.signals;
        let mut row = vec![
            node.name.clone(),
            node.version.clone(),
            node.ecosystem.to_string(),
            node.depth.to_string(),
            signals.ancient.to_string(),
            signals.deprecated.to_string(),
            signals.fork_hint.to_string(),
            signals.old_python.to_string(),
            signals
                .months_since_publish
                .map(|m| m.to_string())
                .unwrap_or_default(),
            entry.metadata.latest_version.clone().unwrap_or_default(),
            entry.metadata.license.clone().unwrap_or_default(),
            signals.reasons.join("; "),
        ];
        if let Some(catalog) = suggestions {
            let suggestion = catalog.get(node.ecosystem, &node.name);
            row.push(suggestion.map(|s| s.replacement.clone()).unwrap_or_default());
            row.push(suggestion.map(|s| s.reason.clone()).unwrap_or_default());
        }
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| RenderError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}
