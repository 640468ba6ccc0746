//! Risk and staleness heuristics.
//!
//! [`Detector::analyze`] is pure and total: the same node, metadata and
//! [`DetectorConfig`] (including its `as_of` instant) always produce the same
//! [`RiskSignals`]. Missing metadata never counts as ancient.

use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::model::{DependencyNode, Ecosystem, RegistryMetadata, RiskSignals};

pub const DEFAULT_ANCIENT_MONTHS: u32 = 24;
/// Oldest CPython minor still receiving upstream support.
pub const DEFAULT_MIN_PYTHON: (u32, u32) = (3, 9);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    pub ancient_months: u32,
    /// Reference instant for "months since publish".
    pub as_of: DateTime<Utc>,
    pub min_python: (u32, u32),
}

impl DetectorConfig {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            ancient_months: DEFAULT_ANCIENT_MONTHS,
            as_of,
            min_python: DEFAULT_MIN_PYTHON,
        }
    }

    pub fn with_ancient_months(mut self, months: u32) -> Self {
        self.ancient_months = months;
        self
    }

    pub fn with_min_python(mut self, major: u32, minor: u32) -> Self {
        self.min_python = (major, minor);
        self
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Pluggable fork detection. Results are advisory only.
pub trait ForkHeuristic: Send + Sync {
    /// Returns a human-readable reason when the package looks like an unofficial fork.
    fn fork_hint(&self, node: &DependencyNode, metadata: &RegistryMetadata) -> Option<String>;
}

static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)[-_.](fork|forked|patched|maintained|continued|revived|community|resurrected)$",
        r"(?i)^(fork|forked)[-_.]",
        r"(?i)-ng$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static VERSION_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)[-+.](fork|forked|patched|patch)\b").ok());

/// Name and version pattern matching.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternForkHeuristic;

impl ForkHeuristic for PatternForkHeuristic {
    fn fork_hint(&self, node: &DependencyNode, _metadata: &RegistryMetadata) -> Option<String> {
        // Scoped npm packages are judged by their bare name.
        let bare = node.name.rsplit('/').next().unwrap_or(&node.name);
        if let Some(m) = NAME_PATTERNS.iter().find_map(|re| re.find(bare)) {
            return Some(format!(
                "name suffix '{}' suggests an unofficial fork",
                m.as_str().trim_start_matches(['-', '_', '.'])
            ));
        }
        let version_re = VERSION_PATTERN.as_ref()?;
        version_re
            .is_match(&node.version)
            .then(|| format!("version '{}' carries a fork/patch tag", node.version))
    }
}

#[derive(Clone)]
pub struct Detector {
    config: DetectorConfig,
    fork: Arc<dyn ForkHeuristic>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            fork: Arc::new(PatternForkHeuristic),
        }
    }

    pub fn with_fork_heuristic(mut self, heuristic: Arc<dyn ForkHeuristic>) -> Self {
        self.fork = heuristic;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn analyze(&self, node: &DependencyNode, metadata: &RegistryMetadata) -> RiskSignals {
        let mut signals = RiskSignals::default();

        if let Some(published) = metadata.last_publish {
            let months = months_between(published, self.config.as_of);
            signals.months_since_publish = Some(months);
            if months >= self.config.ancient_months {
                signals.ancient = true;
                signals
                    .reasons
                    .push(format!("no publish in {} months", months));
            }
        }

        let deprecation =
            non_blank(node.declared_deprecated.as_deref()).or_else(|| non_blank(metadata.deprecated.as_deref()));
        if let Some(message) = deprecation {
            signals.deprecated = true;
            signals.reasons.push(format!("deprecated: {}", message));
        }

        if let Some(reason) = self.fork.fork_hint(node, metadata) {
            signals.fork_hint = true;
            signals.reasons.push(format!("possible fork: {}", reason));
        }

        if node.ecosystem == Ecosystem::Pip {
            if let Some(reason) = metadata
                .requires_python
                .as_deref()
                .and_then(|spec| old_python(spec, self.config.min_python))
            {
                signals.old_python = true;
                signals.reasons.push(reason);
            }
        }

        signals
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector").field("config", &self.config).finish()
    }
}

/// Convenience wrapper using the default fork heuristic.
pub fn analyze_package(
    node: &DependencyNode,
    metadata: &RegistryMetadata,
    config: &DetectorConfig,
) -> RiskSignals {
    Detector::new(config.clone()).analyze(node, metadata)
}

fn non_blank(message: Option<&str>) -> Option<&str> {
    message.map(str::trim).filter(|m| !m.is_empty())
}

/// Whole calendar months from `from` to `to` (0 when `from` is in the future).
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    if from >= to {
        return 0;
    }
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if (to.day(), to.time()) < (from.day(), from.time()) {
        months -= 1;
    }
    months.max(0) as u32
}

fn parse_py_version(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().trim_end_matches(".*").split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts
        .next()
        .and_then(|m| m.trim().trim_end_matches('*').parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}

/// Flags `requires_python` constraints that exclude every supported
/// interpreter, or that still admit Python 2 as their floor.
pub fn old_python(spec: &str, min_supported: (u32, u32)) -> Option<String> {
    for clause in spec.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let (op, version) = ["===", "==", "~=", ">=", "<=", "!=", ">", "<"]
            .iter()
            .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest)))?;
        let Some(v) = parse_py_version(version) else {
            continue;
        };
        let eol = match op {
            "<" => v <= min_supported,
            "<=" | "==" | "===" => v < min_supported,
            ">=" | ">" | "~=" => v.0 < 3,
            _ => false,
        };
        if eol {
            return Some(format!(
                "requires_python '{}' targets end-of-life Python (oldest supported is {}.{})",
                spec.trim(),
                min_supported.0,
                min_supported.1
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Months, TimeZone};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    fn meta_published(months_ago: u32) -> RegistryMetadata {
        RegistryMetadata {
            last_publish: as_of().checked_sub_months(Months::new(months_ago)),
            ..Default::default()
        }
    }

    #[test]
    fn test_ancient_after_threshold() {
        let node = DependencyNode::new("sixpkg", "1.9.0", Ecosystem::Pip, 1);
        let signals = analyze_package(&node, &meta_published(40), &DetectorConfig::new(as_of()));
        assert!(signals.ancient);
        assert_eq!(signals.months_since_publish, Some(40));
        assert!(signals.reasons[0].contains("no publish in 40 months"));

        let fresh = analyze_package(&node, &meta_published(23), &DetectorConfig::new(as_of()));
        assert!(!fresh.ancient);
        assert!(fresh.reasons.is_empty());
    }

    #[test]
    fn test_missing_metadata_is_unknown_not_ancient() {
        let node = DependencyNode::new("ghost", "1.0.0", Ecosystem::Npm, 1);
        let signals = analyze_package(&node, &RegistryMetadata::default(), &DetectorConfig::new(as_of()));
        assert!(!signals.ancient);
        assert_eq!(signals.months_since_publish, None);
    }

    #[test]
    fn test_deprecated_from_lockfile_or_registry() {
        let mut node = DependencyNode::new("request", "2.88.2", Ecosystem::Npm, 1);
        node.declared_deprecated = Some("request has been deprecated".into());
        let signals = analyze_package(&node, &RegistryMetadata::default(), &DetectorConfig::new(as_of()));
        assert!(signals.deprecated);

        let plain = DependencyNode::new("x", "1.0.0", Ecosystem::Npm, 1);
        let meta = RegistryMetadata {
            deprecated: Some("  ".into()),
            ..Default::default()
        };
        assert!(!analyze_package(&plain, &meta, &DetectorConfig::new(as_of())).deprecated);

        // A blank lockfile message does not mask the registry's.
        let mut blank = DependencyNode::new("y", "0.3.0", Ecosystem::Npm, 2);
        blank.declared_deprecated = Some(String::new());
        let meta = RegistryMetadata {
            deprecated: Some("use z".into()),
            ..Default::default()
        };
        let signals = analyze_package(&blank, &meta, &DetectorConfig::new(as_of()));
        assert!(signals.deprecated);
        assert!(signals.reasons.iter().any(|r| r == "deprecated: use z"));
    }

    #[test]
    fn test_fork_hint_patterns() {
        let config = DetectorConfig::new(as_of());
        let forked = DependencyNode::new("@someone/left-pad-maintained", "1.0.0", Ecosystem::Npm, 2);
        assert!(analyze_package(&forked, &RegistryMetadata::default(), &config).fork_hint);

        let tagged = DependencyNode::new("lodash", "4.17.21-patched.1", Ecosystem::Npm, 2);
        assert!(analyze_package(&tagged, &RegistryMetadata::default(), &config).fork_hint);

        let normal = DependencyNode::new("express", "4.18.2", Ecosystem::Npm, 1);
        assert!(!analyze_package(&normal, &RegistryMetadata::default(), &config).fork_hint);
    }

    #[test]
    fn test_custom_fork_heuristic() {
        struct Always;
        impl ForkHeuristic for Always {
            fn fork_hint(&self, _: &DependencyNode, _: &RegistryMetadata) -> Option<String> {
                Some("listed internally".into())
            }
        }
        let detector = Detector::new(DetectorConfig::new(as_of())).with_fork_heuristic(Arc::new(Always));
        let node = DependencyNode::new("x", "1", Ecosystem::Go, 1);
        let signals = detector.analyze(&node, &RegistryMetadata::default());
        assert_eq!(signals.reasons, vec!["possible fork: listed internally"]);
    }

    #[test]
    fn test_old_python() {
        let min = DEFAULT_MIN_PYTHON;
        assert!(old_python(">=2.7, !=3.0.*", min).is_some());
        assert!(old_python("<3.8", min).is_some());
        assert!(old_python("==3.6.*", min).is_some());
        assert!(old_python(">=3.8", min).is_none());
        assert!(old_python(">=3.9,<4", min).is_none());
        assert!(old_python("garbage", min).is_none());
    }

    #[test]
    fn test_old_python_only_for_pip() {
        let meta = RegistryMetadata {
            requires_python: Some("<3".into()),
            ..Default::default()
        };
        let npm = DependencyNode::new("x", "1", Ecosystem::Npm, 1);
        assert!(!analyze_package(&npm, &meta, &DetectorConfig::new(as_of())).old_python);
        let pip = DependencyNode::new("x", "1", Ecosystem::Pip, 1);
        assert!(analyze_package(&pip, &meta, &DetectorConfig::new(as_of())).old_python);
    }

    #[test]
    fn test_months_between() {
        let to = as_of();
        assert_eq!(months_between(to, to), 0);
        let from = Utc.with_ymd_and_hms(2026, 9, 2, 0, 0, 0).unwrap();
        assert_eq!(months_between(from, to), 0);
        let from = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        assert_eq!(months_between(from, to), 24);
    }
}
