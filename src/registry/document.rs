//! Reduced, ecosystem-neutral registry document.
//!
//! This is what the cache stores per `(ecosystem, name)`; [`RegistryMetadata`]
//! for a concrete version is derived from it on every read.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::RegistryMetadata;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDocument {
    pub latest_version: Option<String>,
    pub license: Option<String>,
    /// Package-level deprecation (deprecated latest release, inactive classifier).
    pub deprecated: Option<String>,
    pub requires_python: Option<String>,
    #[serde(default)]
    pub publish_times: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub deprecations: BTreeMap<String, String>,
    #[serde(default)]
    pub requires_python_by_version: BTreeMap<String, String>,
}

impl PackageDocument {
    pub fn is_empty(&self) -> bool {
        self.latest_version.is_none()
            && self.license.is_none()
            && self.deprecated.is_none()
            && self.requires_python.is_none()
            && self.publish_times.is_empty()
    }

    /// Metadata for `version`, falling back to the latest release where the
    /// version itself is unknown (e.g. unpinned `*` requirements).
    pub fn metadata_for(&self, version: &str) -> RegistryMetadata {
        let latest_time = self
            .latest_version
            .as_ref()
            .and_then(|v| self.publish_times.get(v));
        RegistryMetadata {
            last_publish: self.publish_times.get(version).or(latest_time).copied(),
            latest_version: self.latest_version.clone(),
            license: self.license.clone(),
            deprecated: self
                .deprecations
                .get(version)
                .cloned()
                .or_else(|| self.deprecated.clone()),
            requires_python: self
                .requires_python_by_version
                .get(version)
                .cloned()
                .or_else(|| self.requires_python.clone()),
        }
    }

    /// Overlays fields from `other`, keeping existing per-version entries.
    pub fn merge(&mut self, other: PackageDocument) {
        if other.latest_version.is_some() {
            self.latest_version = other.latest_version;
        }
        self.license = other.license.or(self.license.take());
        self.deprecated = other.deprecated.or(self.deprecated.take());
        self.requires_python = other.requires_python.or(self.requires_python.take());
        self.publish_times.extend(other.publish_times);
        self.deprecations.extend(other.deprecations);
        self.requires_python_by_version
            .extend(other.requires_python_by_version);
    }
}

/// Parses registry timestamps: RFC 3339, or naive `YYYY-MM-DDTHH:MM:SS[.f]` as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub(crate) fn non_empty(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
