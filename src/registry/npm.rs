//! npm registry package documents.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;

use super::document::{non_empty, parse_timestamp, PackageDocument};

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Scoped names keep their `@` but encode the `/` separator.
const NAME_ENCODE: &AsciiSet = &CONTROLS.add(b'/').add(b' ').add(b'%');

pub fn document_url(base: &str, name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        utf8_percent_encode(name, NAME_ENCODE)
    )
}

fn license_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => non_empty(obj.get("type")),
        _ => None,
    }
}

/// Reduces a full npm package document (`GET /<name>`).
pub fn parse_document(doc: &Value) -> PackageDocument {
    let mut out = PackageDocument {
        latest_version: non_empty(doc.pointer("/dist-tags/latest")),
        ..Default::default()
    };

    if let Some(times) = doc.get("time").and_then(Value::as_object) {
        for (version, raw) in times {
            if version == "created" || version == "modified" {
                continue;
            }
            if let Some(ts) = raw.as_str().and_then(parse_timestamp) {
                out.publish_times.insert(version.clone(), ts);
            }
        }
    }

    let versions = doc.get("versions").and_then(Value::as_object);
    if let Some(versions) = versions {
        for (version, meta) in versions {
            if let Some(message) = non_empty(meta.get("deprecated")) {
                out.deprecations.insert(version.clone(), message);
            }
        }
    }

    let latest_meta = out
        .latest_version
        .as_ref()
        .and_then(|v| versions.and_then(|all| all.get(v)));
    out.license = license_of(latest_meta.and_then(|m| m.get("license")))
        .or_else(|| license_of(doc.get("license")));
    out.deprecated = out
        .latest_version
        .as_ref()
        .and_then(|v| out.deprecations.get(v))
        .cloned();
    out
}
