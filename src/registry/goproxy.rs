//! Go module proxy `.info` lookups.

use serde_json::Value;

use super::document::{non_empty, parse_timestamp, PackageDocument};

pub const DEFAULT_PROXY: &str = "https://proxy.golang.org";

/// First usable entry of a `GOPROXY`-style list. `off` and `direct` disable
/// proxy lookups; an unset or empty value means the public proxy.
pub fn proxy_from_env(value: Option<&str>) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let Some(value) = value else {
        return Some(DEFAULT_PROXY.to_string());
    };
    let first = value.split([',', '|']).map(str::trim).next().unwrap_or("");
    match first {
        "" => Some(DEFAULT_PROXY.to_string()),
        "off" | "direct" => None,
        url => Some(url.trim_end_matches('/').to_string()),
    }
}

/// Module proxy case encoding: uppercase letters become `!` + lowercase.
pub fn escape_module_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn info_url(base: &str, module: &str, version: &str) -> String {
    format!(
        "{}/{}/@v/{}.info",
        base.trim_end_matches('/'),
        escape_module_path(module),
        escape_module_path(version)
    )
}

pub fn latest_url(base: &str, module: &str) -> String {
    format!("{}/{}/@latest", base.trim_end_matches('/'), escape_module_path(module))
}

/// Folds one `.info` response (`{"Version": ..., "Time": ...}`) into a document.
pub fn apply_info(doc: &mut PackageDocument, info: &Value, is_latest: bool) {
    let Some(version) = non_empty(info.get("Version")) else {
        return;
    };
    if let Some(ts) = info.get("Time").and_then(Value::as_str).and_then(parse_timestamp) {
        doc.publish_times.insert(version.clone(), ts);
    }
    if is_latest {
        doc.latest_version = Some(version);
    }
}
