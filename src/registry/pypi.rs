//! PyPI JSON API documents.

use serde_json::Value;

use super::document::{non_empty, parse_timestamp, PackageDocument};

pub const DEFAULT_INDEX: &str = "https://pypi.org/pypi";
pub const INACTIVE_CLASSIFIER: &str = "Development Status :: 7 - Inactive";

pub fn document_url(base: &str, name: &str) -> String {
    format!("{}/{}/json", base.trim_end_matches('/'), name.trim())
}

/// Licenses are sometimes the full license text; keep the first line, bounded.
fn short_license(raw: &str) -> Option<String> {
    let first = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(first.chars().take(80).collect())
}

fn classifier_license(classifiers: &[Value]) -> Option<String> {
    classifiers
        .iter()
        .filter_map(Value::as_str)
        .find_map(|c| c.strip_prefix("License :: "))
        .map(|c| c.rsplit(" :: ").next().unwrap_or(c).to_string())
}

/// Earliest upload among a release's files, plus the release-level yank and
/// requires_python facts.
fn release_facts(files: &[Value]) -> (Option<chrono::DateTime<chrono::Utc>>, Option<String>, Option<String>) {
    let uploaded = files
        .iter()
        .filter_map(|f| {
            f.get("upload_time_iso_8601")
                .or_else(|| f.get("upload_time"))
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
        })
        .min();
    let all_yanked = !files.is_empty()
        && files
            .iter()
            .all(|f| f.get("yanked").and_then(Value::as_bool).unwrap_or(false));
    let yanked = all_yanked.then(|| {
        let reason = files.iter().find_map(|f| non_empty(f.get("yanked_reason")));
        match reason {
            Some(r) => format!("yanked: {}", r),
            None => "yanked".to_string(),
        }
    });
    let requires_python = files.iter().find_map(|f| non_empty(f.get("requires_python")));
    (uploaded, yanked, requires_python)
}

/// Reduces a PyPI `GET /pypi/<name>/json` document.
pub fn parse_document(doc: &Value) -> PackageDocument {
    let info = doc.get("info");
    let mut out = PackageDocument {
        latest_version: non_empty(info.and_then(|i| i.get("version"))),
        requires_python: non_empty(info.and_then(|i| i.get("requires_python"))),
        ..Default::default()
    };

    let classifiers: Vec<Value> = info
        .and_then(|i| i.get("classifiers"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    out.license = non_empty(info.and_then(|i| i.get("license")))
        .and_then(|l| short_license(&l))
        .or_else(|| classifier_license(&classifiers));
    if classifiers.iter().any(|c| c.as_str() == Some(INACTIVE_CLASSIFIER)) {
        out.deprecated = Some(INACTIVE_CLASSIFIER.to_string());
    }

    if let Some(releases) = doc.get("releases").and_then(Value::as_object) {
        for (version, files) in releases {
            let files = files.as_array().map(Vec::as_slice).unwrap_or_default();
            let (uploaded, yanked, requires_python) = release_facts(files);
            if let Some(ts) = uploaded {
                out.publish_times.insert(version.clone(), ts);
            }
            if let Some(y) = yanked {
                out.deprecations.insert(version.clone(), y);
            }
            if let Some(rp) = requires_python {
                out.requires_python_by_version.insert(version.clone(), rp);
            }
        }
    }

    // Newer responses may omit `releases`; `urls` describes the latest files.
    if let (Some(latest), Some(urls)) = (
        out.latest_version.clone(),
        doc.get("urls").and_then(Value::as_array),
    ) {
        if !out.publish_times.contains_key(&latest) {
            if let (Some(ts), _, _) = release_facts(urls) {
                out.publish_times.insert(latest, ts);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_document() {
        let doc = json!({
            "info": {
                "version": "1.16.0",
                "license": "MIT\n\nPermission is hereby granted...",
                "requires_python": ">=2.7, !=3.0.*",
                "classifiers": ["Development Status :: 7 - Inactive"]
            },
            "releases": {
                "1.9.0": [{"upload_time_iso_8601": "2015-03-12T02:00:00.000000Z", "requires_python": ">=2.6"}],
                "1.16.0": [{"upload_time": "2021-05-05T14:00:00", "yanked": true, "yanked_reason": "broken"}],
                "0.1": []
            }
        });
        let parsed = parse_document(&doc);
        assert_eq!(parsed.license.as_deref(), Some("MIT"));
        assert_eq!(parsed.publish_times.len(), 2);
        assert_eq!(parsed.deprecations.get("1.16.0").map(String::as_str), Some("yanked: broken"));
        assert_eq!(parsed.metadata_for("1.9.0").requires_python.as_deref(), Some(">=2.6"));
        assert_eq!(parsed.deprecated.as_deref(), Some(INACTIVE_CLASSIFIER));
    }

    #[test]
    fn test_classifier_license_fallback() {
        let doc = json!({
            "info": {
                "version": "1.0",
                "license": "",
                "classifiers": ["License :: OSI Approved :: Apache Software License"]
            },
            "urls": [{"upload_time_iso_8601": "2020-01-01T00:00:00Z"}]
        });
        let parsed = parse_document(&doc);
        assert_eq!(parsed.license.as_deref(), Some("Apache Software License"));
        assert!(parsed.metadata_for("1.0").last_publish.is_some());
    }
}
