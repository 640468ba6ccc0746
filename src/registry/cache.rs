//! TTL file cache for registry documents.
//!
//! Entries live at `<dir>/<ecosystem>/<escaped-name>.json`; the file mtime is the
//! freshness signal. Writes go to a temporary sibling and are renamed into
//! place, so readers see either the previous entry or the new one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::model::Ecosystem;
use crate::TOOL_DIR;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Cache rooted at `<project>/.lineage-tmp/cache`.
    pub fn for_project(root: &Path) -> Self {
        Self::new(root.join(TOOL_DIR).join("cache"))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_path(&self, ecosystem: Ecosystem, name: &str) -> PathBuf {
        self.dir
            .join(ecosystem.as_str())
            .join(format!("{}.json", escape_name(name)))
    }

    pub fn read<T: DeserializeOwned>(&self, ecosystem: Ecosystem, name: &str) -> Option<T> {
        self.read_at(ecosystem, name, SystemTime::now())
    }

    /// Reads an entry as of `now`. Entries older than the TTL, unreadable or
    /// undecodable entries are misses.
    pub fn read_at<T: DeserializeOwned>(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        now: SystemTime,
    ) -> Option<T> {
        let path = self.entry_path(ecosystem, name);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > self.ttl {
            debug!(path = %path.display(), age_secs = age.as_secs(), "Cache entry expired");
            return None;
        }
        let text = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn write<T: Serialize>(&self, ecosystem: Ecosystem, name: &str, value: &T) -> io::Result<()> {
        let path = self.entry_path(ecosystem, name);
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;
        std::fs::create_dir_all(parent)?;

        let body = serde_json::to_vec(value).map_err(io::Error::from)?;
        let tmp = parent.join(format!(
            ".{}.{}-{}.tmp",
            escape_name(name),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, body)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

/// Reversible, filesystem-safe encoding: anything outside `[A-Za-z0-9._-]`
/// becomes `~XX` (hex byte), so distinct names never collide.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("~{:02X}", b));
        }
    }
    if out.starts_with('.') {
        out.replace_range(0..1, "~2E");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_escape_name() {
        assert_eq!(escape_name("@scope/pkg"), "~40scope~2Fpkg");
        assert_eq!(escape_name("a/b"), "a~2Fb");
        assert_ne!(escape_name("a/b"), escape_name("a_b"));
        assert_eq!(escape_name(".."), "~2E.");
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache
            .write(Ecosystem::Npm, "@scope/pkg", &json!({"latest": "1.0.0"}))
            .unwrap();
        let value: Value = cache.read(Ecosystem::Npm, "@scope/pkg").unwrap();
        assert_eq!(value["latest"], "1.0.0");
        assert!(cache.read::<Value>(Ecosystem::Pip, "@scope/pkg").is_none());
    }

    #[test]
    fn test_ttl_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let ttl = Duration::from_secs(3600);
        let cache = FileCache::new(dir.path()).with_ttl(ttl);
        cache.write(Ecosystem::Pip, "six", &json!({"v": 1})).unwrap();

        let written = std::fs::metadata(cache.entry_path(Ecosystem::Pip, "six"))
            .unwrap()
            .modified()
            .unwrap();
        let eps = Duration::from_secs(1);

        let fresh: Option<Value> = cache.read_at(Ecosystem::Pip, "six", written + ttl - eps);
        assert_eq!(fresh, Some(json!({"v": 1})));
        let stale: Option<Value> = cache.read_at(Ecosystem::Pip, "six", written + ttl + eps);
        assert!(stale.is_none());
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let path = cache.entry_path(Ecosystem::Go, "x");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{").unwrap();
        assert!(cache.read::<Value>(Ecosystem::Go, "x").is_none());
    }
}
