//! Registry metadata fetching.
//!
//! [`MetadataFetcher::fetch`] is cache-first: a fresh [`PackageDocument`] in the
//! [`FileCache`] short-circuits the network entirely. On a miss the ecosystem's
//! registry is queried through [`HttpJson`], and only non-empty documents are
//! written back. Nothing here returns an error; missing data is empty metadata.

pub mod cache;
pub mod document;
pub mod goproxy;
pub mod net;
pub mod npm;
pub mod pypi;

pub use cache::FileCache;
pub use document::PackageDocument;
pub use net::HttpJson;

use tracing::{debug, instrument, warn};

use crate::model::{Ecosystem, RegistryMetadata};

/// Base URLs for each registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoints {
    pub npm: String,
    pub pypi: String,
    /// `None` disables go metadata (`GOPROXY=off`/`direct`).
    pub go_proxy: Option<String>,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            npm: npm::DEFAULT_REGISTRY.to_string(),
            pypi: pypi::DEFAULT_INDEX.to_string(),
            go_proxy: Some(goproxy::DEFAULT_PROXY.to_string()),
        }
    }
}

impl RegistryEndpoints {
    /// Defaults with the go proxy taken from `GOPROXY`.
    pub fn from_env() -> Self {
        Self {
            go_proxy: goproxy::proxy_from_env(std::env::var("GOPROXY").ok().as_deref()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    http: HttpJson,
    cache: Option<FileCache>,
    endpoints: RegistryEndpoints,
}

impl MetadataFetcher {
    pub fn new(cache: Option<FileCache>) -> Self {
        Self {
            http: HttpJson::new(),
            cache,
            endpoints: RegistryEndpoints::from_env(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: RegistryEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_http(mut self, http: HttpJson) -> Self {
        self.http = http;
        self
    }

    pub fn cache(&self) -> Option<&FileCache> {
        self.cache.as_ref()
    }

    /// Metadata for one package version; `RegistryMetadata::default()` on any failure.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch(&self, name: &str, version: &str, ecosystem: Ecosystem) -> RegistryMetadata {
        self.document(name, version, ecosystem)
            .await
            .map(|doc| doc.metadata_for(version))
            .unwrap_or_default()
    }

    /// Latest published version, if the registry knows one.
    pub async fn latest_version(&self, name: &str, ecosystem: Ecosystem) -> Option<String> {
        self.document(name, "*", ecosystem)
            .await
            .and_then(|doc| doc.latest_version)
    }

    async fn document(&self, name: &str, version: &str, ecosystem: Ecosystem) -> Option<PackageDocument> {
        let cached: Option<PackageDocument> = self.cache.as_ref().and_then(|c| c.read(ecosystem, name));
        let complete = cached.as_ref().map_or(false, |doc| {
            ecosystem != Ecosystem::Go || version == "*" || doc.publish_times.contains_key(version)
        });
        if complete {
            debug!(package = %name, ecosystem = %ecosystem, "Registry cache hit");
            return cached;
        }

        let fetched = match ecosystem {
            Ecosystem::Npm => self
                .http
                .get_json(&npm::document_url(&self.endpoints.npm, name))
                .await
                .map(|raw| npm::parse_document(&raw)),
            Ecosystem::Pip => self
                .http
                .get_json(&pypi::document_url(&self.endpoints.pypi, name))
                .await
                .map(|raw| pypi::parse_document(&raw)),
            Ecosystem::Go => self.fetch_go(name, version, cached).await,
        }?;

        if fetched.is_empty() {
            return None;
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.write(ecosystem, name, &fetched) {
                warn!(package = %name, error = %e, "Failed to write registry cache entry");
            }
        }
        Some(fetched)
    }

    /// Go documents are accumulated per version on top of whatever the cache held.
    async fn fetch_go(
        &self,
        module: &str,
        version: &str,
        cached: Option<PackageDocument>,
    ) -> Option<PackageDocument> {
        let base = self.endpoints.go_proxy.as_deref()?;
        let mut doc = cached.unwrap_or_default();

        if version != "*" && !version.is_empty() {
            if let Some(info) = self.http.get_json(&goproxy::info_url(base, module, version)).await {
                goproxy::apply_info(&mut doc, &info, false);
            }
        }
        if let Some(info) = self.http.get_json(&goproxy::latest_url(base, module)).await {
            goproxy::apply_info(&mut doc, &info, true);
        }
        Some(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn fetcher_for(server: &MockServer, cache: Option<FileCache>) -> MetadataFetcher {
        MetadataFetcher::new(cache)
            .with_http(
                HttpJson::new()
                    .with_timeout(Duration::from_secs(2))
                    .with_backoff(Duration::from_millis(5)),
            )
            .with_endpoints(RegistryEndpoints {
                npm: server.url("/npm"),
                pypi: server.url("/pypi"),
                go_proxy: Some(server.url("/go")),
            })
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/npm/left-pad");
                then.status(200).json_body(json!({
                    "dist-tags": {"latest": "1.3.0"},
                    "time": {"1.3.0": "2018-04-09T00:00:00.000Z"},
                    "versions": {"1.3.0": {"license": "WTFPL"}}
                }));
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_for(&server, Some(FileCache::new(dir.path())));

        let first = fetcher.fetch("left-pad", "1.3.0", Ecosystem::Npm).await;
        let second = fetcher.fetch("left-pad", "1.3.0", Ecosystem::Npm).await;
        assert_eq!(first, second);
        assert_eq!(first.license.as_deref(), Some("WTFPL"));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_failures_yield_empty_metadata_and_no_cache_entry() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pypi/ghost/json");
                then.status(404);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let fetcher = fetcher_for(&server, Some(cache.clone()));
        let meta = fetcher.fetch("ghost", "1.0", Ecosystem::Pip).await;
        assert!(meta.is_empty());
        assert!(!cache.entry_path(Ecosystem::Pip, "ghost").exists());
    }

    #[tokio::test]
    async fn test_go_proxy_info_and_latest() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/go/github.com/!foo/bar/@v/v1.0.0.info");
                then.status(200)
                    .json_body(json!({"Version": "v1.0.0", "Time": "2018-01-01T00:00:00Z"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/go/github.com/!foo/bar/@latest");
                then.status(200)
                    .json_body(json!({"Version": "v1.4.0", "Time": "2023-01-01T00:00:00Z"}));
            })
            .await;

        let fetcher = fetcher_for(&server, None);
        let meta = fetcher.fetch("github.com/Foo/bar", "v1.0.0", Ecosystem::Go).await;
        assert_eq!(meta.latest_version.as_deref(), Some("v1.4.0"));
        assert_eq!(
            meta.last_publish.map(|t| t.to_rfc3339()),
            Some("2018-01-01T00:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn test_go_disabled_proxy_is_empty() {
        let fetcher = MetadataFetcher::new(None).with_endpoints(RegistryEndpoints {
            go_proxy: None,
            ..RegistryEndpoints::default()
        });
        assert!(fetcher.fetch("a.io/b", "v1.0.0", Ecosystem::Go).await.is_empty());
    }
}
