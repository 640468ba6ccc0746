use crate::model::{DependencyNode, MetadataMap, RegistryMetadata};
use crate::registry::MetadataFetcher;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{info, instrument, warn};

pub const DEFAULT_CONCURRENCY: usize = 16;

/// Metadata for every distinct key, plus the keys cut off by the deadline.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub metadata: MetadataMap,
    /// Keys whose fetch did not finish in time; they map to empty metadata.
    pub timed_out: Vec<String>,
}

/// Fetches registry metadata for many nodes with a cap on in-flight requests.
pub struct MetadataExecutor {
    semaphore: Arc<Semaphore>,
    fetcher: Arc<MetadataFetcher>,
    deadline: Option<Duration>,
}

impl MetadataExecutor {
    pub fn new(fetcher: Arc<MetadataFetcher>, concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            fetcher,
            deadline: None,
        }
    }

    /// Time allowed for the whole batch, counted from the start of
    /// [`fetch_all`](Self::fetch_all). A package still queued or in flight at
    /// the deadline is dropped; finished packages keep their metadata.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fetches metadata for every distinct node key and joins before returning.
    #[instrument(skip(self, nodes), fields(nodes = nodes.len()))]
    pub async fn fetch_all(&self, nodes: &[DependencyNode]) -> FetchOutcome {
        let mut unique: BTreeMap<&str, &DependencyNode> = BTreeMap::new();
        for node in nodes {
            unique.entry(node.key.as_str()).or_insert(node);
        }

        info!(packages = unique.len(), "Fetching registry metadata");
        let deadline = self.deadline.map(|d| Instant::now() + d);

        let tasks = unique.into_values().map(|node| {
            let semaphore = Arc::clone(&self.semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                let fetch = async {
                    match semaphore.acquire().await {
                        Ok(_permit) => fetcher.fetch(&node.name, &node.version, node.ecosystem).await,
                        Err(e) => {
                            warn!(package = %node.key, error = %e, "Semaphore closed, skipping fetch");
                            RegistryMetadata::default()
                        }
                    }
                };
                let metadata = match deadline {
                    Some(at) => timeout_at(at, fetch).await.ok(),
                    None => Some(fetch.await),
                };
                (node.key.clone(), metadata)
            }
        });

        let mut outcome = FetchOutcome::default();
        for (key, metadata) in join_all(tasks).await {
            let metadata = metadata.unwrap_or_else(|| {
                warn!(package = %key, "Metadata fetch hit the deadline");
                outcome.timed_out.push(key.clone());
                RegistryMetadata::default()
            });
            outcome.metadata.insert(key, metadata);
        }

        let known = outcome.metadata.values().filter(|m| !m.is_empty()).count();
        info!(
            packages = outcome.metadata.len(),
            with_metadata = known,
            timed_out = outcome.timed_out.len(),
            "Finished metadata fetch"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ecosystem;
    use crate::registry::{HttpJson, RegistryEndpoints};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_all_dedupes_keys() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/pypi/six/json");
                then.status(200).json_body(json!({
                    "info": {"version": "1.16.0"},
                    "releases": {"1.16.0": [{"upload_time_iso_8601": "2021-05-05T00:00:00Z"}]}
                }));
            })
            .await;

        let fetcher = MetadataFetcher::new(None)
            .with_http(HttpJson::new().with_timeout(Duration::from_secs(2)))
            .with_endpoints(RegistryEndpoints {
                pypi: server.url("/pypi"),
                ..RegistryEndpoints::default()
            });
        let executor = MetadataExecutor::new(Arc::new(fetcher), 2);

        let nodes = vec![
            DependencyNode::new("six", "1.16.0", Ecosystem::Pip, 1).with_parent("requirements.txt"),
            DependencyNode::new("six", "1.16.0", Ecosystem::Pip, 1).with_parent("requirements/dev.txt"),
        ];
        let map = executor.fetch_all(&nodes).await.metadata;
        assert_eq!(map.len(), 1);
        assert_eq!(map["six@1.16.0"].latest_version.as_deref(), Some("1.16.0"));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_deadline_keeps_finished_packages() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pypi/quick/json");
                then.status(200).json_body(json!({
                    "info": {"version": "2.0.0"},
                    "releases": {"2.0.0": [{"upload_time_iso_8601": "2023-01-01T00:00:00Z"}]}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pypi/sluggish/json");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .json_body(json!({"info": {"version": "9.9.9"}, "releases": {}}));
            })
            .await;

        let fetcher = MetadataFetcher::new(None)
            .with_http(HttpJson::new().with_timeout(Duration::from_secs(10)).with_retries(0))
            .with_endpoints(RegistryEndpoints {
                pypi: server.url("/pypi"),
                ..RegistryEndpoints::default()
            });
        let executor = MetadataExecutor::new(Arc::new(fetcher), 4).with_deadline(Duration::from_millis(500));

        let nodes = vec![
            DependencyNode::new("quick", "2.0.0", Ecosystem::Pip, 1),
            DependencyNode::new("sluggish", "1.0.0", Ecosystem::Pip, 1),
        ];
        let started = std::time::Instant::now();
        let outcome = executor.fetch_all(&nodes).await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(outcome.timed_out, vec!["sluggish@1.0.0".to_string()]);
        assert_eq!(outcome.metadata["quick@2.0.0"].latest_version.as_deref(), Some("2.0.0"));
        assert!(outcome.metadata["sluggish@1.0.0"].is_empty());
    }
}
