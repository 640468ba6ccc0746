//! Timeout/retry-wrapped JSON GET shared by every registry client.

use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
}

impl FetchError {
    /// Client errors other than rate limiting will not change on retry.
    fn is_permanent(&self) -> bool {
        matches!(self, FetchError::Status(code) if (400..500).contains(code) && *code != 429)
    }
}

/// JSON GET client. Failures are collapsed to `None` after retries.
#[derive(Debug, Clone)]
pub struct HttpJson {
    client: reqwest::Client,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl Default for HttpJson {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpJson {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("package-lineage/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Base delay before the first retry; doubles on each further attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GETs `url` and parses the body as JSON. Never errors: transport
    /// failures, non-2xx statuses and bad JSON all end in `None`.
    pub async fn get_json(&self, url: &str) -> Option<Value> {
        let mut delay = self.backoff;
        for attempt in 0..=self.retries {
            match self.try_get(url).await {
                Ok(value) => return Some(value),
                Err(e) => {
                    debug!(url = %url, attempt, error = %e, "Registry request failed");
                    if e.is_permanent() || attempt == self.retries {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        None
    }

    async fn try_get(&self, url: &str) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn fast_client() -> HttpJson {
        HttpJson::new()
            .with_timeout(Duration::from_secs(2))
            .with_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/pkg");
                then.status(200).json_body(json!({"ok": true}));
            })
            .await;

        let value = fast_client().get_json(&server.url("/pkg")).await;
        assert_eq!(value, Some(json!({"ok": true})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_empty() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/flaky");
                then.status(503);
            })
            .await;

        let value = fast_client().get_json(&server.url("/flaky")).await;
        assert!(value.is_none());
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        assert!(fast_client().get_json(&server.url("/missing")).await.is_none());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_invalid_json_is_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/garbage");
                then.status(200).body("<html>");
            })
            .await;

        let value = fast_client()
            .with_retries(0)
            .get_json(&server.url("/garbage"))
            .await;
        assert!(value.is_none());
    }
}
