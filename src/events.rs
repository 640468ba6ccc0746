//! In-process event bus with webhook fan-out and the approval handshake.
//!
//! Listeners run synchronously inside [`EventBus::emit`]; a panicking listener
//! is logged and skipped. Webhook delivery is detached and its failures are
//! never observable by the caller. [`request_approval`] is the one blocking
//! network call: it awaits a determinate answer and any failure is a denial.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cap for detached webhook deliveries.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CheckpointCreated,
    ApplyStarted,
    ApplyCompleted,
    ApplyFailed,
    RollbackTriggered,
    RollbackCompleted,
    RollbackFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CheckpointCreated => "checkpoint.created",
            EventKind::ApplyStarted => "apply.started",
            EventKind::ApplyCompleted => "apply.completed",
            EventKind::ApplyFailed => "apply.failed",
            EventKind::RollbackTriggered => "rollback.triggered",
            EventKind::RollbackCompleted => "rollback.completed",
            EventKind::RollbackFailed => "rollback.failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{event, timestamp, ...payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Object payloads are flattened into the envelope; anything else lands under `data`.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            event: kind.as_str().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn is(&self, kind: EventKind) -> bool {
        self.event == kind.as_str()
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Listener registry. Each bus is independent; there is no global registry.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<(Option<EventKind>, Listener)>>>,
    http: reqwest::Client,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.snapshot().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            http: reqwest::Client::new(),
        }
    }

    /// Subscribes to one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener));
    }

    /// Subscribes to every event (`*`).
    pub fn on_any<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener));
    }

    fn register(&self, filter: Option<EventKind>, listener: Listener) {
        let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        guard.push((filter, listener));
    }

    fn snapshot(&self) -> Vec<(Option<EventKind>, Listener)> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Notifies listeners, then posts the envelope to each webhook in the background.
    pub fn emit(&self, kind: EventKind, payload: Value, webhooks: &[String]) -> Event {
        let event = Event::new(kind, payload);
        debug!(event = %kind, "Emitting event");

        for (filter, listener) in self.snapshot() {
            if filter.map_or(true, |k| k == kind) {
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    warn!(event = %kind, "Event listener panicked");
                }
            }
        }

        if !webhooks.is_empty() {
            self.deliver(&event, webhooks);
        }
        event
    }

    fn deliver(&self, event: &Event, webhooks: &[String]) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(event = %event.event, "No async runtime; webhooks skipped");
            return;
        };
        for url in webhooks {
            let request = self
                .http
                .post(url)
                .timeout(WEBHOOK_TIMEOUT)
                .json(event);
            let url = url.clone();
            let name = event.event.clone();
            handle.spawn(async move {
                match request.send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        debug!(%url, event = %name, status = resp.status().as_u16(), "Webhook rejected event");
                    }
                    Ok(_) => {}
                    Err(e) => debug!(%url, event = %name, error = %e, "Webhook delivery failed"),
                }
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// POSTs `payload` to `url` and waits up to `limit` for `{"approved": bool}`.
/// Timeouts, transport errors, non-2xx statuses and unparseable bodies are denials.
pub async fn request_approval(url: &str, payload: &Value, limit: Duration) -> ApprovalResponse {
    let client = reqwest::Client::new();
    let call = async {
        let resp = client.post(url).timeout(limit).json(payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Ok(ApprovalResponse::denied(format!("approval webhook returned HTTP {}", status.as_u16())));
        }
        let body: Value = resp.json().await?;
        Ok::<_, reqwest::Error>(match body.get("approved").and_then(Value::as_bool) {
            Some(approved) => ApprovalResponse {
                approved,
                reason: body.get("reason").and_then(Value::as_str).map(str::to_string),
            },
            None => ApprovalResponse::denied("approval response had no boolean 'approved' field"),
        })
    };

    let response = match tokio::time::timeout(limit, call).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) if e.is_timeout() => ApprovalResponse::denied("approval webhook timed out"),
        Ok(Err(e)) => ApprovalResponse::denied(format!("approval webhook failed: {}", e)),
        Err(_) => ApprovalResponse::denied("approval webhook timed out"),
    };
    info!(%url, approved = response.approved, "Approval webhook answered");
    response
}
