//! Human-in-the-loop approval gate.

use async_trait::async_trait;
use serde_json::json;
use std::io::{BufRead, IsTerminal, Write};
use tracing::{info, warn};

use super::{ApplyAction, ApplyOperation};
use crate::config::{ApprovalMode, ApprovalPolicy};
use crate::events::request_approval;

/// Whether `operation` needs a decision under `policy`.
pub fn requires_approval(policy: &ApprovalPolicy, operation: &ApplyOperation) -> bool {
    if policy.mode == ApprovalMode::None {
        return false;
    }
    let action = match operation.action {
        ApplyAction::Upgrade => "upgrade",
        ApplyAction::Replace => "replace",
    };
    let size = if operation.is_major { "major" } else { "minor" };
    policy.requires(action) || policy.requires(size)
}

/// Interactive yes/no source.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// `None` when nobody can answer (no interactive terminal).
    async fn confirm(&self, question: &str) -> Option<bool>;
}

/// Asks on stderr and reads a line from stdin; requires both to be a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm(&self, question: &str) -> Option<bool> {
        if !std::io::stdin().is_terminal() || !std::io::stderr().is_terminal() {
            return None;
        }
        let question = question.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{} [y/N] ", question);
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok()?;
            Some(line)
        })
        .await
        .ok()
        .flatten()?;
        Some(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved { via: &'static str },
    Denied { reason: String },
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved { .. })
    }
}

/// Runs the configured approval strategy. Every path that cannot produce a
/// definite yes is a denial.
pub async fn decide(
    policy: &ApprovalPolicy,
    operation: &ApplyOperation,
    prompter: &dyn Prompter,
    assume_yes: bool,
) -> Decision {
    let decision = match policy.mode {
        ApprovalMode::None => Decision::Approved { via: "policy" },
        ApprovalMode::Prompt if assume_yes => Decision::Approved { via: "assume-yes" },
        ApprovalMode::Prompt => match prompter.confirm(&operation.describe()).await {
            Some(true) => Decision::Approved { via: "prompt" },
            Some(false) => Decision::Denied {
                reason: "declined at prompt".to_string(),
            },
            None => Decision::Denied {
                reason: "approval required but no interactive terminal is attached".to_string(),
            },
        },
        ApprovalMode::Webhook => match policy.webhook_url.as_deref() {
            None => Decision::Denied {
                reason: "webhook approval configured without webhookUrl".to_string(),
            },
            Some(url) => {
                let payload = json!({
                    "event": "approval.requested",
                    "operation": operation,
                    "summary": operation.describe(),
                });
                let response = request_approval(url, &payload, policy.timeout()).await;
                if response.approved {
                    Decision::Approved { via: "webhook" }
                } else {
                    Decision::Denied {
                        reason: response
                            .reason
                            .unwrap_or_else(|| "denied by approval webhook".to_string()),
                    }
                }
            }
        },
    };

    match &decision {
        Decision::Approved { via } => info!(package = %operation.package, via, "Operation approved"),
        Decision::Denied { reason } => warn!(package = %operation.package, %reason, "Operation denied"),
    }
    decision
}
