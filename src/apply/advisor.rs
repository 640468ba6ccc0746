use async_trait::async_trait;
use serde::Serialize;

use crate::model::Ecosystem;

/// Context handed to a [`RemediationAdvisor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdviceRequest {
    pub ecosystem: Ecosystem,
    pub package: String,
    pub from_version: Option<String>,
    pub to_version: String,
    /// Release notes between the two versions, when the caller has them.
    pub changelog: Option<String>,
}

/// Optional source of migration guidance for completed major upgrades.
///
/// The text is attached to the outcome as-is; it never influences whether an
/// operation proceeds.
#[async_trait]
pub trait RemediationAdvisor: Send + Sync {
    async fn advise(&self, request: &AdviceRequest) -> Option<String>;
}
