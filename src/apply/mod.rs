//! Upgrade and replace operations with an approval gate, a checkpoint, and
//! automatic rollback.
//!
//! Each operation moves through a fixed sequence and never skips or reorders
//! a step:
//!
//! 1. resolve the target version (`latest` asks the registry)
//! 2. compute `is_major` from the leading version numbers
//! 3. approval gate (dry runs stop here and report the plan)
//! 4. checkpoint, unless a batch shares one
//! 5. rewrite the manifest, run the package manager's install
//! 6. verify the installed tree
//! 7. emit `apply.completed`, or roll back to the checkpoint on any failure
//!
//! Rollback only happens once a checkpoint for the operation exists, and a
//! failed rollback is reported as such; it is the one state with no further
//! safety net.

pub mod advisor;
pub mod approval;
pub mod manifest;
pub mod package_manager;
pub mod version;

pub use advisor::{AdviceRequest, RemediationAdvisor};
pub use approval::{decide, requires_approval, Decision, Prompter, TerminalPrompter};
pub use manifest::{ManifestChange, ManifestError};
pub use package_manager::{InstallRequest, PackageManager, SystemPackageManager};

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, RollbackOptions};
use crate::config::ProjectConfig;
use crate::events::{EventBus, EventKind};
use crate::model::Ecosystem;
use crate::registry::{FileCache, MetadataFetcher};

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Upgrade,
    Replace,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyAction::Upgrade => "upgrade",
            ApplyAction::Replace => "replace",
        })
    }
}

/// What the caller asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub ecosystem: Ecosystem,
    pub action: ApplyAction,
    pub package: String,
    /// Replacement package; required for [`ApplyAction::Replace`].
    pub target_package: Option<String>,
    /// Explicit version, or `latest`.
    pub target_version: String,
}

impl ApplyRequest {
    pub fn upgrade(ecosystem: Ecosystem, package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ecosystem,
            action: ApplyAction::Upgrade,
            package: package.into(),
            target_package: None,
            target_version: version.into(),
        }
    }

    pub fn replace(
        ecosystem: Ecosystem,
        package: impl Into<String>,
        target: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            ecosystem,
            action: ApplyAction::Replace,
            package: package.into(),
            target_package: Some(target.into()),
            target_version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Stop after the approval gate and report the plan.
    pub dry_run: bool,
    /// Bypass the approval gate (operations already approved upstream).
    pub skip_approval: bool,
    /// Answer yes to interactive prompts.
    pub assume_yes: bool,
}

/// A resolved operation, as reported in outcomes and event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOperation {
    pub action: ApplyAction,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_package: Option<String>,
    pub current_version: Option<String>,
    pub target_version: String,
    pub is_major: bool,
    pub dry_run: bool,
}

impl ApplyOperation {
    /// Name that ends up in the manifest.
    pub fn resulting_package(&self) -> &str {
        self.target_package.as_deref().unwrap_or(&self.package)
    }

    pub fn describe(&self) -> String {
        let from = self.current_version.as_deref().unwrap_or("?");
        let major = if self.is_major { " (major)" } else { "" };
        match self.action {
            ApplyAction::Upgrade => format!(
                "Upgrade {} from {} to {}{}",
                self.package, from, self.target_version, major
            ),
            ApplyAction::Replace => format!(
                "Replace {}@{} with {}@{}",
                self.package,
                from,
                self.resulting_package(),
                self.target_version
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Mutate,
    Install,
    Verify,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Mutate => "manifest update",
            FailureStage::Install => "install",
            FailureStage::Verify => "verification",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RollbackStatus {
    /// The checkpoint was restored.
    Restored,
    /// Restoring failed; the project may be in a modified state.
    Failed { error: String },
    /// A batch shares the checkpoint and rolls it back once for all operations.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ApplyOutcome {
    Applied {
        operation: ApplyOperation,
        checkpoint: String,
        before: Option<String>,
        after: String,
        /// Advisory text for major upgrades, when an advisor is configured.
        advice: Option<String>,
    },
    Planned {
        operation: ApplyOperation,
        approval_required: bool,
    },
    Rejected {
        operation: ApplyOperation,
        reason: String,
    },
    Failed {
        operation: ApplyOperation,
        stage: FailureStage,
        reason: String,
        checkpoint: String,
        rollback: RollbackStatus,
    },
}

impl ApplyOutcome {
    pub fn operation(&self) -> &ApplyOperation {
        match self {
            ApplyOutcome::Applied { operation, .. }
            | ApplyOutcome::Planned { operation, .. }
            | ApplyOutcome::Rejected { operation, .. }
            | ApplyOutcome::Failed { operation, .. } => operation,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ApplyOutcome::Failed { .. })
    }

    /// Plain-language summary, including the follow-up for failures.
    pub fn message(&self, ecosystem: Ecosystem) -> String {
        match self {
            ApplyOutcome::Applied { operation, checkpoint, .. } => {
                format!("{}: done (checkpoint {})", operation.describe(), checkpoint)
            }
            ApplyOutcome::Planned {
                operation,
                approval_required,
            } => {
                let gate = if *approval_required { " (needs approval)" } else { "" };
                format!("Dry run: {}{}", operation.describe(), gate)
            }
            ApplyOutcome::Rejected { operation, reason } => {
                format!("{}: not applied, {}", operation.describe(), reason)
            }
            ApplyOutcome::Failed {
                operation,
                stage,
                reason,
                checkpoint,
                rollback,
            } => {
                let head = format!("{}: {} failed: {}", operation.describe(), stage, reason.trim());
                match rollback {
                    RollbackStatus::Restored => format!(
                        "{}\nRollback restored checkpoint {}. Run `{}` to resync installed packages.",
                        head,
                        checkpoint,
                        resync_command(ecosystem)
                    ),
                    RollbackStatus::Failed { error } => format!(
                        "{}\nROLLBACK FAILED: {}. Restore manually from {}/{}/{}.",
                        head,
                        error,
                        crate::TOOL_DIR,
                        crate::checkpoint::CHECKPOINT_DIR,
                        checkpoint
                    ),
                    RollbackStatus::Deferred => {
                        format!("{}\nThe batch checkpoint {} will be restored.", head, checkpoint)
                    }
                }
            }
        }
    }
}

/// Command that brings installed packages back in line with the manifest.
pub fn resync_command(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Npm => "npm install",
        Ecosystem::Pip => "python3 -m pip install -r requirements.txt",
        Ecosystem::Go => "go mod download",
    }
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Could not resolve a target version for {package}")]
    VersionUnresolved { package: String },

    #[error("{package} is not a declared {ecosystem} dependency")]
    PackageNotFound { package: String, ecosystem: Ecosystem },

    #[error("Replacing {package} needs a target package")]
    MissingTarget { package: String },

    #[error("Batch mixes ecosystems ({first} and {second}) under one checkpoint")]
    MixedEcosystems { first: Ecosystem, second: Ecosystem },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Result of [`ApplyEngine::apply_batch`].
#[derive(Debug)]
pub struct BatchOutcome {
    /// Shared checkpoint id, when one was used.
    pub checkpoint: Option<String>,
    pub results: Vec<Result<ApplyOutcome, ApplyError>>,
    /// A failure stopped the batch before every request ran.
    pub aborted: bool,
    /// Restore status of the shared checkpoint after an abort.
    pub rollback: Option<RollbackStatus>,
}

/// Orchestrates apply operations for one project.
pub struct ApplyEngine {
    root: PathBuf,
    config: ProjectConfig,
    events: EventBus,
    fetcher: Arc<MetadataFetcher>,
    package_manager: Arc<dyn PackageManager>,
    prompter: Arc<dyn Prompter>,
    advisor: Option<Arc<dyn RemediationAdvisor>>,
    checkpoints: CheckpointStore,
}

impl ApplyEngine {
    /// Real package managers, terminal prompts, and a registry fetcher cached
    /// under the project's tool directory.
    pub fn new(root: impl Into<PathBuf>, config: ProjectConfig) -> Self {
        let root = root.into();
        Self {
            fetcher: Arc::new(MetadataFetcher::new(Some(FileCache::for_project(&root)))),
            checkpoints: CheckpointStore::new(&root),
            root,
            config,
            events: EventBus::new(),
            package_manager: Arc::new(SystemPackageManager::default()),
            prompter: Arc::new(TerminalPrompter),
            advisor: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<MetadataFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_package_manager(mut self, package_manager: Arc<dyn PackageManager>) -> Self {
        self.package_manager = package_manager;
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn RemediationAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Runs one operation under its own checkpoint.
    #[instrument(skip(self, request), fields(package = %request.package, action = %request.action))]
    pub async fn apply(&self, request: &ApplyRequest, options: ApplyOptions) -> Result<ApplyOutcome, ApplyError> {
        self.run(request, options, None).await
    }

    /// Runs several operations. With `share_checkpoint` they share one
    /// checkpoint taken up front; the first failed operation or request error
    /// restores it and stops the batch. Otherwise every operation checkpoints and rolls back on its own
    /// and the batch always runs to the end.
    #[instrument(skip(self, requests), fields(operations = requests.len()))]
    pub async fn apply_batch(
        &self,
        requests: &[ApplyRequest],
        options: ApplyOptions,
        share_checkpoint: bool,
    ) -> Result<BatchOutcome, ApplyError> {
        let mut batch = BatchOutcome {
            checkpoint: None,
            results: Vec::with_capacity(requests.len()),
            aborted: false,
            rollback: None,
        };

        if !share_checkpoint || options.dry_run {
            for request in requests {
                batch.results.push(self.run(request, options, None).await);
            }
            return Ok(batch);
        }

        let Some(first) = requests.first() else {
            return Ok(batch);
        };
        if let Some(other) = requests.iter().find(|r| r.ecosystem != first.ecosystem) {
            return Err(ApplyError::MixedEcosystems {
                first: first.ecosystem,
                second: other.ecosystem,
            });
        }

        let shared = self.checkpoint(first.ecosystem, &format!("batch of {} operations", requests.len()))?;
        batch.checkpoint = Some(shared.id.clone());

        for request in requests {
            let result = self.run(request, options, Some(&shared)).await;
            let failed = match &result {
                Ok(ApplyOutcome::Failed { .. }) => Some("batch operation failed".to_string()),
                Err(e) => Some(format!("batch operation rejected: {}", e)),
                Ok(_) => None,
            };
            batch.results.push(result);
            if let Some(reason) = failed {
                batch.aborted = true;
                batch.rollback = Some(self.roll_back(&shared.id, &reason));
                break;
            }
        }
        Ok(batch)
    }

    async fn run(
        &self,
        request: &ApplyRequest,
        options: ApplyOptions,
        shared: Option<&Checkpoint>,
    ) -> Result<ApplyOutcome, ApplyError> {
        let operation = self.plan(request, options.dry_run).await?;
        let webhooks = &self.config.webhooks;

        // Approval gate.
        let needs_approval = !options.skip_approval && requires_approval(&self.config.approval, &operation);
        if options.dry_run {
            info!(plan = %operation.describe(), approval_required = needs_approval, "Dry run");
            return Ok(ApplyOutcome::Planned {
                operation,
                approval_required: needs_approval,
            });
        }
        if needs_approval {
            let decision = decide(
                &self.config.approval,
                &operation,
                self.prompter.as_ref(),
                options.assume_yes,
            )
            .await;
            if let Decision::Denied { reason } = decision {
                return Ok(ApplyOutcome::Rejected { operation, reason });
            }
        }

        let checkpoint_id = match shared {
            Some(checkpoint) => checkpoint.id.clone(),
            None => self.checkpoint(request.ecosystem, &operation.describe())?.id,
        };

        self.events.emit(
            EventKind::ApplyStarted,
            json!({"operation": &operation, "checkpoint": &checkpoint_id, "ecosystem": request.ecosystem}),
            webhooks,
        );

        let change = ManifestChange {
            package: operation.package.clone(),
            new_name: operation.resulting_package().to_string(),
            version: operation.target_version.clone(),
        };
        if let Err(e) = manifest::apply_change(&self.root, request.ecosystem, &change) {
            return Ok(self.fail(operation, FailureStage::Mutate, e.to_string(), checkpoint_id, shared.is_some()));
        }

        let install = InstallRequest {
            package: change.new_name.clone(),
            version: change.version.clone(),
        };
        let installed = self
            .package_manager
            .install(&self.root, request.ecosystem, &install)
            .await;
        if !installed.success {
            return Ok(self.fail(
                operation,
                FailureStage::Install,
                installed.failure_text(),
                checkpoint_id,
                shared.is_some(),
            ));
        }

        let verified = self.package_manager.verify(&self.root, request.ecosystem).await;
        if !verified.success {
            return Ok(self.fail(
                operation,
                FailureStage::Verify,
                verified.failure_text(),
                checkpoint_id,
                shared.is_some(),
            ));
        }

        let advice = match (&self.advisor, operation.is_major) {
            (Some(advisor), true) => {
                advisor
                    .advise(&AdviceRequest {
                        ecosystem: request.ecosystem,
                        package: operation.resulting_package().to_string(),
                        from_version: operation.current_version.clone(),
                        to_version: operation.target_version.clone(),
                        changelog: None,
                    })
                    .await
            }
            _ => None,
        };

        self.events.emit(
            EventKind::ApplyCompleted,
            json!({
                "operation": &operation,
                "checkpoint": &checkpoint_id,
                "before": &operation.current_version,
                "after": &operation.target_version,
            }),
            webhooks,
        );
        info!(plan = %operation.describe(), checkpoint = %checkpoint_id, "Apply completed");

        Ok(ApplyOutcome::Applied {
            before: operation.current_version.clone(),
            after: operation.target_version.clone(),
            operation,
            checkpoint: checkpoint_id,
            advice,
        })
    }

    /// Steps 1 and 2: validate the request, find the current and target versions.
    async fn plan(&self, request: &ApplyRequest, dry_run: bool) -> Result<ApplyOperation, ApplyError> {
        let target_package = match request.action {
            ApplyAction::Upgrade => None,
            ApplyAction::Replace => Some(
                request
                    .target_package
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| ApplyError::MissingTarget {
                        package: request.package.clone(),
                    })?,
            ),
        };

        let current = manifest::current_version(&self.root, request.ecosystem, &request.package)?.ok_or_else(|| {
            ApplyError::PackageNotFound {
                package: request.package.clone(),
                ecosystem: request.ecosystem,
            }
        })?;

        let wanted = request.target_version.trim();
        let lookup = target_package.as_deref().unwrap_or(&request.package);
        let target_version = if wanted.is_empty() || wanted.eq_ignore_ascii_case(LATEST) {
            self.fetcher
                .latest_version(lookup, request.ecosystem)
                .await
                .ok_or_else(|| ApplyError::VersionUnresolved {
                    package: lookup.to_string(),
                })?
        } else {
            wanted.to_string()
        };

        let is_major = match request.action {
            ApplyAction::Upgrade => version::is_major(&current, &target_version),
            // Versions of two different packages are not comparable.
            ApplyAction::Replace => false,
        };

        Ok(ApplyOperation {
            action: request.action,
            package: request.package.clone(),
            target_package,
            current_version: Some(current).filter(|v| !manifest::is_unpinned(v)),
            target_version,
            is_major,
            dry_run,
        })
    }

    fn checkpoint(&self, ecosystem: Ecosystem, reason: &str) -> Result<Checkpoint, ApplyError> {
        let checkpoint = self.checkpoints.create(ecosystem, reason)?;
        self.events.emit(
            EventKind::CheckpointCreated,
            json!({
                "checkpoint": &checkpoint.id,
                "ecosystem": ecosystem,
                "reason": reason,
                "files": &checkpoint.files,
            }),
            &self.config.webhooks,
        );
        Ok(checkpoint)
    }

    fn fail(
        &self,
        operation: ApplyOperation,
        stage: FailureStage,
        reason: String,
        checkpoint: String,
        shared: bool,
    ) -> ApplyOutcome {
        warn!(plan = %operation.describe(), %stage, %reason, "Apply failed");
        self.events.emit(
            EventKind::ApplyFailed,
            json!({
                "operation": &operation,
                "stage": stage,
                "error": &reason,
                "checkpoint": &checkpoint,
            }),
            &self.config.webhooks,
        );
        let rollback = if shared {
            RollbackStatus::Deferred
        } else {
            self.roll_back(&checkpoint, &format!("{} failed", stage))
        };
        ApplyOutcome::Failed {
            operation,
            stage,
            reason,
            checkpoint,
            rollback,
        }
    }

    fn roll_back(&self, checkpoint: &str, reason: &str) -> RollbackStatus {
        let webhooks = &self.config.webhooks;
        self.events.emit(
            EventKind::RollbackTriggered,
            json!({"checkpoint": checkpoint, "reason": reason}),
            webhooks,
        );
        let options = RollbackOptions {
            checkpoint: Some(checkpoint.to_string()),
            dry_run: false,
        };
        match self.checkpoints.rollback(&options) {
            Ok(report) => {
                self.events.emit(
                    EventKind::RollbackCompleted,
                    json!({"checkpoint": checkpoint, "restored": report.restored}),
                    webhooks,
                );
                RollbackStatus::Restored
            }
            Err(e) => {
                error!(%checkpoint, error = %e, "Rollback failed; project may be left modified");
                self.events.emit(
                    EventKind::RollbackFailed,
                    json!({"checkpoint": checkpoint, "error": e.to_string()}),
                    webhooks,
                );
                RollbackStatus::Failed { error: e.to_string() }
            }
        }
    }
}

impl fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApprovalMode, ApprovalPolicy};
    use crate::process::CommandOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Package manager stub with fixed exit statuses.
    struct Stub {
        install_ok: bool,
        verify_ok: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Stub {
        fn new(install_ok: bool, verify_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                install_ok,
                verify_ok,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PackageManager for Stub {
        async fn install(&self, _root: &Path, _eco: Ecosystem, request: &InstallRequest) -> CommandOutcome {
            self.calls
                .lock()
                .unwrap()
                .push(format!("install {}@{}", request.package, request.version));
            if self.install_ok {
                CommandOutcome::succeeded()
            } else {
                CommandOutcome::failed(1, "ERESOLVE could not resolve")
            }
        }

        async fn verify(&self, _root: &Path, _eco: Ecosystem) -> CommandOutcome {
            self.calls.lock().unwrap().push("verify".to_string());
            if self.verify_ok {
                CommandOutcome::succeeded()
            } else {
                CommandOutcome::failed(1, "missing: lodash@4")
            }
        }
    }

    struct Advisor;

    #[async_trait]
    impl RemediationAdvisor for Advisor {
        async fn advise(&self, request: &AdviceRequest) -> Option<String> {
            Some(format!("check the {} migration guide", request.package))
        }
    }

    const MANIFEST: &str = "{\n  \"dependencies\": {\n    \"lodash\": \"^3.10.1\",\n    \"request\": \"^2.88.0\"\n  }\n}\n";

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), MANIFEST).unwrap();
        dir
    }

    fn no_approval() -> ProjectConfig {
        ProjectConfig {
            approval: ApprovalPolicy {
                mode: ApprovalMode::None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn recorded(engine: &ApplyEngine) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.events().on_any(move |event| sink.lock().unwrap().push(event.event.clone()));
        seen
    }

    #[tokio::test]
    async fn test_successful_upgrade() {
        let dir = project();
        let stub = Stub::new(true, true);
        let engine = ApplyEngine::new(dir.path(), no_approval())
            .with_package_manager(stub.clone())
            .with_advisor(Arc::new(Advisor));
        let events = recorded(&engine);

        let outcome = engine
            .apply(
                &ApplyRequest::upgrade(Ecosystem::Npm, "lodash", "4.17.21"),
                ApplyOptions::default(),
            )
            .await
            .unwrap();

        match &outcome {
            ApplyOutcome::Applied {
                operation,
                before,
                after,
                advice,
                ..
            } => {
                assert!(operation.is_major);
                assert_eq!(before.as_deref(), Some("3.10.1"));
                assert_eq!(after, "4.17.21");
                assert_eq!(advice.as_deref(), Some("check the lodash migration guide"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let text = std::fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert!(text.contains("\"lodash\": \"^4.17.21\""));
        assert_eq!(*stub.calls.lock().unwrap(), vec!["install lodash@4.17.21", "verify"]);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["checkpoint.created", "apply.started", "apply.completed"]
        );
    }

    #[tokio::test]
    async fn test_verify_failure_rolls_back() {
        let dir = project();
        let engine = ApplyEngine::new(dir.path(), no_approval()).with_package_manager(Stub::new(true, false));
        let events = recorded(&engine);

        let outcome = engine
            .apply(
                &ApplyRequest::upgrade(Ecosystem::Npm, "lodash", "4.17.21"),
                ApplyOptions::default(),
            )
            .await
            .unwrap();

        assert!(matches!(
            &outcome,
            ApplyOutcome::Failed {
                stage: FailureStage::Verify,
                rollback: RollbackStatus::Restored,
                ..
            }
        ));
        assert!(outcome.message(Ecosystem::Npm).contains("Run `npm install`"));
        assert_eq!(std::fs::read_to_string(dir.path().join("package.json")).unwrap(), MANIFEST);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "checkpoint.created",
                "apply.started",
                "apply.failed",
                "rollback.triggered",
                "rollback.completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_reports_plan_only() {
        let dir = project();
        let stub = Stub::new(true, true);
        let engine = ApplyEngine::new(dir.path(), ProjectConfig::default()).with_package_manager(stub.clone());

        let outcome = engine
            .apply(
                &ApplyRequest::replace(Ecosystem::Npm, "request", "got", "14.0.0"),
                ApplyOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::Planned { approval_required: true, .. }));
        assert!(stub.calls.lock().unwrap().is_empty());
        assert!(engine.checkpoints().list().unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(dir.path().join("package.json")).unwrap(), MANIFEST);
    }

    #[tokio::test]
    async fn test_prompt_without_terminal_rejects() {
        struct NoTerminal;
        #[async_trait]
        impl Prompter for NoTerminal {
            async fn confirm(&self, _: &str) -> Option<bool> {
                None
            }
        }

        let dir = project();
        let stub = Stub::new(true, true);
        let engine = ApplyEngine::new(dir.path(), ProjectConfig::default())
            .with_package_manager(stub.clone())
            .with_prompter(Arc::new(NoTerminal));

        let request = ApplyRequest::upgrade(Ecosystem::Npm, "lodash", "4.17.21");
        let outcome = engine.apply(&request, ApplyOptions::default()).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Rejected { .. }));
        assert!(stub.calls.lock().unwrap().is_empty());

        // Pre-approved operations bypass the gate.
        let outcome = engine
            .apply(
                &request,
                ApplyOptions {
                    skip_approval: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn test_request_errors() {
        let dir = project();
        let engine = ApplyEngine::new(dir.path(), no_approval()).with_package_manager(Stub::new(true, true));

        let missing = engine
            .apply(&ApplyRequest::upgrade(Ecosystem::Npm, "left-pad", "1.3.0"), ApplyOptions::default())
            .await;
        assert!(matches!(missing, Err(ApplyError::PackageNotFound { .. })));

        let mut replace = ApplyRequest::replace(Ecosystem::Npm, "request", "got", "1.0.0");
        replace.target_package = None;
        let no_target = engine.apply(&replace, ApplyOptions::default()).await;
        assert!(matches!(no_target, Err(ApplyError::MissingTarget { .. })));
        assert!(engine.checkpoints().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_checkpoint_batch_aborts_and_restores() {
        let dir = project();
        struct FailSecond(Mutex<u32>);
        #[async_trait]
        impl PackageManager for FailSecond {
            async fn install(&self, _: &Path, _: Ecosystem, _: &InstallRequest) -> CommandOutcome {
                let mut n = self.0.lock().unwrap();
                *n += 1;
                if *n == 2 {
                    CommandOutcome::failed(1, "boom")
                } else {
                    CommandOutcome::succeeded()
                }
            }
            async fn verify(&self, _: &Path, _: Ecosystem) -> CommandOutcome {
                CommandOutcome::succeeded()
            }
        }

        let engine = ApplyEngine::new(dir.path(), no_approval()).with_package_manager(Arc::new(FailSecond(Mutex::new(0))));
        let requests = vec![
            ApplyRequest::upgrade(Ecosystem::Npm, "lodash", "3.10.2"),
            ApplyRequest::replace(Ecosystem::Npm, "request", "got", "14.0.0"),
            ApplyRequest::upgrade(Ecosystem::Npm, "lodash", "4.0.0"),
        ];
        let batch = engine.apply_batch(&requests, ApplyOptions::default(), true).await.unwrap();

        assert!(batch.aborted);
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.rollback, Some(RollbackStatus::Restored));
        assert!(matches!(
            batch.results[1],
            Ok(ApplyOutcome::Failed {
                rollback: RollbackStatus::Deferred,
                ..
            })
        ));
        assert_eq!(engine.checkpoints().list().unwrap().len(), 1);
        // The first, successful operation is undone with the rest.
        assert_eq!(std::fs::read_to_string(dir.path().join("package.json")).unwrap(), MANIFEST);
    }
}
