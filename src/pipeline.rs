//! Analyze pipeline: resolve, fetch registry metadata, build the report.
//!
//! [`AnalyzePipeline`] runs the stages sequentially, each under the stage
//! timeout:
//! 1. **Resolve**: manifest/lockfile to [`DependencyNode`](crate::model::DependencyNode)s, optionally
//!    enriched with a [`TransitiveTree`]
//! 2. **Fetch**: registry metadata through the bounded [`MetadataExecutor`]
//! 3. **Report**: risk signals and the sorted [`Report`]
//! 4. **Audit** (opt-in): the ecosystem's security scanner
//!
//! The fetch deadline applies per package: packages still pending when it
//! passes degrade to empty metadata instead of failing the run, and empty
//! metadata never marks anything ancient.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::audit::{collect_audit, DEFAULT_AUDIT_TIMEOUT};
use crate::config::ProjectConfig;
use crate::detect::{Detector, DetectorConfig};
use crate::executor::{MetadataExecutor, DEFAULT_CONCURRENCY};
use crate::model::Ecosystem;
use crate::registry::{FileCache, MetadataFetcher};
use crate::report::{build_report, enrich_with_tree, Report, TransitiveTree};
use crate::resolve::resolver_for;
use crate::traits::{EcosystemResolver, Resolution, ResolveError};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timing and volume for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeStats {
    pub resolve_duration_ms: u64,
    pub fetch_duration_ms: u64,
    pub report_duration_ms: u64,
    pub total_duration_ms: u64,
    pub nodes: usize,
    /// Nodes for which the registry returned anything at all.
    pub with_metadata: usize,
    /// Some fetches ran out of time and those packages carry no metadata.
    pub fetch_timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct AnalyzeResult {
    pub report: Report,
    pub stats: AnalyzeStats,
}

/// Outcome of a run. A project without the ecosystem's manifest is an
/// ordinary answer, not an error.
#[derive(Debug, Clone)]
pub enum Analysis {
    Report(AnalyzeResult),
    NotFound { message: String },
}

impl Analysis {
    pub fn report(&self) -> Option<&Report> {
        match self {
            Analysis::Report(result) => Some(&result.report),
            Analysis::NotFound { .. } => None,
        }
    }
}

/// Errors that stop a run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout { stage: &'static str, timeout_secs: u64 },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Resolve, fetch and report for one project at a time.
pub struct AnalyzePipeline {
    fetcher: Arc<MetadataFetcher>,
    detector: Detector,
    resolver: Option<Arc<dyn EcosystemResolver>>,
    tree: Option<TransitiveTree>,
    stage_timeout: Duration,
    concurrency: usize,
    audit: bool,
    audit_timeout: Duration,
}

impl AnalyzePipeline {
    /// Pipeline over `fetcher` with the default detector (24 months, now).
    pub fn new(fetcher: Arc<MetadataFetcher>) -> Self {
        Self {
            fetcher,
            detector: Detector::new(DetectorConfig::default()),
            resolver: None,
            tree: None,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            audit: false,
            audit_timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    /// Pipeline for a project: cache under its tool directory and the
    /// staleness threshold from its config.
    pub fn for_project(root: &Path, config: &ProjectConfig) -> Self {
        let fetcher = MetadataFetcher::new(Some(FileCache::for_project(root)));
        Self::new(Arc::new(fetcher)).with_ancient_months(config.ancient_months)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_ancient_months(self, months: u32) -> Self {
        let config = self.detector.config().clone().with_ancient_months(months);
        let detector = Detector::new(config);
        self.with_detector(detector)
    }

    /// Overrides the default resolver for the requested ecosystem.
    pub fn with_resolver(mut self, resolver: Arc<dyn EcosystemResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Supplementary installed tree merged into the resolved nodes.
    pub fn with_tree(mut self, tree: TransitiveTree) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }

    pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = timeout;
        self
    }

    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn run(&self, root: &Path, ecosystem: Ecosystem) -> Result<Analysis, PipelineError> {
        let start = Instant::now();
        let mut stats = AnalyzeStats::default();

        // Resolve
        let resolve_start = Instant::now();
        let resolver: Arc<dyn EcosystemResolver> = match &self.resolver {
            Some(resolver) => Arc::clone(resolver),
            None => Arc::from(resolver_for(ecosystem)),
        };
        let resolution = timeout(self.stage_timeout, resolver.resolve(root))
            .await
            .map_err(|_| self.timed_out("resolve"))??;

        let mut nodes = match resolution {
            Resolution::Found(nodes) => nodes,
            not_found @ Resolution::NotFound { .. } => {
                let message = not_found.error_message().unwrap_or_default();
                info!(%ecosystem, %message, "Nothing to analyze");
                return Ok(Analysis::NotFound { message });
            }
        };
        if let Some(tree) = &self.tree {
            nodes = enrich_with_tree(&nodes, tree);
        }
        stats.nodes = nodes.len();
        stats.resolve_duration_ms = resolve_start.elapsed().as_millis() as u64;
        info!(nodes = stats.nodes, duration_ms = stats.resolve_duration_ms, "Resolve completed");

        // Fetch
        let fetch_start = Instant::now();
        let fetched = MetadataExecutor::new(Arc::clone(&self.fetcher), self.concurrency)
            .with_deadline(self.stage_timeout)
            .fetch_all(&nodes)
            .await;
        if !fetched.timed_out.is_empty() {
            warn!(
                timeout_secs = self.stage_timeout.as_secs(),
                timed_out = fetched.timed_out.len(),
                "Metadata fetch timed out; reporting those packages without registry data"
            );
            stats.fetch_timed_out = true;
        }
        let metadata = fetched.metadata;
        stats.with_metadata = metadata.values().filter(|m| !m.is_empty()).count();
        stats.fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;

        // Report
        let report_start = Instant::now();
        let mut report = build_report(&nodes, &metadata, &self.detector);
        stats.report_duration_ms = report_start.elapsed().as_millis() as u64;

        if self.audit {
            report = report.with_audit(collect_audit(root, ecosystem, self.audit_timeout).await);
        }

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            total = report.summary.total,
            ancient = report.summary.ancient,
            deprecated = report.summary.deprecated,
            duration_ms = stats.total_duration_ms,
            "Analysis completed"
        );
        Ok(Analysis::Report(AnalyzeResult { report, stats }))
    }

    fn timed_out(&self, stage: &'static str) -> PipelineError {
        PipelineError::StageTimeout {
            stage,
            timeout_secs: self.stage_timeout.as_secs(),
        }
    }
}
