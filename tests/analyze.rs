use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use package_lineage::detect::{Detector, DetectorConfig};
use package_lineage::registry::{HttpJson, MetadataFetcher, RegistryEndpoints};
use package_lineage::report::{to_markdown, ReplacementCatalog};
use package_lineage::{Analysis, AnalyzePipeline, Ecosystem};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fetcher(server: &MockServer) -> Arc<MetadataFetcher> {
    Arc::new(
        MetadataFetcher::new(None)
            .with_http(HttpJson::new().with_timeout(Duration::from_secs(2)).with_retries(0))
            .with_endpoints(RegistryEndpoints {
                npm: server.url("/npm"),
                pypi: server.url("/pypi"),
                go_proxy: None,
            }),
    )
}

#[tokio::test]
async fn test_pip_project_marks_stale_pin_ancient() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pypi/sixpkg/json");
            then.status(200).json_body(json!({
                "info": {"version": "1.9.0", "license": "MIT"},
                "releases": {
                    "1.9.0": [{"upload_time_iso_8601": "2021-01-10T12:00:00Z"}]
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pypi/ghostpkg/json");
            then.status(404);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("requirements.txt"),
        "sixpkg==1.9.0\nghostpkg==0.1.0  # internal mirror only\n",
    )
    .unwrap();

    // Forty whole months after the upload.
    let as_of = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
    let analysis = AnalyzePipeline::new(fetcher(&server))
        .with_detector(Detector::new(DetectorConfig::new(as_of)))
        .run(dir.path(), Ecosystem::Pip)
        .await
        .unwrap();

    let result = match analysis {
        Analysis::Report(result) => result,
        other => panic!("expected a report, got {:?}", other),
    };
    let report = &result.report;
    assert_eq!(result.stats.nodes, 2);
    assert_eq!(result.stats.with_metadata, 1);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.ancient, 1);

    let six = report.entry("sixpkg@1.9.0").unwrap();
    assert!(six.signals.ancient);
    assert_eq!(six.signals.months_since_publish, Some(40));
    assert!(six
        .signals
        .reasons
        .iter()
        .any(|r| r.contains("no publish in 40 months")));

    let ghost = report.entry("ghostpkg@0.1.0").unwrap();
    assert!(!ghost.signals.ancient);
    assert!(ghost.metadata.is_empty());

    // Ancient entries sort first and show up in the rendered table.
    assert_eq!(report.entries[0].node.name, "sixpkg");
    let markdown = to_markdown(report);
    assert!(markdown.contains("| sixpkg | 1.9.0 |"));
    assert!(package_lineage::report::one_pager(report, &ReplacementCatalog::builtin()).contains("sixpkg"));
}

#[tokio::test]
async fn test_npm_lockfile_shared_dependency_keeps_shallowest_depth() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("package.json"),
        r#"{"name": "app", "version": "1.0.0", "dependencies": {"a": "^1.0.0", "b": "^2.0.0"}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("package-lock.json"),
        r#"{
            "name": "app",
            "version": "1.0.0",
            "lockfileVersion": 3,
            "packages": {
                "": {"name": "app", "version": "1.0.0", "dependencies": {"a": "^1.0.0", "b": "^2.0.0"}},
                "node_modules/a": {"version": "1.2.0"},
                "node_modules/b": {"version": "2.0.1", "dependencies": {"a": "^1.0.0"}}
            }
        }"#,
    )
    .unwrap();

    let analysis = AnalyzePipeline::new(fetcher(&server))
        .run(dir.path(), Ecosystem::Npm)
        .await
        .unwrap();
    let report = analysis.report().unwrap();

    let a = report.entry("a@1.2.0").unwrap();
    assert_eq!(a.node.depth, 1);
    assert_eq!(a.node.parents.len(), 2);
    assert!(a.node.parents.iter().any(|p| p == "b@2.0.1"));
    // Nothing from an unreachable registry counts as stale.
    assert_eq!(report.summary.ancient, 0);
}

#[tokio::test]
async fn test_project_without_manifest() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let analysis = AnalyzePipeline::new(fetcher(&server))
        .run(dir.path(), Ecosystem::Pip)
        .await
        .unwrap();
    assert!(matches!(analysis, Analysis::NotFound { .. }));
}

#[tokio::test]
async fn test_slow_registry_keeps_finished_metadata() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pypi/sixpkg/json");
            then.status(200).json_body(json!({
                "info": {"version": "1.9.0"},
                "releases": {"1.9.0": [{"upload_time_iso_8601": "2021-01-10T12:00:00Z"}]}
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pypi/slowpkg/json");
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(json!({"info": {"version": "3.0.0"}, "releases": {}}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "sixpkg==1.9.0\nslowpkg==1.0.0\n").unwrap();

    let fetcher = Arc::new(
        MetadataFetcher::new(None)
            .with_http(HttpJson::new().with_timeout(Duration::from_secs(10)).with_retries(0))
            .with_endpoints(RegistryEndpoints {
                npm: server.url("/npm"),
                pypi: server.url("/pypi"),
                go_proxy: None,
            }),
    );
    let as_of = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
    let started = std::time::Instant::now();
    let analysis = AnalyzePipeline::new(fetcher)
        .with_detector(Detector::new(DetectorConfig::new(as_of)))
        .with_timeout(Duration::from_millis(500))
        .run(dir.path(), Ecosystem::Pip)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    let result = match analysis {
        Analysis::Report(result) => result,
        other => panic!("expected a report, got {:?}", other),
    };
    assert!(result.stats.fetch_timed_out);
    assert_eq!(result.stats.with_metadata, 1);
    assert!(result.report.entry("sixpkg@1.9.0").unwrap().signals.ancient);
    assert!(result.report.entry("slowpkg@1.0.0").unwrap().metadata.is_empty());
}
