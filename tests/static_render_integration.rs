#![cfg(feature = "static")]

use std::time::Duration;

use chromascope::renderer::static_html::StaticRenderer;
use chromascope::renderer::worker::default_factory;
use chromascope::report::Section;
use chromascope::rendering::MAX_PAGE_HEIGHT;
use chromascope::{JobStatus, Orchestrator, PipelineConfig, Viewport};
use tiny_http::{Response, Server};

const PAGE: &str = r#"<html><head><title>home</title></head>
<body style="background: #224488">
  <div style="background-color: #cc2200; height: 40px"></div>
</body></html>"#;

const HUGE: &str = r#"<html><body>
  <div height="4294967295" style="min-height: 1e12px; background: #101010"></div>
  <div style="height: 4294967295px"></div>
</body></html>"#;

fn serve() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let response = match request.url() {
                "/" => Response::from_string(PAGE)
                    .with_header("Content-Type: text/html".parse::<tiny_http::Header>().unwrap()),
                "/huge" => Response::from_string(HUGE)
                    .with_header("Content-Type: text/html".parse::<tiny_http::Header>().unwrap()),
                "/broken" => Response::from_string("boom").with_status_code(500),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    format!("http://{}", addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn static_pages_end_to_end() {
    let base = serve();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        cluster_count: 3,
        output_dir: dir.path().to_path_buf(),
        concurrency_limit: 2,
        stage_timeout: Duration::from_secs(10),
        max_retries: 1,
        retry_backoff: Duration::from_millis(10),
        viewport: Viewport { width: 200, height: 150 },
        ..Default::default()
    };
    let urls = vec![format!("{}/", base), format!("{}/missing", base), format!("{}/broken", base)];

    let orchestrator = Orchestrator::new(config, default_factory::<StaticRenderer>()).unwrap();
    let result = orchestrator.run(urls.clone()).await.unwrap();
    assert_eq!(result.len(), 3);
    let records = result.records();

    let home = &records[0];
    assert_eq!(home.job.status(), JobStatus::Succeeded);
    assert_eq!(home.report.page_size, Some((200, 150)));
    assert_eq!(home.report.clusters.len(), 2);
    assert_eq!(home.report.clusters[0].hex, "#224488");
    assert_eq!(home.report.clusters[1].hex, "#cc2200");
    assert!(home.report.clusters[0].proportion > home.report.clusters[1].proportion);
    assert_eq!(home.report.missing, vec![Section::Metadata]);
    for rel in [
        home.report.artifacts.screenshot.as_ref().unwrap(),
        home.report.artifacts.palette.as_ref().unwrap(),
        home.report.artifacts.heatmap.as_ref().unwrap(),
        &home.report.artifacts.record,
    ] {
        assert!(dir.path().join(rel).is_file(), "missing artifact {}", rel);
    }

    let missing = &records[1];
    assert_eq!(missing.job.status(), JobStatus::Failed);
    assert_eq!(missing.job.attempt_count(), 1);
    assert_eq!(missing.job.failure_reason(), Some("HTTP status 404"));
    assert!(missing.report.artifacts.screenshot.is_none());

    let broken = &records[2];
    assert_eq!(broken.job.status(), JobStatus::Failed);
    assert_eq!(broken.job.attempt_count(), 2);
    assert_eq!(broken.job.failure_reason(), Some("HTTP status 500"));

    assert!(dir.path().join("results.csv").is_file());
    assert!(dir.path().join("summary.pdf").is_file());
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["rows"], 3);
    assert_eq!(manifest["cancelled"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_host_fails_without_stopping_the_run() {
    let base = serve();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        output_dir: dir.path().to_path_buf(),
        concurrency_limit: 1,
        stage_timeout: Duration::from_secs(5),
        max_retries: 0,
        viewport: Viewport { width: 64, height: 48 },
        write_document: false,
        ..Default::default()
    };
    // Port 9 (discard) is closed on test machines
    let urls = vec!["http://127.0.0.1:9/".to_string(), format!("{}/", base)];

    let result = Orchestrator::new(config, default_factory::<StaticRenderer>())
        .unwrap()
        .run(urls)
        .await
        .unwrap();
    let records = result.records();
    assert_eq!(records[0].job.status(), JobStatus::Failed);
    assert_eq!(records[1].job.status(), JobStatus::Succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_server_is_a_network_timeout() {
    // Accepts connections but never answers
    let silent = Server::http("127.0.0.1:0").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        output_dir: dir.path().to_path_buf(),
        concurrency_limit: 1,
        stage_timeout: Duration::from_secs(1),
        max_retries: 1,
        retry_backoff: Duration::from_millis(10),
        viewport: Viewport { width: 64, height: 48 },
        write_document: false,
        ..Default::default()
    };
    let url = format!("http://{}/", silent.server_addr());

    let result = Orchestrator::new(config, default_factory::<StaticRenderer>())
        .unwrap()
        .run([url])
        .await
        .unwrap();
    let page = &result.records()[0];
    assert_eq!(page.job.status(), JobStatus::Failed);
    assert_eq!(page.job.attempt_count(), 2);
    let reason = page.job.failure_reason().unwrap();
    assert!(reason.contains("network timeout"), "{}", reason);
    drop(silent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_page_is_capped_and_the_worker_moves_on() {
    let base = serve();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        output_dir: dir.path().to_path_buf(),
        concurrency_limit: 1,
        stage_timeout: Duration::from_secs(30),
        max_retries: 0,
        viewport: Viewport { width: 32, height: 24 },
        write_document: false,
        ..Default::default()
    };
    let urls = vec![format!("{}/huge", base), format!("{}/", base)];

    let result = Orchestrator::new(config, default_factory::<StaticRenderer>())
        .unwrap()
        .run(urls)
        .await
        .unwrap();
    let records = result.records();
    assert_eq!(records[0].job.status(), JobStatus::Succeeded);
    assert_eq!(records[0].report.page_size, Some((32, MAX_PAGE_HEIGHT)));
    assert_eq!(records[1].job.status(), JobStatus::Succeeded);
}
