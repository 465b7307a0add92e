#![cfg(feature = "cdp")]

use std::time::Duration;

use chromascope::renderer::cdp::CdpRenderer;
use chromascope::renderer::worker::default_factory;
use chromascope::renderer::{RenderConfig, Renderer};
use chromascope::{CancelToken, JobStatus, Orchestrator, PipelineConfig, Viewport};
use tiny_http::{Response, Server};
use url::Url;

fn start_test_server() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let response = match request.url() {
                "/" => Response::from_string(
                    r#"<html><head><title>Test Page</title></head>
                    <body style="margin:0;background:#0a7a3c">
                      <div style="height:2400px"></div>
                    </body></html>"#,
                )
                .with_header("Content-Type: text/html".parse::<tiny_http::Header>().unwrap()),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    format!("http://{}", addr)
}

fn render_config() -> RenderConfig {
    RenderConfig {
        viewport: Viewport { width: 800, height: 600 },
        timeout: Duration::from_secs(30),
        quiet_window: Duration::from_millis(200),
        ..Default::default()
    }
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_full_page_capture() {
    let base_url = start_test_server();
    let mut renderer = CdpRenderer::new(render_config()).expect("Failed to start Chrome");

    let url = Url::parse(&format!("{}/", base_url)).unwrap();
    let image = renderer.capture(&url, &CancelToken::new()).expect("capture failed");
    assert_eq!(image.width(), 800);
    assert!(image.height() >= 2400, "capture stopped at {}px", image.height());
    assert_eq!(image.pixel(400, 1200), [0x0a, 0x7a, 0x3c]);

    renderer.close().unwrap();
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_cancelled_capture() {
    let base_url = start_test_server();
    let mut renderer = CdpRenderer::new(render_config()).expect("Failed to start Chrome");
    let cancel = CancelToken::new();
    cancel.cancel();

    let url = Url::parse(&format!("{}/", base_url)).unwrap();
    assert!(renderer.capture(&url, &cancel).is_err());
    renderer.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Chrome to be installed
async fn test_corpus_with_chrome() {
    let base_url = start_test_server();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        output_dir: dir.path().to_path_buf(),
        concurrency_limit: 2,
        viewport: Viewport { width: 800, height: 600 },
        max_retries: 0,
        ..Default::default()
    };
    let urls = vec![format!("{}/", base_url), format!("{}/missing", base_url)];

    let result = Orchestrator::new(config, default_factory::<CdpRenderer>())
        .unwrap()
        .run(urls)
        .await
        .unwrap();
    let records = result.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].job.status(), JobStatus::Succeeded);
    assert_eq!(records[0].report.clusters[0].hex, "#0a7a3c");
    assert!(dir.path().join("summary.pdf").is_file());
}
