//! Page renderers
//!
//! A [`Renderer`] owns one render context (a browser tab, an HTTP client) and
//! turns a URL into a full-page [`RasterImage`]. Renderers are synchronous and
//! never retry; [`worker::RenderWorker`] moves one onto a dedicated thread so
//! the async orchestrator can drive it.

#[cfg(feature = "cdp")]
pub mod cdp;
#[cfg(feature = "static")]
pub mod static_html;
pub mod worker;

use std::time::Duration;

use url::Url;

use crate::error::{NetworkError, RenderError};
use crate::pipeline::cancel::CancelToken;
use crate::rendering::RasterImage;
use crate::Viewport;

/// Settings shared by every render context of a run
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// User agent string to send with requests
    pub user_agent: String,
    /// Viewport; the width is fixed, the capture extends to the full page height
    pub viewport: Viewport,
    /// Upper bound for navigation plus settling
    pub timeout: Duration,
    /// How long the page must stay quiet before it counts as settled
    pub quiet_window: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::DEFAULT_USER_AGENT.to_string(),
            viewport: Viewport::default(),
            timeout: Duration::from_secs(60),
            quiet_window: Duration::from_millis(500),
        }
    }
}

/// Core trait for render backends
pub trait Renderer {
    /// Create a render context
    fn new(config: RenderConfig) -> Result<Self, RenderError>
    where
        Self: Sized;

    /// Load `url`, wait until the page has settled (bounded by the configured
    /// timeout) and capture the full scrollable page.
    ///
    /// `cancel` is polled while waiting; a cancelled capture returns
    /// [`RenderError::Cancelled`].
    fn capture(&mut self, url: &Url, cancel: &CancelToken) -> Result<RasterImage, RenderError>;

    /// Close the render context and clean up resources
    fn close(self) -> Result<(), RenderError>
    where
        Self: Sized;
}

/// Validate a corpus entry before it reaches a renderer.
pub fn parse_target(raw: &str) -> Result<Url, RenderError> {
    let url = Url::parse(raw.trim()).map_err(|e| RenderError::InvalidUrl(format!("{}: {}", raw.trim(), e)))?;
    match url.scheme() {
        "http" | "https" | "file" => Ok(url),
        other => Err(RenderError::InvalidUrl(format!("unsupported scheme '{}' in {}", other, raw.trim()))),
    }
}

/// Map a backend failure message onto the error taxonomy. Chrome reports
/// navigation failures as `net::ERR_*` codes; HTTP clients use prose.
/// `timeout_ms` is the budget that was in force, reported on timeouts.
pub fn classify_failure(message: &str, timeout_ms: u64) -> RenderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("err_name_not_resolved") || lower.contains("dns error") || lower.contains("failed to lookup address") {
        RenderError::Network(NetworkError::Dns(message.to_string()))
    } else if lower.contains("err_connection_refused") || lower.contains("connection refused") {
        RenderError::Network(NetworkError::ConnectionRefused(message.to_string()))
    } else if lower.contains("err_timed_out") || lower.contains("timed out") || lower.contains("timeout") || lower.contains("never came") {
        RenderError::Network(NetworkError::Timeout(timeout_ms))
    } else if lower.contains("err_connection") || lower.contains("err_internet_disconnected") || lower.contains("err_network") {
        RenderError::Network(NetworkError::Other(message.to_string()))
    } else if lower.contains("err_invalid_url") || lower.contains("err_unknown_url_scheme") {
        RenderError::InvalidUrl(message.to_string())
    } else if lower.contains("err_http_response_code_failure") || lower.contains("err_aborted") {
        RenderError::HttpRejected(message.to_string())
    } else if lower.contains("exception") || lower.contains("script") {
        RenderError::ScriptFailure(message.to_string())
    } else {
        RenderError::NavigationFailure(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_accepts_web_urls() {
        assert!(parse_target("https://example.neocities.org/").is_ok());
        assert!(parse_target("  http://127.0.0.1:8080/page ").is_ok());
    }

    #[test]
    fn parse_target_rejects_garbage() {
        assert!(matches!(parse_target("not a url"), Err(RenderError::InvalidUrl(_))));
        assert!(matches!(parse_target("mailto:someone@example.com"), Err(RenderError::InvalidUrl(_))));
    }

    #[test]
    fn classify_chrome_codes() {
        assert!(matches!(
            classify_failure("net::ERR_NAME_NOT_RESOLVED", 100),
            RenderError::Network(NetworkError::Dns(_))
        ));
        assert!(matches!(
            classify_failure("net::ERR_CONNECTION_REFUSED", 100),
            RenderError::Network(NetworkError::ConnectionRefused(_))
        ));
        assert_eq!(
            classify_failure("The event waited for never came", 250),
            RenderError::Network(NetworkError::Timeout(250))
        );
        assert!(!classify_failure("net::ERR_HTTP_RESPONSE_CODE_FAILURE", 100).is_transient());
        assert!(classify_failure("something odd happened", 100).is_transient());
    }
}
