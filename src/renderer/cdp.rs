//! Chrome DevTools Protocol renderer (uses the `headless_chrome` crate)

use std::sync::Arc;
use std::time::{Duration, Instant};

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use url::Url;

use super::{classify_failure, RenderConfig, Renderer};
use crate::error::RenderError;
use crate::pipeline::cancel::CancelToken;
use crate::rendering::{RasterImage, MAX_PAGE_HEIGHT};

const SETTLE_POLL: Duration = Duration::from_millis(100);

/// Reports readiness and how many subresources have been requested so far.
const SETTLE_PROBE: &str = r#"
(function() {
    var entries = (window.performance && performance.getEntriesByType)
        ? performance.getEntriesByType('resource').length : 0;
    return JSON.stringify({ ready: document.readyState, resources: entries });
})()
"#;

const PAGE_SIZE_PROBE: &str = r#"
(function() {
    var d = document.documentElement, b = document.body;
    var h = Math.max(d ? d.scrollHeight : 0, b ? b.scrollHeight : 0, d ? d.clientHeight : 0);
    return JSON.stringify({ height: h });
})()
"#;

/// Headless Chrome renderer. Launches one browser with a single tab and
/// reuses the tab for every capture.
pub struct CdpRenderer {
    browser: Browser,
    tab: Arc<Tab>,
    config: RenderConfig,
}

impl CdpRenderer {
    fn eval_json(&self, script: &str) -> Result<serde_json::Value, RenderError> {
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let eval = self
            .tab
            .evaluate(script, false)
            .map_err(|e| RenderError::ScriptFailure(format!("Evaluation failed: {}", classify_failure(&e.to_string(), timeout_ms))))?;
        let raw = eval
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| RenderError::ScriptFailure("No value returned from evaluation".into()))?;
        serde_json::from_str(&raw).map_err(|e| RenderError::ScriptFailure(format!("Malformed probe result: {}", e)))
    }

    /// Point the tab's per-call timeout at what is left of `deadline`.
    fn arm(&self, deadline: Instant) -> Result<(), RenderError> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(RenderError::Timeout(self.config.timeout.as_millis() as u64));
        }
        self.tab.set_default_timeout(left);
        Ok(())
    }

    /// Suspend until `document.readyState` is complete and the resource count
    /// has not moved for the quiet window, or until `settle_by`. Each probe is
    /// bounded by the capture `deadline`.
    fn wait_until_settled(&self, settle_by: Instant, deadline: Instant, cancel: &CancelToken) -> Result<(), RenderError> {
        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            self.arm(deadline)?;
            let probe = self.eval_json(SETTLE_PROBE)?;
            let ready = probe.get("ready").and_then(|v| v.as_str()) == Some("complete");
            let count = probe.get("resources").and_then(|v| v.as_u64()).unwrap_or(0);

            if last_count != Some(count) || !ready {
                last_count = Some(count);
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= self.config.quiet_window {
                return Ok(());
            }

            if Instant::now() >= settle_by {
                if ready {
                    // Long-polling pages never go quiet; capture what loaded.
                    warn!("page never went quiet, capturing after {:?}", self.config.timeout);
                    return Ok(());
                }
                return Err(RenderError::Timeout(self.config.timeout.as_millis() as u64));
            }
            std::thread::sleep(SETTLE_POLL);
        }
    }
}

impl Renderer for CdpRenderer {
    fn new(config: RenderConfig) -> Result<Self, RenderError>
    where
        Self: Sized,
    {
        // Configure headless Chrome launch options
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .idle_browser_timeout(config.timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| RenderError::Init(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| RenderError::Init(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| RenderError::Init(format!("Failed to create tab: {}", e)))?;

        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| RenderError::Init(format!("Failed to set user agent: {}", e)))?;

        Ok(Self { browser, tab, config })
    }

    fn capture(&mut self, url: &Url, cancel: &CancelToken) -> Result<RasterImage, RenderError> {
        let timeout_ms = self.config.timeout.as_millis() as u64;
        // Every wait below draws on this one budget
        let deadline = Instant::now() + self.config.timeout;
        // A page that never goes quiet still needs time to be measured and captured
        let settle_by = deadline - self.config.timeout / 5;

        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        self.arm(deadline)?;
        self.tab
            .navigate_to(url.as_str())
            .map_err(|e| classify_failure(&e.to_string(), timeout_ms))?;
        self.arm(deadline)?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| classify_failure(&e.to_string(), timeout_ms))?;

        self.wait_until_settled(settle_by, deadline, cancel)?;

        self.arm(deadline)?;
        let size = self.eval_json(PAGE_SIZE_PROBE)?;
        let height = size
            .get("height")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .min(MAX_PAGE_HEIGHT as f64);
        if height <= 0.0 {
            return Err(RenderError::BlankPage(format!("{} has no scrollable height", url)));
        }
        let width = self.config.viewport.width;
        debug!("capturing {} at {}x{}", url, width, height);

        // Clip to the full document at the fixed viewport width
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f64,
            height,
            scale: 1.0,
        };
        self.arm(deadline)?;
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| RenderError::NavigationFailure(format!("Screenshot failed: {}", e)))?;

        RasterImage::decode(&png)
    }

    fn close(self) -> Result<(), RenderError> {
        // Drop the tab before the browser so the child process is terminated
        // promptly.
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}
