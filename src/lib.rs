//! Chromascope
//!
//! Corpus-scale visual analysis of web pages. Each URL is rendered to a
//! full-page screenshot, reduced to a dominant-color palette with pixel
//! proportions and scored for visual saliency; the results are written as a
//! table (CSV or `.xlsx`), per-page artifacts and a combined PDF.
//!
//! # Features
//!
//! - **static** (default): browser-less renderer that fetches HTML over HTTP
//!   and paints its block layout. Deterministic and needs no browser.
//! - **cdp**: headless Chrome over the DevTools protocol for script-heavy pages
//!
//! # Example
//!
//! ```no_run
//! use chromascope::{Orchestrator, PipelineConfig};
//! use chromascope::renderer::static_html::StaticRenderer;
//! use chromascope::renderer::worker::default_factory;
//!
//! # async fn run() -> chromascope::Result<()> {
//! let config = PipelineConfig {
//!     cluster_count: 5,
//!     output_dir: "out".into(),
//!     ..Default::default()
//! };
//! let orchestrator = Orchestrator::new(config, default_factory::<StaticRenderer>())?;
//! let result = orchestrator.run(vec!["https://example.neocities.org/"]).await?;
//! println!("{} rows", result.len());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod metadata;
pub mod pipeline;
pub mod quantize;
pub mod renderer;
pub mod rendering;
pub mod report;
pub mod saliency;
pub mod slug;

pub use metadata::{MetadataIndex, MetadataRecord};
pub use pipeline::cancel::CancelToken;
pub use pipeline::job::{JobStatus, PageJob};
pub use pipeline::writer::{CorpusResult, JobRecord, Manifest};
pub use pipeline::Orchestrator;
pub use quantize::ColorCluster;
pub use rendering::RasterImage;
pub use report::PageReport;
pub use saliency::{SaliencyMap, SaliencySummary};

/// User agent sent by both renderers unless overridden
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 chromascope/0.1";

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Format of the corpus table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Spreadsheet,
}

impl OutputFormat {
    pub fn table_file_name(self) -> &'static str {
        match self {
            OutputFormat::Csv => "results.csv",
            OutputFormat::Spreadsheet => "results.xlsx",
        }
    }
}

/// Configuration for a corpus run
///
/// Fixed once a run starts. Defaults: five colors, a 1920x1080 viewport and
/// a CSV table.
///
/// # Examples
///
/// ```
/// let cfg = chromascope::PipelineConfig::default();
/// assert_eq!(cfg.cluster_count, 5);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of dominant colors per page
    pub cluster_count: usize,
    pub output_format: OutputFormat,
    /// Number of pages processed at once, one render context each
    pub concurrency_limit: usize,
    /// Upper bound for each stage of a job (render, quantize, saliency)
    pub stage_timeout: Duration,
    /// Extra render attempts after a transient failure
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further one
    pub retry_backoff: Duration,
    /// Stop claiming new pages once this much time has passed
    pub corpus_timeout: Option<Duration>,
    pub output_dir: PathBuf,
    pub viewport: Viewport,
    /// Pixel budget for color clustering
    pub max_samples: usize,
    /// Whether to build `summary.pdf` at the end of the run
    pub write_document: bool,
    pub user_agent: String,
    /// How long a page must stay quiet before it is captured
    pub settle_quiet_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cluster_count: 5,
            output_format: OutputFormat::Csv,
            concurrency_limit: num_cpus::get().clamp(1, 4),
            stage_timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            corpus_timeout: None,
            output_dir: PathBuf::from("chromascope-out"),
            viewport: Viewport::default(),
            max_samples: quantize::DEFAULT_MAX_SAMPLES,
            write_document: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            settle_quiet_window: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// Reject settings no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_count == 0 {
            return Err(Error::ConfigError("cluster_count must be at least 1".into()));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::ConfigError("concurrency_limit must be at least 1".into()));
        }
        if self.stage_timeout.is_zero() {
            return Err(Error::ConfigError("stage_timeout must be positive".into()));
        }
        if self.max_samples == 0 {
            return Err(Error::ConfigError("max_samples must be at least 1".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport {}x{} has no area",
                self.viewport.width, self.viewport.height
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError("output_dir is empty".into()));
        }
        Ok(())
    }

    /// Settings handed to each render context
    pub fn render_config(&self) -> renderer::RenderConfig {
        renderer::RenderConfig {
            user_agent: self.user_agent.clone(),
            viewport: self.viewport,
            timeout: self.stage_timeout,
            quiet_window: self.settle_quiet_window,
        }
    }
}

/// Split a URL list: one URL per line, blank lines and `#` comments skipped.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a URL list file (see [`parse_url_list`]).
pub fn read_url_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| Error::InputError(format!("{}: {}", path.display(), e)))?;
    Ok(parse_url_list(&text))
}
