//! A browser-less renderer that fetches HTML and paints it with the built-in
//! block layout.
//!
//! No JavaScript runs and no subresources are fetched, so a page is settled
//! as soon as its document body has been read. Output is fully deterministic,
//! which makes this backend the default for tests and for plain hand-written
//! personal pages.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use scraper::Html;
use url::Url;

use super::{RenderConfig, Renderer};
use crate::error::{NetworkError, RenderError};
use crate::pipeline::cancel::CancelToken;
use crate::rendering::layout::layout_document;
use crate::rendering::raster::rasterize;
use crate::rendering::RasterImage;

/// Renderer backed by a blocking HTTP client and the block rasterizer.
pub struct StaticRenderer {
    client: Client,
    config: RenderConfig,
}

impl StaticRenderer {
    fn fetch(&self, url: &Url) -> Result<String, RenderError> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| RenderError::InvalidUrl(format!("not a local path: {}", url)))?;
            return std::fs::read_to_string(&path)
                .map_err(|e| RenderError::NavigationFailure(format!("{}: {}", path.display(), e)));
        }

        let timeout_ms = self.config.timeout.as_millis() as u64;
        let res = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|e| map_transport_error(e, timeout_ms))?;

        let status = res.status();
        if !status.is_success() {
            return Err(RenderError::HttpStatus(status.as_u16()));
        }

        res.text().map_err(|e| map_transport_error(e, timeout_ms))
    }
}

fn map_transport_error(err: reqwest::Error, timeout_ms: u64) -> RenderError {
    if err.is_timeout() {
        return RenderError::Network(NetworkError::Timeout(timeout_ms));
    }
    // reqwest folds the cause chain into Display only partially; walk it so
    // DNS and refused connections can be told apart.
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    if err.is_connect() {
        return match super::classify_failure(&message, timeout_ms) {
            RenderError::Network(net) => RenderError::Network(net),
            _ => RenderError::Network(NetworkError::Other(message)),
        };
    }
    super::classify_failure(&message, timeout_ms)
}

impl Renderer for StaticRenderer {
    fn new(config: RenderConfig) -> Result<Self, RenderError>
    where
        Self: Sized,
    {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(15)))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RenderError::Init(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn capture(&mut self, url: &Url, cancel: &CancelToken) -> Result<RasterImage, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let html = self.fetch(url)?;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let document = Html::parse_document(&html);
        let page = layout_document(&document, self.config.viewport);
        debug!(
            "laid out {} as {}x{} with {} paint commands",
            url,
            page.width,
            page.height,
            page.commands.len()
        );
        if page.width == 0 || page.height == 0 {
            return Err(RenderError::BlankPage(format!("{} laid out to zero area", url)));
        }
        Ok(rasterize(page.width, page.height, page.background, &page.commands))
    }

    fn close(self) -> Result<(), RenderError> {
        drop(self.client);
        Ok(())
    }
}
