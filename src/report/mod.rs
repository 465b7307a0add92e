//! Report assembly
//!
//! Turns whatever a finished job produced into persisted artifacts, a
//! [`PageReport`] and (through [`table::TableSchema`]) one table row. Any
//! subset of artifacts is accepted; absent ones are listed in
//! [`PageReport::missing`].

pub mod document;
pub mod images;
pub mod table;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::MetadataRecord;
use crate::pipeline::job::{JobStatus, PageJob};
use crate::quantize::ColorCluster;
use crate::rendering::RasterImage;
use crate::saliency::{self, SaliencyMap, SaliencySummary};

/// Parts of a page record that may be absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Screenshot,
    Palette,
    Saliency,
    Metadata,
}

/// Artifact locations, relative to the output directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub screenshot: Option<String>,
    pub palette: Option<String>,
    pub heatmap: Option<String>,
    /// The page record itself
    pub record: String,
}

/// The combined per-page record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub url: String,
    pub slug: String,
    pub status: JobStatus,
    pub reason: Option<String>,
    pub attempts: u32,
    /// Captured page size in pixels
    pub page_size: Option<(u32, u32)>,
    pub clusters: Vec<ColorCluster>,
    pub saliency: Option<SaliencySummary>,
    pub metadata: Option<MetadataRecord>,
    pub artifacts: ArtifactPaths,
    pub missing: Vec<Section>,
}

/// Everything a terminal job hands to the assembler
#[derive(Debug)]
pub struct PageArtifacts {
    pub job: PageJob,
    pub slug: String,
    pub image: Option<Arc<RasterImage>>,
    pub clusters: Option<Vec<ColorCluster>>,
    pub saliency: Option<SaliencyMap>,
    pub metadata: Option<MetadataRecord>,
}

/// Directory layout of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub const SCREENSHOTS: &'static str = "screenshots";
    pub const PALETTES: &'static str = "palettes";
    pub const HEATMAPS: &'static str = "heatmaps";
    pub const PAGES: &'static str = "pages";
    pub const DOCUMENT: &'static str = "summary.pdf";
    pub const MANIFEST: &'static str = "manifest.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output directory and its artifact subdirectories.
    pub fn prepare(&self) -> Result<()> {
        for dir in [Self::SCREENSHOTS, Self::PALETTES, Self::HEATMAPS, Self::PAGES] {
            let path = self.root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        }
        Ok(())
    }

    /// Absolute location of a path stored in a report
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn screenshot(slug: &str) -> String {
        format!("{}/{}.png", Self::SCREENSHOTS, slug)
    }

    pub fn palette(slug: &str) -> String {
        format!("{}/{}_palette.png", Self::PALETTES, slug)
    }

    pub fn heatmap(slug: &str) -> String {
        format!("{}/{}_heatmap.png", Self::HEATMAPS, slug)
    }

    pub fn record(slug: &str) -> String {
        format!("{}/{}.json", Self::PAGES, slug)
    }
}

/// Persist the artifacts of a finished job and build its report.
pub fn assemble(artifacts: PageArtifacts, layout: &OutputLayout) -> Result<PageReport> {
    let PageArtifacts {
        job,
        slug,
        image,
        clusters,
        saliency,
        metadata,
    } = artifacts;

    if !job.status().is_terminal() {
        return Err(Error::StateError(format!(
            "cannot assemble {} while it is {}",
            job.url(),
            job.status()
        )));
    }

    let mut paths = ArtifactPaths {
        record: OutputLayout::record(&slug),
        ..Default::default()
    };
    let mut missing = Vec::new();

    // A zero-area capture has nothing to encode
    let screenshot = image
        .as_ref()
        .filter(|img| img.pixel_count() > 0)
        .map(|img| img.to_rgb_image());
    match &screenshot {
        Some(rgb) => {
            let rel = OutputLayout::screenshot(&slug);
            images::write_png(&layout.resolve(&rel), rgb)?;
            paths.screenshot = Some(rel);
        }
        None => missing.push(Section::Screenshot),
    }

    let clusters = clusters.unwrap_or_default();
    if clusters.is_empty() {
        missing.push(Section::Palette);
    } else {
        let rel = OutputLayout::palette(&slug);
        let swatch = images::palette_swatch(&clusters, images::SWATCH_WIDTH, images::SWATCH_HEIGHT);
        images::write_png(&layout.resolve(&rel), &swatch)?;
        paths.palette = Some(rel);
    }

    let summary = match (&image, &saliency) {
        (Some(img), Some(map)) => {
            let rel = OutputLayout::heatmap(&slug);
            images::write_png(&layout.resolve(&rel), &saliency::overlay(img, map))?;
            paths.heatmap = Some(rel);
            Some(saliency::summarize(map))
        }
        _ => {
            missing.push(Section::Saliency);
            None
        }
    };

    if metadata.is_none() {
        missing.push(Section::Metadata);
    }

    let report = PageReport {
        url: job.url().to_string(),
        slug,
        status: job.status(),
        reason: job.failure_reason().map(str::to_string),
        attempts: job.attempt_count(),
        page_size: image.as_ref().map(|img| (img.width(), img.height())),
        clusters,
        saliency: summary,
        metadata,
        artifacts: paths,
        missing,
    };

    let record_path = layout.resolve(&report.artifacts.record);
    let json = serde_json::to_vec_pretty(&report)?;
    std::fs::write(&record_path, json).map_err(|e| Error::io(&record_path, e))?;
    debug!("assembled {} ({} missing sections)", report.url, report.missing.len());

    Ok(report)
}
