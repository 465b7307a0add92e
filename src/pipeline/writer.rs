//! The single writer: owns the table, the corpus result and the manifest.
//!
//! Workers finish out of order; the writer holds early arrivals back until
//! every earlier input index has either produced a record or been skipped,
//! so the table is always a prefix of the input in input order.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::job::{JobStatus, PageJob};
use crate::error::{Error, Result};
use crate::report::document::write_summary;
use crate::report::table::{open_sink, TableSchema, TableSink};
use crate::report::{OutputLayout, PageReport};
use crate::{OutputFormat, PipelineConfig, Viewport};

/// A finished job and what was assembled for it. Failed jobs carry a report
/// too, with every analysis section listed as missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job: PageJob,
    pub report: PageReport,
}

/// What workers send to the writer
#[derive(Debug)]
pub enum WriterMessage {
    Record(Box<JobRecord>),
    /// The job at this input index was aborted and will never report
    Skipped(usize),
}

/// Configuration as echoed in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub cluster_count: usize,
    pub output_format: OutputFormat,
    pub concurrency_limit: usize,
    pub stage_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub corpus_timeout_ms: Option<u64>,
    pub viewport: Viewport,
    pub max_samples: usize,
}

impl From<&PipelineConfig> for ConfigEcho {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            cluster_count: config.cluster_count,
            output_format: config.output_format,
            concurrency_limit: config.concurrency_limit,
            stage_timeout_ms: config.stage_timeout.as_millis() as u64,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff.as_millis() as u64,
            corpus_timeout_ms: config.corpus_timeout.map(|d| d.as_millis() as u64),
            viewport: config.viewport,
            max_samples: config.max_samples,
        }
    }
}

/// Where a run put its outputs. Contains no timestamps so identical runs
/// produce identical manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub output_dir: String,
    pub table: String,
    pub document: Option<String>,
    pub screenshots: String,
    pub palettes: String,
    pub heatmaps: String,
    pub pages: String,
    pub rows: usize,
    pub status_counts: BTreeMap<JobStatus, usize>,
    pub cancelled: bool,
    pub config: ConfigEcho,
}

/// Outcome of a corpus run: one record per written row, in input order.
#[derive(Debug, Clone)]
pub struct CorpusResult {
    records: Vec<JobRecord>,
    manifest: Manifest,
}

impl CorpusResult {
    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.records.iter().filter(|r| r.job.status() == status).count()
    }
}

pub struct CorpusWriter {
    layout: OutputLayout,
    schema: TableSchema,
    format: OutputFormat,
    sink: Box<dyn TableSink>,
    pending: BTreeMap<usize, Option<JobRecord>>,
    next_index: usize,
    records: Vec<JobRecord>,
}

impl CorpusWriter {
    /// Open the table and write its header.
    pub fn create(layout: OutputLayout, schema: TableSchema, format: OutputFormat) -> Result<Self> {
        let sink = open_sink(format, layout.root(), schema.header())?;
        Ok(Self {
            layout,
            schema,
            format,
            sink,
            pending: BTreeMap::new(),
            next_index: 0,
            records: Vec::new(),
        })
    }

    /// Accept one message and flush every row that is now in order.
    pub fn record(&mut self, message: WriterMessage) -> Result<()> {
        match message {
            WriterMessage::Record(rec) => {
                let index = rec.job.index();
                if index < self.next_index || self.pending.contains_key(&index) {
                    return Err(Error::StateError(format!("duplicate record for input {}", index)));
                }
                self.pending.insert(index, Some(*rec));
            }
            WriterMessage::Skipped(index) => {
                self.pending.insert(index, None);
            }
        }

        while let Some(entry) = self.pending.remove(&self.next_index) {
            if let Some(rec) = entry {
                self.write(rec)?;
            }
            self.next_index += 1;
        }
        Ok(())
    }

    fn write(&mut self, rec: JobRecord) -> Result<()> {
        self.sink.write_row(&self.schema.row(&rec.report))?;
        debug!("wrote row {} ({})", rec.job.index(), rec.job.status());
        self.records.push(rec);
        Ok(())
    }

    /// Write rows still held back behind jobs that never reported.
    fn drain_all(&mut self) -> Result<()> {
        let rest = std::mem::take(&mut self.pending);
        for rec in rest.into_values().flatten() {
            self.write(rec)?;
        }
        Ok(())
    }

    /// Flush everything and write the manifest and, if asked, the document.
    pub fn finish(mut self, config: &PipelineConfig, cancelled: bool) -> Result<CorpusResult> {
        self.drain_all()?;
        self.sink.finish()?;

        let document = if config.write_document {
            let path = self.layout.resolve(OutputLayout::DOCUMENT);
            let reports: Vec<PageReport> = self.records.iter().map(|r| r.report.clone()).collect();
            write_summary(&path, &self.layout, &reports)?;
            Some(OutputLayout::DOCUMENT.to_string())
        } else {
            None
        };

        let mut status_counts = BTreeMap::new();
        for rec in &self.records {
            *status_counts.entry(rec.job.status()).or_insert(0) += 1;
        }

        let manifest = Manifest {
            output_dir: self.layout.root().display().to_string(),
            table: self.format.table_file_name().to_string(),
            document,
            screenshots: OutputLayout::SCREENSHOTS.to_string(),
            palettes: OutputLayout::PALETTES.to_string(),
            heatmaps: OutputLayout::HEATMAPS.to_string(),
            pages: OutputLayout::PAGES.to_string(),
            rows: self.records.len(),
            status_counts,
            cancelled,
            config: ConfigEcho::from(config),
        };
        let manifest_path = self.layout.resolve(OutputLayout::MANIFEST);
        let json = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).map_err(|e| Error::io(&manifest_path, e))?;

        info!(
            "wrote {} rows to {}",
            manifest.rows,
            self.sink.path().display()
        );
        Ok(CorpusResult {
            records: self.records,
            manifest,
        })
    }

    /// Best-effort flush after a fatal error. Rows already written stay put.
    pub fn abandon(mut self) {
        if let Err(e) = self.drain_all() {
            log::warn!("could not flush buffered rows: {}", e);
        }
        if let Err(e) = self.sink.finish() {
            log::warn!("could not finish table: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ArtifactPaths;

    fn record(index: usize) -> Box<JobRecord> {
        let url = format!("http://host{}.test/", index);
        let mut job = PageJob::new(index, url.clone());
        job.fail("malformed URL: x").unwrap();
        let report = PageReport {
            url,
            slug: format!("host{}", index),
            status: JobStatus::Failed,
            reason: job.failure_reason().map(str::to_string),
            attempts: 0,
            page_size: None,
            clusters: vec![],
            saliency: None,
            metadata: None,
            artifacts: ArtifactPaths {
                record: format!("pages/host{}.json", index),
                ..Default::default()
            },
            missing: vec![],
        };
        Box::new(JobRecord { job, report })
    }

    fn writer(dir: &std::path::Path) -> CorpusWriter {
        let layout = OutputLayout::new(dir);
        layout.prepare().unwrap();
        CorpusWriter::create(layout, TableSchema::new(2, vec![]), OutputFormat::Csv).unwrap()
    }

    fn csv_urls(dir: &std::path::Path) -> Vec<String> {
        let mut reader = csv::Reader::from_path(dir.join("results.csv")).unwrap();
        reader.records().map(|r| r.unwrap()[0].to_string()).collect()
    }

    #[test]
    fn out_of_order_records_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());

        w.record(WriterMessage::Record(record(2))).unwrap();
        w.record(WriterMessage::Record(record(1))).unwrap();
        assert!(csv_urls(dir.path()).is_empty());

        w.record(WriterMessage::Record(record(0))).unwrap();
        assert_eq!(csv_urls(dir.path()).len(), 3);

        let config = PipelineConfig {
            output_dir: dir.path().to_path_buf(),
            write_document: false,
            ..Default::default()
        };
        let result = w.finish(&config, false).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(
            csv_urls(dir.path()),
            vec!["http://host0.test/", "http://host1.test/", "http://host2.test/"]
        );
        assert_eq!(result.count(JobStatus::Failed), 3);
        assert!(dir.path().join("manifest.json").is_file());
    }

    #[test]
    fn skipped_jobs_do_not_block_later_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.record(WriterMessage::Record(record(0))).unwrap();
        w.record(WriterMessage::Record(record(2))).unwrap();
        w.record(WriterMessage::Skipped(1)).unwrap();
        assert_eq!(csv_urls(dir.path()), vec!["http://host0.test/", "http://host2.test/"]);
    }

    #[test]
    fn finish_flushes_rows_behind_a_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.record(WriterMessage::Record(record(3))).unwrap();
        let config = PipelineConfig {
            output_dir: dir.path().to_path_buf(),
            write_document: true,
            ..Default::default()
        };
        let result = w.finish(&config, true).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.manifest().cancelled);
        assert_eq!(result.manifest().document.as_deref(), Some("summary.pdf"));
        assert!(dir.path().join("summary.pdf").is_file());
    }

    #[test]
    fn duplicate_records_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = writer(dir.path());
        w.record(WriterMessage::Record(record(0))).unwrap();
        assert!(matches!(
            w.record(WriterMessage::Record(record(0))),
            Err(Error::StateError(_))
        ));
    }
}
