//! The corpus table: one row per page, in input order.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::Writer;
use rust_xlsxwriter::{Format, Workbook};

use super::PageReport;
use crate::error::{Error, Result};
use crate::OutputFormat;

/// Placeholder for a value the page does not have
pub const MISSING: &str = "-";

/// Column layout, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    cluster_count: usize,
    metadata_keys: Vec<String>,
}

impl TableSchema {
    pub fn new(cluster_count: usize, metadata_keys: Vec<String>) -> Self {
        Self {
            cluster_count,
            metadata_keys,
        }
    }

    fn fixed_columns(&self) -> Vec<String> {
        let mut cols = vec!["url".to_string(), "status".to_string(), "reason".to_string()];
        cols.extend((1..=self.cluster_count).map(|i| format!("color_{}", i)));
        cols.extend((1..=self.cluster_count).map(|i| format!("pct_{}", i)));
        cols.extend(
            ["saliency_mean", "saliency_max", "saliency_focus", "screenshot", "palette", "heatmap"]
                .iter()
                .map(|s| s.to_string()),
        );
        cols
    }

    /// Column names. A metadata key that clashes with a fixed column is
    /// written as `meta_<key>`.
    pub fn header(&self) -> Vec<String> {
        let mut cols = self.fixed_columns();
        let fixed = cols.clone();
        for key in &self.metadata_keys {
            if fixed.contains(key) {
                cols.push(format!("meta_{}", key));
            } else {
                cols.push(key.clone());
            }
        }
        cols
    }

    pub fn width(&self) -> usize {
        3 + 2 * self.cluster_count + 6 + self.metadata_keys.len()
    }

    pub fn row(&self, report: &PageReport) -> Vec<String> {
        let missing = || MISSING.to_string();
        let opt = |v: Option<&String>| v.cloned().unwrap_or_else(missing);

        let mut row = Vec::with_capacity(self.width());
        row.push(report.url.clone());
        row.push(report.status.to_string());
        row.push(opt(report.reason.as_ref()));

        for i in 0..self.cluster_count {
            row.push(report.clusters.get(i).map(|c| c.hex.clone()).unwrap_or_else(missing));
        }
        for i in 0..self.cluster_count {
            row.push(
                report
                    .clusters
                    .get(i)
                    .map(|c| format!("{:.4}", c.proportion))
                    .unwrap_or_else(missing),
            );
        }

        match &report.saliency {
            Some(s) => {
                row.push(format!("{:.4}", s.mean));
                row.push(format!("{:.4}", s.max));
                row.push(format!("{:.4}", s.focus_fraction));
            }
            None => row.extend(std::iter::repeat_with(missing).take(3)),
        }

        row.push(opt(report.artifacts.screenshot.as_ref()));
        row.push(opt(report.artifacts.palette.as_ref()));
        row.push(opt(report.artifacts.heatmap.as_ref()));

        for key in &self.metadata_keys {
            let value = report.metadata.as_ref().and_then(|m| m.get(key));
            row.push(match value {
                Some(v) if !v.is_empty() => v.clone(),
                _ => missing(),
            });
        }
        row
    }
}

/// Destination of the table. Every written row must be durable once
/// `write_row` returns.
pub trait TableSink: Send {
    fn write_row(&mut self, row: &[String]) -> Result<()>;

    /// Final flush. The sink is not written to afterwards.
    fn finish(&mut self) -> Result<()>;

    fn path(&self) -> &Path;
}

/// Open the sink for `format` under `dir` and write the header.
pub fn open_sink(format: OutputFormat, dir: &Path, header: Vec<String>) -> Result<Box<dyn TableSink>> {
    let path = dir.join(format.table_file_name());
    Ok(match format {
        OutputFormat::Csv => Box::new(CsvSink::create(path, &header)?),
        OutputFormat::Spreadsheet => Box::new(SpreadsheetSink::create(path, header)?),
    })
}

pub struct CsvSink {
    path: PathBuf,
    writer: Writer<File>,
}

impl CsvSink {
    pub fn create(path: PathBuf, header: &[String]) -> Result<Self> {
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut writer = Writer::from_writer(file);
        writer.write_record(header)?;
        writer.flush().map_err(|e| Error::io(&path, e))?;
        Ok(Self { path, writer })
    }
}

impl TableSink for CsvSink {
    fn write_row(&mut self, row: &[String]) -> Result<()> {
        self.writer.write_record(row)?;
        self.writer.flush().map_err(|e| Error::io(&self.path, e))
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::io(&self.path, e))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// `.xlsx` output. The format cannot be appended to, so the workbook is
/// rebuilt from the buffered rows and swapped in with a rename on every
/// write; an interrupted run leaves the last complete file behind.
pub struct SpreadsheetSink {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SpreadsheetSink {
    pub fn create(path: PathBuf, header: Vec<String>) -> Result<Self> {
        let sink = Self {
            path,
            header,
            rows: Vec::new(),
        };
        sink.save()?;
        Ok(sink)
    }

    fn save(&self) -> Result<()> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name("results")?;

        for (col, name) in self.header.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, name, &bold)?;
        }
        for (r, row) in self.rows.iter().enumerate() {
            let r = r as u32 + 1;
            for (col, value) in row.iter().enumerate() {
                // The URL column stays text even if it happens to parse
                match value.parse::<f64>() {
                    Ok(n) if col > 0 && n.is_finite() => sheet.write_number(r, col as u16, n)?,
                    _ => sheet.write_string(r, col as u16, value)?,
                };
            }
        }

        let tmp = self.path.with_extension("xlsx.tmp");
        workbook.save(&tmp)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| Error::io(&self.path, e))
    }
}

impl TableSink for SpreadsheetSink {
    fn write_row(&mut self, row: &[String]) -> Result<()> {
        self.rows.push(row.to_vec());
        self.save()
    }

    fn finish(&mut self) -> Result<()> {
        self.save()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::JobStatus;
    use crate::quantize::ColorCluster;
    use crate::report::{ArtifactPaths, PageReport};
    use crate::saliency::SaliencySummary;

    fn report() -> PageReport {
        PageReport {
            url: "http://a.test/".into(),
            slug: "a_test-deadbeef".into(),
            status: JobStatus::Partial,
            reason: Some("saliency: timed out".into()),
            attempts: 1,
            page_size: Some((10, 10)),
            clusters: vec![ColorCluster {
                hex: "#ffffff".into(),
                rgb: [255, 255, 255],
                proportion: 0.5,
                pixel_count: 50,
            }],
            saliency: Some(SaliencySummary {
                mean: 0.25,
                max: 1.0,
                peak: (1, 2),
                focus_fraction: 0.125,
            }),
            metadata: Some([("lang".to_string(), "en".to_string())].into_iter().collect()),
            artifacts: ArtifactPaths {
                screenshot: Some("screenshots/a.png".into()),
                palette: None,
                heatmap: None,
                record: "pages/a.json".into(),
            },
            missing: vec![],
        }
    }

    #[test]
    fn header_layout() {
        let schema = TableSchema::new(2, vec!["host".into(), "lang".into()]);
        let header = schema.header();
        assert_eq!(header.len(), schema.width());
        assert_eq!(
            header,
            vec![
                "url", "status", "reason", "color_1", "color_2", "pct_1", "pct_2", "saliency_mean",
                "saliency_max", "saliency_focus", "screenshot", "palette", "heatmap", "host", "lang"
            ]
        );
    }

    #[test]
    fn clashing_metadata_keys_are_prefixed() {
        let schema = TableSchema::new(1, vec!["color_1".into(), "lang".into(), "url".into()]);
        let header = schema.header();
        assert_eq!(&header[header.len() - 3..], ["meta_color_1", "lang", "meta_url"]);
        let mut names = header.clone();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), header.len());
    }

    #[test]
    fn row_marks_missing_values() {
        let schema = TableSchema::new(2, vec!["host".into(), "lang".into()]);
        let row = schema.row(&report());
        assert_eq!(row.len(), schema.width());
        assert_eq!(
            row,
            vec![
                "http://a.test/",
                "partial",
                "saliency: timed out",
                "#ffffff",
                "-",
                "0.5000",
                "-",
                "0.2500",
                "1.0000",
                "0.1250",
                "screenshots/a.png",
                "-",
                "-",
                "-",
                "en"
            ]
        );
    }

    #[test]
    fn csv_rows_are_flushed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let schema = TableSchema::new(1, vec![]);
        let mut sink = open_sink(OutputFormat::Csv, dir.path(), schema.header()).unwrap();
        sink.write_row(&schema.row(&report())).unwrap();

        // Read back without finishing the sink
        let text = std::fs::read_to_string(dir.path().join("results.csv")).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "http://a.test/");
    }

    #[test]
    fn spreadsheet_is_rewritten_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let schema = TableSchema::new(1, vec![]);
        let mut sink = open_sink(OutputFormat::Spreadsheet, dir.path(), schema.header()).unwrap();
        let path = dir.path().join("results.xlsx");
        assert!(path.is_file());
        sink.write_row(&schema.row(&report())).unwrap();
        sink.finish().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(!dir.path().join("results.xlsx.tmp").exists());
    }
}
