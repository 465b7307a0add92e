//! Corpus orchestration
//!
//! A bounded pool of workers, each owning one [`RenderWorker`], claims URLs
//! in input order from a shared cursor and runs
//! render → (quantize ‖ saliency) → assemble for each. Finished jobs go to a
//! single writer task over a channel; nothing else touches the table.
//!
//! Failure handling is layered. A URL that cannot be rendered becomes a
//! `failed` row and the run continues. An analysis stage that fails makes the
//! row `partial`. Only output errors and renderer start-up errors stop the
//! whole run.

pub mod cancel;
pub mod job;
pub mod retry;
pub mod writer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use url::Url;

use self::cancel::CancelToken;
use self::job::PageJob;
use self::retry::RetryPolicy;
use self::writer::{CorpusResult, CorpusWriter, JobRecord, WriterMessage};
use crate::error::{Error, QuantizationError, RenderError, Result, SaliencyError};
use crate::metadata::{MetadataIndex, MetadataRecord};
use crate::quantize::{quantize_sampled, ColorCluster};
use crate::renderer::worker::{panic_message, RenderWorker, RendererFactory};
use crate::renderer::{parse_target, Renderer};
use crate::rendering::RasterImage;
use crate::report::table::TableSchema;
use crate::report::{assemble, OutputLayout, PageArtifacts};
use crate::saliency::{self, SaliencyMap};
use crate::slug::{slug, url_seed};
use crate::PipelineConfig;

const RENDER_GRACE_MIN: Duration = Duration::from_secs(1);
const RENDER_GRACE_MAX: Duration = Duration::from_secs(15);

/// Runs corpora with one renderer backend.
pub struct Orchestrator<R: Renderer> {
    config: PipelineConfig,
    factory: RendererFactory<R>,
    metadata: MetadataIndex,
    cancel: CancelToken,
}

struct JobContext {
    config: PipelineConfig,
    metadata: MetadataIndex,
    layout: OutputLayout,
    policy: RetryPolicy,
    cancel: CancelToken,
    total: usize,
}

enum RenderOutcome {
    Captured(RasterImage),
    Failed(RenderError),
    Aborted,
}

impl<R: Renderer + 'static> Orchestrator<R> {
    /// Validate `config` and prepare a run. `factory` is called once per
    /// worker, on that worker's thread.
    pub fn new(config: PipelineConfig, factory: RendererFactory<R>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            metadata: MetadataIndex::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Merge records from an external metadata scraper into the output.
    pub fn with_metadata(mut self, metadata: MetadataIndex) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Process `urls` and write every output under the configured directory.
    ///
    /// Returns the records that made it into the table. Per-URL failures are
    /// rows, not errors; `Err` means the run itself could not continue, in
    /// which case rows already written are kept.
    pub async fn run<I, S>(&self, urls: I) -> Result<CorpusResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Arc<Vec<String>> = Arc::new(urls.into_iter().map(Into::into).collect());
        let layout = OutputLayout::new(&self.config.output_dir);
        layout.prepare()?;

        if let Some(deadline) = self.config.corpus_timeout {
            self.cancel.cancel_after(deadline);
        }

        let pool = self.config.concurrency_limit.min(urls.len());
        info!(
            "processing {} URLs with {} workers into {}",
            urls.len(),
            pool,
            layout.root().display()
        );

        // Every render context must come up before any work starts
        let workers = try_join_all((0..pool).map(|id| {
            RenderWorker::spawn(id, self.factory.clone(), self.config.render_config(), self.cancel.clone())
        }))
        .await?;

        let schema = TableSchema::new(self.config.cluster_count, self.metadata.keys());
        let mut writer = CorpusWriter::create(layout.clone(), schema, self.config.output_format)?;
        let (tx, mut rx) = mpsc::channel::<WriterMessage>(pool.max(1) * 2);

        let writer_cancel = self.cancel.clone();
        let writer_config = self.config.clone();
        let writer_task = tokio::task::spawn_blocking(move || {
            while let Some(message) = rx.blocking_recv() {
                if let Err(e) = writer.record(message) {
                    error!("cannot write output, stopping the run: {}", e);
                    writer_cancel.cancel();
                    writer.abandon();
                    return Err(e);
                }
            }
            let cancelled = writer_cancel.is_cancelled();
            writer.finish(&writer_config, cancelled)
        });

        let ctx = Arc::new(JobContext {
            config: self.config.clone(),
            metadata: self.metadata.clone(),
            layout,
            policy: RetryPolicy::new(self.config.max_retries, self.config.retry_backoff),
            cancel: self.cancel.clone(),
            total: urls.len(),
        });
        let cursor = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| {
                let ctx = ctx.clone();
                let urls = urls.clone();
                let cursor = cursor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = work_loop(&ctx, &worker, &urls, &cursor, &tx).await;
                    let id = worker.id();
                    if let Err(e) = worker.close().await {
                        warn!("render worker {} did not close cleanly: {}", id, e);
                    }
                    outcome
                })
            })
            .collect();
        drop(tx);

        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    self.cancel.cancel();
                    first_error.get_or_insert(Error::WorkerError(format!("worker task failed: {}", e)));
                }
            }
        }

        let written = writer_task
            .await
            .map_err(|e| Error::WorkerError(format!("writer task failed: {}", e)))?;
        if let Some(e) = first_error {
            return Err(e);
        }
        let result = written?;
        info!(
            "run finished: {} rows ({} succeeded, {} partial, {} failed){}",
            result.len(),
            result.count(job::JobStatus::Succeeded),
            result.count(job::JobStatus::Partial),
            result.count(job::JobStatus::Failed),
            if self.cancel.is_cancelled() { ", cancelled" } else { "" }
        );
        Ok(result)
    }
}

async fn work_loop(
    ctx: &JobContext,
    worker: &RenderWorker,
    urls: &[String],
    cursor: &AtomicUsize,
    tx: &mpsc::Sender<WriterMessage>,
) -> Result<()> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(url) = urls.get(index) else {
            return Ok(());
        };

        let message = match process_job(ctx, worker, index, url).await {
            Ok(Some(record)) => WriterMessage::Record(Box::new(record)),
            Ok(None) => {
                info!("[{}/{}] {} aborted", index + 1, ctx.total, url);
                WriterMessage::Skipped(index)
            }
            Err(e) => {
                ctx.cancel.cancel();
                return Err(e);
            }
        };
        // A closed channel means the writer failed and reports why itself
        if tx.send(message).await.is_err() {
            return Ok(());
        }
    }
}

/// Run one URL through every stage. `None` means the job was cancelled at a
/// stage boundary and produces no row.
async fn process_job(ctx: &JobContext, worker: &RenderWorker, index: usize, url: &str) -> Result<Option<JobRecord>> {
    let mut job = PageJob::new(index, url);
    let page_slug = slug(url);
    let metadata = ctx.metadata.get(url).cloned();
    info!("[{}/{}] {}", index + 1, ctx.total, url);

    let target = match parse_target(url) {
        Ok(target) => target,
        Err(e) => {
            warn!("[{}/{}] skipping: {}", index + 1, ctx.total, e);
            job.fail(e.to_string())?;
            return assemble_stage(ctx, failed_artifacts(job, page_slug, metadata)).await.map(Some);
        }
    };

    let image = match render_with_retries(ctx, worker, &mut job, &target).await? {
        RenderOutcome::Captured(image) => image,
        RenderOutcome::Failed(err) => {
            job.fail(err.to_string())?;
            return assemble_stage(ctx, failed_artifacts(job, page_slug, metadata)).await.map(Some);
        }
        RenderOutcome::Aborted => return Ok(None),
    };

    if ctx.cancel.is_cancelled() {
        return Ok(None);
    }
    job.start_analysis()?;
    let image = Arc::new(image);
    let (clusters, saliency_map) = tokio::join!(
        quantize_stage(image.clone(), ctx.config.cluster_count, url_seed(url), ctx.config.max_samples, ctx.config.stage_timeout),
        saliency_stage(image.clone(), ctx.config.stage_timeout),
    );
    if ctx.cancel.is_cancelled() {
        return Ok(None);
    }

    let mut problems = Vec::new();
    let clusters = match clusters {
        Ok(c) => Some(c),
        Err(e) => {
            problems.push(format!("quantization: {}", e));
            None
        }
    };
    let saliency_map = match saliency_map {
        Ok(m) => Some(m),
        Err(e) => {
            problems.push(format!("saliency: {}", e));
            None
        }
    };
    if problems.is_empty() {
        job.succeed()?;
    } else {
        warn!("[{}/{}] {} partial: {}", index + 1, ctx.total, url, problems.join("; "));
        job.partial(problems.join("; "))?;
    }

    let artifacts = PageArtifacts {
        job,
        slug: page_slug,
        image: Some(image),
        clusters,
        saliency: saliency_map,
        metadata,
    };
    assemble_stage(ctx, artifacts).await.map(Some)
}

fn failed_artifacts(job: PageJob, slug: String, metadata: Option<MetadataRecord>) -> PageArtifacts {
    PageArtifacts {
        job,
        slug,
        image: None,
        clusters: None,
        saliency: None,
        metadata,
    }
}

async fn render_with_retries(
    ctx: &JobContext,
    worker: &RenderWorker,
    job: &mut PageJob,
    target: &Url,
) -> Result<RenderOutcome> {
    // The renderer enforces `stage_timeout` itself and reports which wait ran
    // out; this guard only catches a renderer that overruns its own budget.
    let limit = render_guard(ctx.config.stage_timeout);
    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(RenderOutcome::Aborted);
        }
        job.start_render()?;
        debug!("rendering {} (attempt {})", target, job.attempt_count());

        let result = match tokio::time::timeout(limit, worker.capture(target)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout(limit.as_millis() as u64)),
        };
        let err = match result {
            Ok(image) => return Ok(RenderOutcome::Captured(image)),
            Err(RenderError::Cancelled) => return Ok(RenderOutcome::Aborted),
            Err(e) => e,
        };

        if !ctx.policy.should_retry(&err, job.attempt_count()) {
            warn!("{} failed after {} attempt(s): {}", target, job.attempt_count(), err);
            return Ok(RenderOutcome::Failed(err));
        }
        let delay = ctx.policy.backoff(job.attempt_count());
        warn!("{} failed ({}), retrying in {:?}", target, err, delay);
        if !ctx.cancel.sleep(delay).await {
            return Ok(RenderOutcome::Aborted);
        }
    }
}

/// Outer bound on one capture: the renderer's own budget plus a grace period
/// for teardown and image decoding.
fn render_guard(stage_timeout: Duration) -> Duration {
    stage_timeout + (stage_timeout / 4).clamp(RENDER_GRACE_MIN, RENDER_GRACE_MAX)
}

#[derive(Debug, PartialEq)]
enum StageFault {
    TimedOut(u64),
    Crashed(String),
}

/// Run CPU-bound work off the async threads under `limit`. A panic inside
/// `work` fails this stage only.
async fn run_blocking<T, F>(limit: Duration, work: F) -> std::result::Result<T, StageFault>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join)) => Err(StageFault::Crashed(match join.try_into_panic() {
            Ok(payload) => panic_message(payload.as_ref()),
            Err(join) => join.to_string(),
        })),
        Err(_) => Err(StageFault::TimedOut(limit.as_millis() as u64)),
    }
}

async fn quantize_stage(
    image: Arc<RasterImage>,
    k: usize,
    seed: u64,
    max_samples: usize,
    limit: Duration,
) -> std::result::Result<Vec<ColorCluster>, QuantizationError> {
    match run_blocking(limit, move || quantize_sampled(&image, k, seed, max_samples)).await {
        Ok(result) => result,
        Err(StageFault::TimedOut(ms)) => Err(QuantizationError::Timeout(ms)),
        Err(StageFault::Crashed(msg)) => Err(QuantizationError::Failed(msg)),
    }
}

async fn saliency_stage(image: Arc<RasterImage>, limit: Duration) -> std::result::Result<SaliencyMap, SaliencyError> {
    match run_blocking(limit, move || saliency::estimate(&image)).await {
        Ok(result) => result,
        Err(StageFault::TimedOut(ms)) => Err(SaliencyError::Timeout(ms)),
        Err(StageFault::Crashed(msg)) => Err(SaliencyError::Failed(msg)),
    }
}

async fn assemble_stage(ctx: &JobContext, artifacts: PageArtifacts) -> Result<JobRecord> {
    let job = artifacts.job.clone();
    let layout = ctx.layout.clone();
    let report = tokio::task::spawn_blocking(move || assemble(artifacts, &layout))
        .await
        .map_err(|e| Error::WorkerError(format!("assembly task failed: {}", e)))??;
    info!("[{}/{}] {} -> {}", job.index() + 1, ctx.total, job.url(), job.status());
    Ok(JobRecord { job, report })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_stage_fails_alone() {
        let fault = run_blocking(Duration::from_secs(5), || -> u32 { panic!("histogram overflow") })
            .await
            .unwrap_err();
        assert_eq!(fault, StageFault::Crashed("histogram overflow".into()));

        let value = run_blocking(Duration::from_secs(5), || 7u32).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn slow_stage_times_out() {
        let fault = run_blocking(Duration::from_millis(20), || std::thread::sleep(Duration::from_millis(500)))
            .await
            .unwrap_err();
        assert_eq!(fault, StageFault::TimedOut(20));
    }

    #[tokio::test]
    async fn empty_capture_is_a_stage_error() {
        let image = Arc::new(RasterImage::solid(0, 0, [0, 0, 0]));
        let clusters = quantize_stage(image.clone(), 3, 1, 1000, Duration::from_secs(5)).await;
        assert_eq!(clusters.unwrap_err(), QuantizationError::EmptyImage);
        let map = saliency_stage(image, Duration::from_secs(5)).await;
        assert!(matches!(map.unwrap_err(), SaliencyError::UnsupportedFormat(_)));
    }

    #[test]
    fn render_guard_outlasts_the_renderer() {
        for secs in [1, 10, 60, 600] {
            let budget = Duration::from_secs(secs);
            assert!(render_guard(budget) > budget);
        }
        assert_eq!(render_guard(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(render_guard(Duration::from_secs(600)), Duration::from_secs(615));
    }
}
