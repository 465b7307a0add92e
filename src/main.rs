use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use chromascope::renderer::worker::default_factory;
use chromascope::renderer::Renderer;
use chromascope::{CancelToken, CorpusResult, MetadataIndex, Orchestrator, OutputFormat, PipelineConfig};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Csv,
    Xlsx,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Fetch HTML and paint its block layout, no browser needed
    Static,
    /// Headless Chrome (build with `--features cdp`)
    Cdp,
}

/// Screenshot, palette and saliency analysis for a list of web pages.
#[derive(Parser, Debug)]
#[command(name = "chromascope", version, about)]
struct Cli {
    /// File with one URL per line; blank lines and `#` comments are skipped
    #[arg(short, long, env = "CHROMASCOPE_INPUT")]
    input: PathBuf,

    /// Directory for the table, artifacts and summary
    #[arg(short, long, env = "CHROMASCOPE_OUTPUT_DIR", default_value = "chromascope-out")]
    output_dir: PathBuf,

    /// Table format
    #[arg(short, long, env = "CHROMASCOPE_FORMAT", value_enum, default_value_t = Format::Csv)]
    format: Format,

    /// Dominant colors per page
    #[arg(short = 'k', long, env = "CHROMASCOPE_COLORS", default_value_t = 5)]
    colors: usize,

    /// Pages processed at once (defaults to the CPU count, at most 4)
    #[arg(short = 'j', long, env = "CHROMASCOPE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Timeout for each stage of a page
    #[arg(long, env = "CHROMASCOPE_STAGE_TIMEOUT_SECS", default_value_t = 60)]
    stage_timeout_secs: u64,

    /// Extra attempts after a transient render failure
    #[arg(long, env = "CHROMASCOPE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Delay before the first retry, doubled for each further one
    #[arg(long, env = "CHROMASCOPE_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Stop starting new pages after this many seconds
    #[arg(long, env = "CHROMASCOPE_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// JSON object mapping URL to metadata fields, merged into the table
    #[arg(long, env = "CHROMASCOPE_METADATA")]
    metadata: Option<PathBuf>,

    #[arg(long, env = "CHROMASCOPE_BACKEND", value_enum, default_value_t = Backend::Static)]
    backend: Backend,

    /// Skip building summary.pdf
    #[arg(long)]
    no_document: bool,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            cluster_count: self.colors,
            output_format: match self.format {
                Format::Csv => OutputFormat::Csv,
                Format::Xlsx => OutputFormat::Spreadsheet,
            },
            concurrency_limit: self.concurrency.unwrap_or(defaults.concurrency_limit),
            stage_timeout: Duration::from_secs(self.stage_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            corpus_timeout: self.deadline_secs.map(Duration::from_secs),
            output_dir: self.output_dir.clone(),
            write_document: !self.no_document,
            ..defaults
        }
    }
}

async fn run_with<R: Renderer + 'static>(
    config: PipelineConfig,
    metadata: MetadataIndex,
    cancel: CancelToken,
    urls: Vec<String>,
) -> anyhow::Result<CorpusResult> {
    let orchestrator = Orchestrator::new(config, default_factory::<R>())?
        .with_metadata(metadata)
        .with_cancel_token(cancel);
    Ok(orchestrator.run(urls).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();
    config.validate()?;

    let urls = chromascope::read_url_list(&cli.input)
        .with_context(|| format!("reading URL list {}", cli.input.display()))?;
    let metadata = match &cli.metadata {
        Some(path) => MetadataIndex::from_json_file(path)?,
        None => MetadataIndex::default(),
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, finishing in-flight pages");
                cancel.cancel();
            }
        });
    }

    let result: CorpusResult = match cli.backend {
        #[cfg(feature = "static")]
        Backend::Static => {
            run_with::<chromascope::renderer::static_html::StaticRenderer>(config, metadata, cancel, urls).await?
        }
        #[cfg(feature = "cdp")]
        Backend::Cdp => run_with::<chromascope::renderer::cdp::CdpRenderer>(config, metadata, cancel, urls).await?,
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("backend {:?} is not compiled into this binary", other),
    };

    let manifest = result.manifest();
    println!(
        "{} rows written to {}/{}{}",
        manifest.rows,
        manifest.output_dir,
        manifest.table,
        if manifest.cancelled { " (stopped early)" } else { "" }
    );
    Ok(())
}
