use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use pricewin_client::{DEFAULT_ENDPOINT, FetchConfig, HtmlTextExtractor, HttpFetcherFactory};
use pricewin_core::{
    AppError, FailurePolicy, FetcherFactory, OutputPair, PartitionConfig, PartitionProcessor,
    PartitionStats, RecordReference, TextExtractor,
};

#[derive(Parser)]
#[command(
    name = "pricewin",
    version,
    about = "Extract price windows from web-archive records"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the referenced WARC records and write (title, price) pairs
    Extract {
        /// CSV with warc_filename, warc_record_offset, warc_record_length columns
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,

        /// Bucket endpoint that object keys are resolved against
        #[arg(long, env = "PRICEWIN_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Per-request timeout in seconds (no timeout if unset)
        #[arg(
            long,
            env = "PRICEWIN_TIMEOUT_SECS",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        timeout_secs: Option<u64>,

        /// Number of partitions processed concurrently
        #[arg(
            long,
            env = "PRICEWIN_PARTITIONS",
            default_value_t = 40,
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        partitions: u16,

        /// What to do with a reference that fails to fetch or decode
        #[arg(long, env = "PRICEWIN_ON_ERROR", default_value = "abort")]
        on_error: FailurePolicy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// `Product,Price` table
    Csv,
    /// One `{"title": ..., "price": ...}` object per line
    Jsonl,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricewin=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            input,
            output,
            format,
            endpoint,
            timeout_secs,
            partitions,
            on_error,
        } => {
            let mut config = FetchConfig::new(&endpoint).context("Invalid --endpoint")?;
            if let Some(secs) = timeout_secs {
                config = config.with_timeout(Duration::from_secs(secs));
            }
            cmd_extract(
                &input,
                output.as_deref(),
                format,
                config,
                usize::from(partitions),
                on_error,
            )
            .await?;
        }
    }

    Ok(())
}

async fn cmd_extract(
    input: &Path,
    output: Option<&Path>,
    format: OutputFormat,
    config: FetchConfig,
    partitions: usize,
    on_error: FailurePolicy,
) -> Result<()> {
    // 1. Parse every reference up front; a bad row fails before any fetch
    let references = read_references(input)?;
    let reference_count = references.len();

    // 2. Open the output before starting work
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    let mut writer = PairWriter::new(sink, format)?;

    // 3. Run partitions concurrently, one fetch client each
    let chunks = split_contiguous(references, partitions);
    let partition_count = chunks.len();
    tracing::info!(
        references = reference_count,
        partitions = partition_count,
        endpoint = %config.endpoint,
        on_error = %on_error,
        "Starting extraction"
    );

    let factory = HttpFetcherFactory::new(config);
    let tasks: Vec<_> = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let processor = PartitionProcessor::new(
                factory.clone(),
                HtmlTextExtractor::new(),
                PartitionConfig::default()
                    .with_partition_id(format!("partition-{index}"))
                    .with_failure_policy(on_error),
            );
            spawn_partition(processor, chunk)
        })
        .collect();

    // 4. Write rows in partition order as they arrive
    let summary = write_partitions(&mut writer, tasks).await?;
    writer.finish()?;

    tracing::info!(
        partitions = partition_count,
        references = summary.totals.references,
        failed = summary.totals.failed_references,
        captures = summary.totals.captures,
        pairs = summary.totals.pairs,
        aborted = summary.aborted,
        "Extraction finished"
    );

    if summary.aborted > 0 {
        anyhow::bail!("{} of {partition_count} partitions aborted", summary.aborted);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Partitions
// ---------------------------------------------------------------------------

/// Rows a partition may run ahead of the writer before it waits.
const PARTITION_BUFFER: usize = 256;

/// A spawned partition: its rows in order, then its summary.
struct PartitionTask {
    rows: mpsc::Receiver<OutputPair>,
    handle: JoinHandle<PartitionSummary>,
}

struct PartitionSummary {
    partition_id: String,
    stats: PartitionStats,
    error: Option<AppError>,
}

/// Totals over every partition of a run.
#[derive(Debug, Default)]
struct RunSummary {
    totals: PartitionStats,
    aborted: usize,
}

fn spawn_partition<FF, X>(
    processor: PartitionProcessor<FF, X>,
    references: Vec<RecordReference>,
) -> PartitionTask
where
    FF: FetcherFactory + 'static,
    X: TextExtractor + 'static,
{
    let (tx, rows) = mpsc::channel(PARTITION_BUFFER);
    let handle = tokio::spawn(run_partition(processor, references, tx));
    PartitionTask { rows, handle }
}

async fn run_partition<FF, X>(
    processor: PartitionProcessor<FF, X>,
    references: Vec<RecordReference>,
    rows: mpsc::Sender<OutputPair>,
) -> PartitionSummary
where
    FF: FetcherFactory + 'static,
    X: TextExtractor + 'static,
{
    let partition_id = processor.config().partition_id.clone();

    let mut stream = match processor.process(references) {
        Ok(stream) => stream,
        Err(error) => {
            return PartitionSummary {
                partition_id,
                stats: PartitionStats::default(),
                error: Some(error),
            };
        }
    };

    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(pair) => {
                // The writer is gone after an output error.
                if rows.send(pair).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    PartitionSummary {
        partition_id,
        stats: stream.stats(),
        error,
    }
}

/// Drain each partition's rows into `writer`, one partition after another.
///
/// Later partitions keep running meanwhile, each holding at most
/// [`PARTITION_BUFFER`] unwritten rows.
async fn write_partitions<W: Write>(
    writer: &mut PairWriter<W>,
    tasks: Vec<PartitionTask>,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for mut task in tasks {
        let mut written = 0usize;
        while let Some(pair) = task.rows.recv().await {
            writer.write(&pair)?;
            written += 1;
        }
        writer.flush()?;

        let outcome = task.handle.await.context("Partition task panicked")?;
        summary.totals.references += outcome.stats.references;
        summary.totals.failed_references += outcome.stats.failed_references;
        summary.totals.captures += outcome.stats.captures;
        summary.totals.pairs += outcome.stats.pairs;

        if let Some(error) = outcome.error {
            summary.aborted += 1;
            tracing::error!(
                partition_id = %outcome.partition_id,
                %error,
                pairs_written = written,
                "Partition aborted"
            );
        }
    }

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InputRow {
    warc_filename: String,
    warc_record_offset: String,
    warc_record_length: String,
}

/// Read record references from a CSV file with a header row.
fn read_references(path: &Path) -> Result<Vec<RecordReference>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;

    let mut references = Vec::new();
    for (index, row) in reader.deserialize::<InputRow>().enumerate() {
        // Line 1 is the header.
        let line = index + 2;
        let row = row.with_context(|| format!("Malformed input row {line}"))?;
        let reference = RecordReference::parse(
            &row.warc_filename,
            &row.warc_record_offset,
            &row.warc_record_length,
        )
        .with_context(|| format!("Invalid record reference on row {line}"))?;
        references.push(reference);
    }
    Ok(references)
}

/// Split into at most `partitions` contiguous, order-preserving chunks whose
/// sizes differ by at most one.
fn split_contiguous<T>(items: Vec<T>, partitions: usize) -> Vec<Vec<T>> {
    let count = partitions.max(1).min(items.len());
    if count == 0 {
        return Vec::new();
    }

    let base = items.len() / count;
    let extra = items.len() % count;
    let mut items = items.into_iter();
    (0..count)
        .map(|i| {
            let size = base + usize::from(i < extra);
            items.by_ref().take(size).collect()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OutputRow<'a> {
    #[serde(rename = "Product")]
    product: Option<&'a str>,
    #[serde(rename = "Price")]
    price: Option<&'a str>,
}

enum PairWriter<W: Write> {
    Csv(csv::Writer<W>),
    Jsonl(W),
}

impl<W: Write> PairWriter<W> {
    /// Wrap `inner`; the CSV header is written immediately so an empty run
    /// still produces a valid table.
    fn new(inner: W, format: OutputFormat) -> Result<Self> {
        match format {
            OutputFormat::Csv => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(inner);
                writer
                    .write_record(["Product", "Price"])
                    .context("Failed to write CSV header")?;
                Ok(Self::Csv(writer))
            }
            OutputFormat::Jsonl => Ok(Self::Jsonl(inner)),
        }
    }

    fn write(&mut self, pair: &OutputPair) -> Result<()> {
        match self {
            Self::Csv(writer) => writer
                .serialize(OutputRow {
                    product: pair.title.as_deref(),
                    price: pair.price.as_deref(),
                })
                .context("Failed to write CSV row"),
            Self::Jsonl(writer) => {
                serde_json::to_writer(&mut *writer, pair).context("Failed to write JSON line")?;
                writer.write_all(b"\n").context("Failed to write JSON line")
            }
        }
    }

    /// Push buffered rows through to the underlying writer.
    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Csv(writer) => writer.flush(),
            Self::Jsonl(writer) => writer.flush(),
        }
        .context("Failed to flush output")
    }

    fn finish(self) -> Result<W> {
        let mut inner = match self {
            Self::Csv(writer) => writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e.error()))?,
            Self::Jsonl(writer) => writer,
        };
        inner.flush().context("Failed to flush output")?;
        Ok(inner)
    }
}
