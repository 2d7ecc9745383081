use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::archive::{self, Records};
use crate::error::{AppError, DecodeError};
use crate::models::{OutputPair, RecordReference};
use crate::price::{self, PricePairs};
use crate::traits::{FetcherFactory, RangeFetcher, TextExtractor};

/// What to do when a reference cannot be fetched or decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Yield the error and end the partition; later references are not read.
    #[default]
    Abort,
    /// Log and count the failure, then continue with the next reference.
    Skip,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(AppError::ConfigError(format!(
                "unknown failure policy '{other}' (expected 'abort' or 'skip')"
            ))),
        }
    }
}

/// Per-partition settings.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub partition_id: String,
    pub failure_policy: FailurePolicy,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_id: "partition-0".to_string(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl PartitionConfig {
    pub fn with_partition_id(mut self, id: impl Into<String>) -> Self {
        self.partition_id = id.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Counts for one partition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// References pulled from the input, including failed ones.
    pub references: u64,
    pub failed_references: u64,
    pub captures: u64,
    pub pairs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    references: AtomicU64,
    failed_references: AtomicU64,
    captures: AtomicU64,
    pairs: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PartitionStats {
        PartitionStats {
            references: self.references.load(Ordering::Relaxed),
            failed_references: self.failed_references.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            pairs: self.pairs.load(Ordering::Relaxed),
        }
    }
}

/// Events emitted while a partition runs.
#[derive(Debug, Clone)]
pub enum PartitionEvent<'a> {
    Started {
        partition_id: &'a str,
    },
    ReferenceFetched {
        partition_id: &'a str,
        reference: &'a RecordReference,
        bytes: usize,
    },
    ReferenceFailed {
        partition_id: &'a str,
        reference: &'a RecordReference,
        error: &'a AppError,
        skipped: bool,
    },
    Finished {
        partition_id: &'a str,
        stats: PartitionStats,
        aborted: bool,
    },
}

/// Trait for receiving partition events (decoupled logging).
pub trait PartitionReporter: Send + Sync {
    fn report(&self, event: PartitionEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPartitionReporter;

impl PartitionReporter for TracingPartitionReporter {
    fn report(&self, event: PartitionEvent<'_>) {
        match event {
            PartitionEvent::Started { partition_id } => {
                tracing::info!(%partition_id, "Partition started");
            }
            PartitionEvent::ReferenceFetched {
                partition_id,
                reference,
                bytes,
            } => {
                tracing::debug!(%partition_id, %reference, bytes, "Fetched record span");
            }
            PartitionEvent::ReferenceFailed {
                partition_id,
                reference,
                error,
                skipped,
            } => {
                let transient = error.is_transient();
                if skipped {
                    tracing::warn!(%partition_id, %reference, %error, transient, "Skipping reference");
                } else {
                    tracing::error!(%partition_id, %reference, %error, transient, "Reference failed, aborting partition");
                }
            }
            PartitionEvent::Finished {
                partition_id,
                stats,
                aborted,
            } => {
                tracing::info!(
                    %partition_id,
                    references = stats.references,
                    failed = stats.failed_references,
                    captures = stats.captures,
                    pairs = stats.pairs,
                    aborted,
                    "Partition finished"
                );
            }
        }
    }
}

/// Runs the fetch → decode → text → price pipeline over one partition.
///
/// Generic over the fetch client factory and the text extractor, so the
/// pipeline can be driven without network access in tests.
pub struct PartitionProcessor<FF, X, R = TracingPartitionReporter> {
    factory: FF,
    extractor: X,
    reporter: R,
    config: PartitionConfig,
}

impl<FF, X> PartitionProcessor<FF, X>
where
    FF: FetcherFactory,
    X: TextExtractor + 'static,
{
    pub fn new(factory: FF, extractor: X, config: PartitionConfig) -> Self {
        Self {
            factory,
            extractor,
            reporter: TracingPartitionReporter,
            config,
        }
    }
}

impl<FF, X, R> PartitionProcessor<FF, X, R>
where
    FF: FetcherFactory,
    X: TextExtractor + 'static,
    R: PartitionReporter + Clone + 'static,
{
    /// Replace the event reporter.
    pub fn with_reporter<R2>(self, reporter: R2) -> PartitionProcessor<FF, X, R2>
    where
        R2: PartitionReporter + Clone + 'static,
    {
        PartitionProcessor {
            factory: self.factory,
            extractor: self.extractor,
            reporter,
            config: self.config,
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Process `references` in order, yielding output pairs as they are found.
    ///
    /// One fetch client is created here and owned by the returned stream;
    /// it is dropped when the stream finishes or is dropped. Nothing is
    /// fetched until the stream is polled.
    pub fn process<I>(&self, references: I) -> Result<PairStream, AppError>
    where
        I: IntoIterator<Item = RecordReference>,
        I::IntoIter: Send + 'static,
    {
        let fetcher = self.factory.create()?;
        let counters = Arc::new(Counters::default());

        self.reporter.report(PartitionEvent::Started {
            partition_id: &self.config.partition_id,
        });

        let state = RunState {
            partition_id: self.config.partition_id.clone(),
            policy: self.config.failure_policy,
            fetcher,
            extractor: self.extractor.clone(),
            reporter: self.reporter.clone(),
            references: references.into_iter(),
            current: None,
            counters: Arc::clone(&counters),
            finished: false,
        };

        let inner = stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        })
        .boxed();

        Ok(PairStream { inner, counters })
    }
}

/// Lazy stream of output pairs for one partition.
///
/// Under [`FailurePolicy::Abort`] a fetch or decode failure is yielded as
/// an `Err` item and the stream ends after it.
pub struct PairStream {
    inner: BoxStream<'static, Result<OutputPair, AppError>>,
    counters: Arc<Counters>,
}

impl PairStream {
    /// Counts so far; final once the stream has ended.
    pub fn stats(&self) -> PartitionStats {
        self.counters.snapshot()
    }
}

impl Stream for PairStream {
    type Item = Result<OutputPair, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

struct RunState<F, X, R, I> {
    partition_id: String,
    policy: FailurePolicy,
    fetcher: F,
    extractor: X,
    reporter: R,
    references: I,
    current: Option<SpanPairs>,
    counters: Arc<Counters>,
    finished: bool,
}

impl<F, X, R, I> RunState<F, X, R, I>
where
    F: RangeFetcher,
    X: TextExtractor,
    R: PartitionReporter,
    I: Iterator<Item = RecordReference>,
{
    async fn next_item(&mut self) -> Option<Result<OutputPair, AppError>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(span) = self.current.as_mut() {
                match span.next_pair(&self.extractor, &self.counters) {
                    Some(Ok(pair)) => {
                        Counters::bump(&self.counters.pairs);
                        return Some(Ok(pair));
                    }
                    Some(Err(error)) => {
                        let reference = span.reference.clone();
                        self.current = None;
                        if let Some(error) = self.fail(&reference, error.into()) {
                            return Some(Err(error));
                        }
                    }
                    None => self.current = None,
                }
                continue;
            }

            let Some(reference) = self.references.next() else {
                self.finish(false);
                return None;
            };
            Counters::bump(&self.counters.references);

            let fetched = self
                .fetcher
                .fetch(&reference.object_key, reference.offset, reference.length)
                .await;

            match fetched {
                Ok(raw) => {
                    self.reporter.report(PartitionEvent::ReferenceFetched {
                        partition_id: &self.partition_id,
                        reference: &reference,
                        bytes: raw.len(),
                    });
                    self.current = Some(SpanPairs {
                        reference,
                        records: archive::decode(raw),
                        pairs: None,
                    });
                }
                Err(error) => {
                    if let Some(error) = self.fail(&reference, error.into()) {
                        return Some(Err(error));
                    }
                }
            }
        }
    }

    /// Record a failed reference. Returns the error if the partition must stop.
    fn fail(&mut self, reference: &RecordReference, error: AppError) -> Option<AppError> {
        Counters::bump(&self.counters.failed_references);
        let skipped = self.policy == FailurePolicy::Skip;
        self.reporter.report(PartitionEvent::ReferenceFailed {
            partition_id: &self.partition_id,
            reference,
            error: &error,
            skipped,
        });

        if skipped {
            None
        } else {
            self.finish(true);
            Some(error)
        }
    }

    fn finish(&mut self, aborted: bool) {
        self.finished = true;
        self.current = None;
        self.reporter.report(PartitionEvent::Finished {
            partition_id: &self.partition_id,
            stats: self.counters.snapshot(),
            aborted,
        });
    }
}

/// Pairs still to come from one fetched span.
struct SpanPairs {
    reference: RecordReference,
    records: Records,
    pairs: Option<PricePairs>,
}

impl SpanPairs {
    fn next_pair<X: TextExtractor>(
        &mut self,
        extractor: &X,
        counters: &Counters,
    ) -> Option<Result<OutputPair, DecodeError>> {
        loop {
            if let Some(pair) = self.pairs.as_mut().and_then(Iterator::next) {
                return Some(Ok(pair));
            }
            self.pairs = None;

            match self.records.next()? {
                Ok(capture) => {
                    Counters::bump(&counters.captures);
                    let text = extractor.extract(&capture);
                    tracing::debug!(
                        target_uri = capture.target_uri.as_deref().unwrap_or("-"),
                        record_type = capture.record_type.as_str(),
                        text_bytes = text.len(),
                        "Extracted capture text"
                    );
                    self.pairs = Some(price::extract_pairs(&text));
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }
}
