pub mod archive;
pub mod error;
pub mod models;
pub mod partition;
pub mod price;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{AppError, DecodeError, ExtractionFailure, FetchError};
pub use models::{ByteRange, OutputPair, PageCapture, RecordReference, RecordType, Window};
pub use partition::{
    FailurePolicy, PairStream, PartitionConfig, PartitionEvent, PartitionProcessor,
    PartitionReporter, PartitionStats, TracingPartitionReporter,
};
pub use price::extract_pairs;
pub use traits::{FetcherFactory, RangeFetcher, TextExtractor};
