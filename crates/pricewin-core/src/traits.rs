use std::future::Future;

use bytes::Bytes;

use crate::error::{AppError, FetchError};
use crate::models::{ByteRange, PageCapture};

/// Reads an inclusive byte range out of a remote object.
pub trait RangeFetcher: Send + Sync {
    /// Issue one range read. The body is returned as the store sent it;
    /// a short read is not padded or treated as an error.
    fn fetch_range(
        &self,
        object_key: &str,
        range: ByteRange,
    ) -> impl Future<Output = Result<Bytes, FetchError>> + Send;

    /// Fetch `length` bytes at `offset`. `length == 0` is rejected before
    /// any request is made.
    fn fetch(
        &self,
        object_key: &str,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<Bytes, FetchError>> + Send {
        async move {
            let range = ByteRange::for_span(offset, length)?;
            self.fetch_range(object_key, range).await
        }
    }
}

/// Builds the fetch client owned by one partition.
///
/// Called once per [`PartitionProcessor::process`](crate::partition::PartitionProcessor::process)
/// call; the client is dropped when the returned stream ends or is dropped.
pub trait FetcherFactory: Send + Sync {
    type Fetcher: RangeFetcher + 'static;

    fn create(&self) -> Result<Self::Fetcher, AppError>;
}

/// Converts one page capture into normalized plain text.
///
/// Implementations must be total: a page that cannot be parsed yields `""`.
pub trait TextExtractor: Send + Sync + Clone {
    fn extract(&self, capture: &PageCapture) -> String;
}
