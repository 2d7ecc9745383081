use bytes::Bytes;
use pricewin_core::error::{AppError, FetchError};
use pricewin_core::models::ByteRange;
use pricewin_core::traits::{FetcherFactory, RangeFetcher};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};

use crate::config::FetchConfig;

/// HTTP range fetcher using reqwest.
///
/// Sends `Range: bytes=a-b` against `<endpoint><key>`. A `206` body is
/// returned as-is; a store that ignores the header and answers `200` has
/// the requested span sliced out of the full body.
#[derive(Clone)]
pub struct HttpRangeFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpRangeFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, AppError> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn map_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.config.timeout.unwrap_or_default())
        } else if e.is_connect() {
            FetchError::NetworkError(format!("Connection failed: {e}"))
        } else {
            FetchError::HttpError(e.to_string())
        }
    }
}

impl RangeFetcher for HttpRangeFetcher {
    async fn fetch_range(&self, object_key: &str, range: ByteRange) -> Result<Bytes, FetchError> {
        let url = self.config.object_url(object_key)?;
        tracing::debug!(%url, %range, "Range GET");

        let response = self
            .client
            .get(url)
            .header(RANGE, range.to_string())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    key: object_key.to_string(),
                });
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(FetchError::RangeNotSatisfiable {
                    key: object_key.to_string(),
                    range,
                });
            }
            s if !s.is_success() => {
                return Err(FetchError::HttpError(format!(
                    "HTTP {} for {}",
                    s.as_u16(),
                    object_key
                )));
            }
            _ => {}
        }

        let body = response.bytes().await.map_err(|e| match self.map_error(e) {
            FetchError::HttpError(msg) => {
                FetchError::HttpError(format!("Failed to read response body: {msg}"))
            }
            other => other,
        })?;

        if status == StatusCode::OK {
            tracing::debug!(
                key = object_key,
                body_len = body.len(),
                "Store ignored Range header, slicing full body"
            );
            return Ok(slice_span(body, range));
        }

        Ok(body)
    }
}

/// `[offset, offset+length)` of a full-object body, clamped to its length.
fn slice_span(body: Bytes, range: ByteRange) -> Bytes {
    let len = body.len();
    let start = usize::try_from(range.start).map_or(len, |s| s.min(len));
    let end = usize::try_from(range.end)
        .ok()
        .and_then(|e| e.checked_add(1))
        .map_or(len, |e| e.min(len));
    body.slice(start..end.max(start))
}

/// Builds one [`HttpRangeFetcher`] per partition from a shared config.
#[derive(Debug, Clone)]
pub struct HttpFetcherFactory {
    config: FetchConfig,
}

impl HttpFetcherFactory {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }
}

impl FetcherFactory for HttpFetcherFactory {
    type Fetcher = HttpRangeFetcher;

    fn create(&self) -> Result<Self::Fetcher, AppError> {
        HttpRangeFetcher::new(self.config.clone())
    }
}
