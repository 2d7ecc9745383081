//! Test utilities: mock implementations of the core traits and WARC
//! record builders.
//!
//! Mocks use `Arc<Mutex<_>>` / atomics so tests can assert on recorded calls.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{AppError, FetchError};
use crate::models::{ByteRange, PageCapture, RecordReference};
use crate::traits::{FetcherFactory, RangeFetcher, TextExtractor};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that pops queued responses and records every request.
#[derive(Clone, Default)]
pub struct MockFetcher {
    /// Each call pops the first element. If empty, returns an empty span.
    responses: Arc<Mutex<Vec<Result<Bytes, FetchError>>>>,
    pub calls: Arc<Mutex<Vec<(String, ByteRange)>>>,
}

impl MockFetcher {
    pub fn with_responses(responses: Vec<Result<Vec<u8>, FetchError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(|r| r.map(Bytes::from)).collect(),
            )),
            calls: Arc::default(),
        }
    }

    pub fn recorded_ranges(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(key, range)| format!("{key} {range}"))
            .collect()
    }
}

impl RangeFetcher for MockFetcher {
    async fn fetch_range(&self, object_key: &str, range: ByteRange) -> Result<Bytes, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((object_key.to_string(), range));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Bytes::new())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockFetcherFactory
// ---------------------------------------------------------------------------

/// Factory handing out clones of one [`MockFetcher`], tracking how many
/// have been created and how many are still alive.
#[derive(Clone, Default)]
pub struct MockFetcherFactory {
    pub fetcher: MockFetcher,
    pub created: Arc<AtomicUsize>,
    pub live: Arc<AtomicUsize>,
    fail: bool,
}

impl MockFetcherFactory {
    pub fn new(fetcher: MockFetcher) -> Self {
        Self {
            fetcher,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// A fetcher lease that decrements the factory's live count when dropped.
pub struct LeasedFetcher {
    inner: MockFetcher,
    live: Arc<AtomicUsize>,
}

impl Drop for LeasedFetcher {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RangeFetcher for LeasedFetcher {
    async fn fetch_range(&self, object_key: &str, range: ByteRange) -> Result<Bytes, FetchError> {
        self.inner.fetch_range(object_key, range).await
    }
}

impl FetcherFactory for MockFetcherFactory {
    type Fetcher = LeasedFetcher;

    fn create(&self) -> Result<Self::Fetcher, AppError> {
        if self.fail {
            return Err(AppError::ConfigError("no client for you".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(LeasedFetcher {
            inner: self.fetcher.clone(),
            live: Arc::clone(&self.live),
        })
    }
}

// ---------------------------------------------------------------------------
// PassthroughExtractor
// ---------------------------------------------------------------------------

/// Text extractor that returns the body as lossy UTF-8, untouched.
#[derive(Clone, Default)]
pub struct PassthroughExtractor;

impl TextExtractor for PassthroughExtractor {
    fn extract(&self, capture: &PageCapture) -> String {
        String::from_utf8_lossy(&capture.body).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn reference(key: &str, offset: u64, length: u64) -> RecordReference {
    RecordReference::new(key, offset, length).unwrap()
}

/// One WARC record with the given type, extra headers and content block.
pub fn warc_record(warc_type: &str, headers: &[(&str, &str)], content: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: {warc_type}\r\nWARC-Record-ID: <urn:uuid:00000000-0000-0000-0000-000000000000>\r\n"
    )
    .into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", content.len()).as_bytes());
    out.extend_from_slice(content);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// A `response` record wrapping a raw HTTP response.
pub fn response_record(target_uri: &str, http: &[u8]) -> Vec<u8> {
    warc_record(
        "response",
        &[
            ("WARC-Target-URI", target_uri),
            ("Content-Type", "application/http; msgtype=response"),
        ],
        http,
    )
}

/// A `200 OK` HTTP response with the given headers and body.
pub fn http_response(headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\n".to_vec();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Compress `data` as a single gzip member.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A gzip-member response record whose body is `html`.
pub fn page_span(target_uri: &str, html: &str) -> Vec<u8> {
    gzip(&response_record(
        target_uri,
        &http_response(&[("Content-Type", "text/html")], html.as_bytes()),
    ))
}
