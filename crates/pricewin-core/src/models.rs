use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{AppError, FetchError};

/// One byte span inside a named remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReference {
    pub object_key: String,
    pub offset: u64,
    pub length: u64,
}

impl RecordReference {
    /// Build a reference, enforcing `length > 0` and a representable end offset.
    pub fn new(object_key: impl Into<String>, offset: u64, length: u64) -> Result<Self, AppError> {
        let object_key = object_key.into();
        if object_key.trim().is_empty() {
            return Err(AppError::InvalidReference("object key is empty".into()));
        }
        ByteRange::for_span(offset, length)
            .map_err(|e| AppError::InvalidReference(format!("{object_key}: {e}")))?;

        Ok(Self {
            object_key,
            offset,
            length,
        })
    }

    /// Parse the `(key, offset, length)` string triple handed over by the
    /// orchestration layer. Offset and length are decimal integers.
    pub fn parse(object_key: &str, offset: &str, length: &str) -> Result<Self, AppError> {
        let offset: u64 = offset.trim().parse().map_err(|_| {
            AppError::InvalidReference(format!(
                "{object_key}: offset '{offset}' is not a non-negative integer"
            ))
        })?;
        let length: u64 = length.trim().parse().map_err(|_| {
            AppError::InvalidReference(format!(
                "{object_key}: length '{length}' is not a non-negative integer"
            ))
        })?;
        Self::new(object_key, offset, length)
    }

    pub fn byte_range(&self) -> ByteRange {
        // Validated in `new`; the fields are public though, so recompute.
        ByteRange {
            start: self.offset,
            end: self.offset.saturating_add(self.length.saturating_sub(1)),
        }
    }
}

impl fmt::Display for RecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}+{}", self.object_key, self.offset, self.length)
    }
}

/// Inclusive byte range, rendered as an HTTP `Range` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering `length` bytes starting at `offset`: `[offset, offset+length-1]`.
    pub fn for_span(offset: u64, length: u64) -> Result<Self, FetchError> {
        if length == 0 {
            return Err(FetchError::InvalidRange(format!(
                "length must be greater than 0 (offset {offset})"
            )));
        }
        let end = offset.checked_add(length - 1).ok_or_else(|| {
            FetchError::InvalidRange(format!("offset {offset} + length {length} overflows"))
        })?;
        Ok(Self { start: offset, end })
    }

    pub fn offset(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FetchError::InvalidRange(format!("cannot parse range '{s}'"));

        let bounds = s.strip_prefix("bytes=").ok_or_else(invalid)?;
        let (start, end) = bounds.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end: u64 = end.parse().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

/// WARC record types that carry page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Response,
    Resource,
    Conversion,
}

impl RecordType {
    /// Map a `WARC-Type` value; `None` for metadata-only record types.
    pub fn from_warc_type(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "response" => Some(Self::Response),
            "resource" => Some(Self::Resource),
            "conversion" => Some(Self::Conversion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Resource => "resource",
            Self::Conversion => "conversion",
        }
    }
}

/// One decoded page: payload bytes plus the header metadata needed to pick
/// a character encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCapture {
    pub record_type: RecordType,
    pub target_uri: Option<String>,
    pub content_type: Option<String>,
    /// Charset named in the HTTP (or WARC) `Content-Type` header.
    pub charset_hint: Option<String>,
    pub body: Bytes,
}

impl PageCapture {
    /// A bare `resource` capture with no header metadata.
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        Self {
            record_type: RecordType::Resource,
            target_uri: None,
            content_type: None,
            charset_hint: None,
            body: body.into(),
        }
    }
}

/// Character-index window `[start, end)` into extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    /// Slice `text` by character indices. Out-of-range bounds are clamped.
    pub fn slice(&self, text: &str) -> String {
        text.chars()
            .skip(self.start)
            .take(self.end.saturating_sub(self.start))
            .collect()
    }
}

/// A (title, price) candidate. Either side may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutputPair {
    pub title: Option<String>,
    pub price: Option<String>,
}
