//! WARC record decoding.
//!
//! A fetched span holds one or more WARC records, each usually wrapped in
//! its own gzip member. [`decode`] returns a lazy iterator over the content
//! records in the span; `warcinfo`, `request`, `metadata` and `revisit`
//! records are skipped.
//!
//! Spans cut short by the store end the iterator without an error. Only
//! bytes that cannot be a WARC record at all produce a [`DecodeError`],
//! after which the iterator is fused.

use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, MultiGzDecoder, ZlibDecoder};

use crate::error::DecodeError;
use crate::models::{PageCapture, RecordType};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const WARC_MAGIC: &[u8] = b"WARC/";
const HTTP_MAGIC: &[u8] = b"HTTP/";
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Decode the page captures packed in `span`.
///
/// Nothing is parsed (or inflated) until the first call to `next`.
pub fn decode(span: Bytes) -> Records {
    Records {
        pending: Some(span),
        buf: Bytes::new(),
        pos: 0,
        done: false,
    }
}

/// Lazy sequence of [`PageCapture`]s from one span.
pub struct Records {
    pending: Option<Bytes>,
    buf: Bytes,
    pos: usize,
    done: bool,
}

impl Iterator for Records {
    type Item = Result<PageCapture, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(span) = self.pending.take() {
            match inflate_span(span) {
                Ok(buf) => self.buf = buf,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        loop {
            match self.next_block() {
                Ok(Some(block)) => {
                    if let Some(capture) = block.into_capture() {
                        return Some(Ok(capture));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl FusedIterator for Records {}

impl Records {
    fn next_block(&mut self) -> Result<Option<Block>, DecodeError> {
        let buf = &self.buf[..];

        let mut start = self.pos;
        while start < buf.len() && matches!(buf[start], b'\r' | b'\n') {
            start += 1;
        }
        let rest = &buf[start..];
        if rest.is_empty() {
            return Ok(None);
        }

        if !rest.starts_with(WARC_MAGIC) {
            if WARC_MAGIC.starts_with(rest) {
                tracing::debug!(offset = start, "Span ends inside a record version line");
                return Ok(None);
            }
            return Err(DecodeError::BadMagic { offset: start });
        }

        let Some(head_len) = find(rest, HEAD_END) else {
            tracing::debug!(offset = start, "Span ends inside record headers");
            return Ok(None);
        };

        let head = String::from_utf8_lossy(&rest[..head_len]);
        // First line is the version ("WARC/1.0").
        let headers = Headers::parse(head.split("\r\n").skip(1), true).map_err(|reason| {
            DecodeError::MalformedHeader {
                offset: start,
                reason,
            }
        })?;

        let raw_length = headers
            .get("Content-Length")
            .ok_or(DecodeError::MissingContentLength { offset: start })?;
        let content_length: usize =
            raw_length
                .trim()
                .parse()
                .map_err(|_| DecodeError::InvalidContentLength {
                    offset: start,
                    value: raw_length.to_string(),
                })?;

        let content_start = start + head_len + HEAD_END.len();
        let Some(content_end) = content_start
            .checked_add(content_length)
            .filter(|&end| end <= buf.len())
        else {
            tracing::debug!(
                offset = start,
                content_length,
                available = buf.len() - content_start,
                "Span ends inside record content"
            );
            return Ok(None);
        };

        self.pos = content_end;
        Ok(Some(Block {
            offset: start,
            headers,
            content: self.buf.slice(content_start..content_end),
        }))
    }
}

struct Block {
    offset: usize,
    headers: Headers,
    content: Bytes,
}

impl Block {
    fn into_capture(self) -> Option<PageCapture> {
        let warc_type = self.headers.get("WARC-Type").unwrap_or_default();
        let Some(record_type) = RecordType::from_warc_type(warc_type) else {
            tracing::debug!(offset = self.offset, %warc_type, "Skipping non-content record");
            return None;
        };

        let target_uri = self.headers.get("WARC-Target-URI").map(str::to_owned);
        let block_type = self.headers.get("Content-Type");

        let is_http = record_type == RecordType::Response
            && block_type.is_some_and(|ct| {
                ct.trim()
                    .to_ascii_lowercase()
                    .starts_with("application/http")
            });

        if is_http {
            if let Some(payload) = HttpPayload::split(&self.content) {
                return Some(PageCapture {
                    record_type,
                    target_uri,
                    charset_hint: payload.content_type.as_deref().and_then(charset_from_content_type),
                    content_type: payload.content_type,
                    body: payload.body,
                });
            }
            tracing::debug!(offset = self.offset, "No HTTP head in response record");
        }

        Some(PageCapture {
            record_type,
            target_uri,
            content_type: block_type.map(str::to_owned),
            charset_hint: block_type.and_then(charset_from_content_type),
            body: self.content,
        })
    }
}

/// The entity body of an `application/http` response block.
struct HttpPayload {
    content_type: Option<String>,
    body: Bytes,
}

impl HttpPayload {
    fn split(block: &Bytes) -> Option<Self> {
        if !block.starts_with(HTTP_MAGIC) {
            return None;
        }
        let head_len = find(block, HEAD_END)?;
        let head = String::from_utf8_lossy(&block[..head_len]);
        // Lenient: lines without ':' are dropped.
        let headers = Headers::parse(head.split("\r\n").skip(1), false).ok()?;

        let mut body = block.slice(head_len + HEAD_END.len()..);

        if headers
            .get("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
        {
            match dechunk(&body) {
                Some(joined) => body = Bytes::from(joined),
                None => tracing::debug!("Body is not validly chunked, keeping raw bytes"),
            }
        }

        if let Some(encoding) = headers.get("Content-Encoding") {
            match decompress(encoding, &body) {
                Some(plain) => body = Bytes::from(plain),
                None => tracing::debug!(%encoding, "Cannot undo content encoding, keeping raw bytes"),
            }
        }

        Some(Self {
            content_type: headers.get("Content-Type").map(str::to_owned),
            body,
        })
    }
}

/// Header fields in arrival order, looked up case-insensitively.
#[derive(Debug, Default)]
struct Headers(Vec<(String, String)>);

impl Headers {
    fn parse<'a>(lines: impl Iterator<Item = &'a str>, strict: bool) -> Result<Self, String> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.starts_with([' ', '\t']) {
                match fields.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None if strict => return Err("continuation line before any field".into()),
                    None => {}
                }
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => fields.push((name.trim().to_string(), value.trim().to_string())),
                None if strict => return Err(format!("line without ':' ({line:.40})")),
                None => {}
            }
        }
        Ok(Self(fields))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Extract the `charset` parameter of a `Content-Type` value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches(['"', '\'']).to_string())
        })
        .filter(|charset| !charset.is_empty())
}

fn inflate_span(span: Bytes) -> Result<Bytes, DecodeError> {
    if !span.starts_with(&GZIP_MAGIC) {
        return Ok(span);
    }

    let (inflated, error) = read_tolerant(MultiGzDecoder::new(&span[..]));
    if let Some(e) = error {
        if inflated.is_empty() && e.kind() != ErrorKind::UnexpectedEof {
            return Err(DecodeError::Gzip(e.to_string()));
        }
        tracing::debug!(error = %e, inflated = inflated.len(), "Gzip stream ended early");
    }
    Ok(Bytes::from(inflated))
}

fn decompress(encoding: &str, body: &[u8]) -> Option<Vec<u8>> {
    let attempt = |(out, error): (Vec<u8>, Option<std::io::Error>)| {
        (error.is_none() || !out.is_empty()).then_some(out)
    };

    match encoding.trim().to_ascii_lowercase().as_str() {
        "identity" | "" => Some(body.to_vec()),
        "gzip" | "x-gzip" => attempt(read_tolerant(GzDecoder::new(body))),
        // "deflate" is zlib-wrapped per RFC, but raw deflate is common in the wild.
        "deflate" => attempt(read_tolerant(ZlibDecoder::new(body)))
            .or_else(|| attempt(read_tolerant(DeflateDecoder::new(body)))),
        _ => None,
    }
}

/// Join the chunks of a `Transfer-Encoding: chunked` body.
///
/// Returns `None` if the first size line is missing or not hex. A body
/// truncated anywhere after that keeps the chunk bytes that are present.
fn dechunk(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut pos = 0;
    let mut chunks = 0usize;

    loop {
        let Some((size, line_len)) = chunk_size_line(&body[pos..]) else {
            return (chunks > 0).then_some(out);
        };
        pos += line_len;
        chunks += 1;

        if size == 0 {
            return Some(out);
        }

        let end = pos.saturating_add(size);
        if end >= body.len() {
            out.extend_from_slice(&body[pos..body.len().min(end)]);
            return Some(out);
        }
        out.extend_from_slice(&body[pos..end]);
        pos = end;
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
    }
}

/// Parse `<hex>[;ext]\r\n`, returning the chunk size and the line length.
fn chunk_size_line(rest: &[u8]) -> Option<(usize, usize)> {
    let line_end = find(rest, b"\r\n")?;
    let line = std::str::from_utf8(&rest[..line_end]).ok()?;
    let size_field = line.split(';').next().unwrap_or_default().trim();
    let size = usize::from_str_radix(size_field, 16).ok()?;
    Some((size, line_end + 2))
}

/// Read until EOF or the first error, keeping everything produced so far.
fn read_tolerant<R: Read>(mut reader: R) -> (Vec<u8>, Option<std::io::Error>) {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return (out, None),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (out, Some(e)),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
