use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use pricewin_core::error::ExtractionFailure;
use pricewin_core::models::PageCapture;
use pricewin_core::traits::TextExtractor;
use regex::bytes::Regex;
use scraper::{Html, Node};

static XML_ENCODING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)^\s*<\?xml[^>]*?\bencoding\s*=\s*["']?([a-z0-9._:-]+)"#).unwrap()
});
static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]+?charset\s*=\s*["']?\s*([a-z0-9._:-]+)"#).unwrap()
});

const XML_SCAN_LIMIT: usize = 1024;
const META_SCAN_MIN: usize = 2048;

/// Elements whose subtree contributes no text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style"];

/// HTML-to-text extractor using scraper.
///
/// Decodes the body with its declared charset, drops `script`/`style`
/// subtrees and joins the remaining text nodes with single spaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTextExtractor;

impl HtmlTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for HtmlTextExtractor {
    fn extract(&self, capture: &PageCapture) -> String {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let html = decode_html(&capture.body, capture.charset_hint.as_deref());
            visible_text(&Html::parse_document(&html))
        }));

        result.unwrap_or_else(|payload| {
            let failure = ExtractionFailure::Panicked(panic_message(payload.as_ref()));
            tracing::debug!(
                target_uri = capture.target_uri.as_deref().unwrap_or("-"),
                error = %failure,
                "Text extraction failed, using empty text"
            );
            String::new()
        })
    }
}

/// Decode an HTML body to a string.
///
/// The encoding is taken from, in order: a byte-order mark, an XML
/// declaration, a `<meta>` charset, `hint`, and finally UTF-8. Malformed
/// input in the chosen encoding is re-decoded as lossy UTF-8.
pub fn decode_html(body: &[u8], hint: Option<&str>) -> String {
    let (encoding, bom_len) = detect_encoding(body, hint);
    let body = &body[bom_len..];
    match encoding.decode_without_bom_handling_and_without_replacement(body) {
        Some(text) => text.into_owned(),
        None => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Pick the encoding for `body`, returning it with the length of any BOM.
pub fn detect_encoding(body: &[u8], hint: Option<&str>) -> (&'static Encoding, usize) {
    if let Some(found) = Encoding::for_bom(body) {
        return found;
    }

    let declared = declared_label(&XML_ENCODING_RE, body, XML_SCAN_LIMIT).or_else(|| {
        declared_label(&META_CHARSET_RE, body, META_SCAN_MIN.max(body.len() / 20))
    });
    if let Some(encoding) = declared {
        // UTF-16 labels found in ASCII-readable markup resolve to UTF-8.
        return (encoding.output_encoding(), 0);
    }

    let hinted = hint.and_then(|label| Encoding::for_label(label.trim().as_bytes()));
    (hinted.unwrap_or(UTF_8), 0)
}

fn declared_label(re: &Regex, body: &[u8], limit: usize) -> Option<&'static Encoding> {
    let head = &body[..limit.min(body.len())];
    let label = re.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

/// Text nodes outside skipped elements, in document order, whitespace-collapsed.
fn visible_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut stack: Vec<_> = document.tree.root().children().rev().collect();

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => parts.push(text),
            Node::Element(element) if SKIPPED_ELEMENTS.contains(&element.name()) => {}
            _ => stack.extend(node.children().rev()),
        }
    }

    collapse_whitespace(&parts.join(" ")).into_owned()
}

fn collapse_whitespace(text: &str) -> Cow<'_, str> {
    let mut words = text.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => Cow::Borrowed(""),
        (Some(only), None) if only.len() == text.len() => Cow::Borrowed(text),
        (Some(first), second) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(first);
            for word in second.into_iter().chain(words) {
                out.push(' ');
                out.push_str(word);
            }
            Cow::Owned(out)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
