//! HTML Markdown Converter
//!
//! This library converts HTML documents to Markdown in a single pass over the
//! parsed tree, optionally collecting page metadata and letting caller code
//! intercept individual constructs along the way.
//!
//! # Architecture
//!
//! The library is structured into several modules:
//! - `classifier`: Rejects binary input and routes plain text past the parser
//! - `charset`: Character encoding detection for byte input
//! - `parser`: Fast and recovery tree builders over html5ever
//! - `dom`: Owned node tree shared by both parser strategies
//! - `options`: Formatting policy consulted at every emission decision
//! - `converter`: Markdown generation from the node tree
//! - `text` / `wrap`: Text normalization and post-traversal re-flow
//! - `visitor`: Interception hooks for caller code
//! - `metadata`: Document, heading, link, image and structured data records
//! - `ffi`: C-compatible interface and the visitor handle registry
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::{convert, ConversionOptions};
//!
//! let markdown = convert("<h1>Title</h1><p>Hello   world</p>", &ConversionOptions::default()).unwrap();
//! assert_eq!(markdown, "# Title\n\nHello world\n");
//! ```
//!
//! # Safety
//!
//! Only the `ffi` module contains unsafe code. Memory allocated by Rust and
//! handed across the C boundary must be freed by Rust via the provided
//! cleanup functions.

pub mod charset;
pub mod classifier;
pub mod converter;
pub mod dom;
pub mod error;
pub mod ffi;
pub mod metadata;
pub mod options;
pub mod parser;
pub mod text;
pub mod visitor;
pub mod wrap;

pub use converter::MarkdownConverter;
pub use error::ConversionError;
pub use ffi::{MarkdownOptions, MarkdownResult, VisitResultType};
pub use metadata::{MetadataCollector, MetadataConfig, MetadataRecord, NoopCollector};
pub use options::{ConversionOptions, PreprocessingPreset, WhitespaceMode};
pub use parser::ParserStrategy;
pub use visitor::{HtmlVisitor, NodeContext, NodeType, VisitOutcome};

use std::borrow::Cow;

use classifier::{InputClass, classify};
use metadata::MetadataObserver;

/// Convert HTML to Markdown
///
/// # Arguments
///
/// * `html` - HTML text
/// * `options` - Formatting policy; `ConversionOptions::default()` for the documented defaults
///
/// # Returns
///
/// Markdown ending in exactly one newline. Input without any markup is
/// returned trimmed, as-is; empty input yields an empty string.
///
/// # Errors
///
/// - `ConversionError::InvalidInput` for rejected input or invalid options
/// - `ConversionError::ParseError` when no parser strategy can build a tree
/// - `ConversionError::ResourceLimitExceeded` when nesting exceeds `options.max_depth`
pub fn convert(html: &str, options: &ConversionOptions) -> Result<String, ConversionError> {
    run(html, options, None, &mut NoopCollector)
}

/// Convert HTML to Markdown and collect metadata in the same pass
///
/// When `config` enables nothing the conversion runs exactly as [`convert`]
/// and the returned record is empty.
///
/// # Errors
///
/// As [`convert`], plus `ConversionError::ResourceLimitExceeded` for an
/// oversized structured data block when
/// `config.fail_on_oversized_structured_data` is set.
pub fn convert_with_metadata(
    html: &str,
    options: &ConversionOptions,
    config: &MetadataConfig,
) -> Result<(String, MetadataRecord), ConversionError> {
    if !config.any_enabled() {
        let markdown = run(html, options, None, &mut NoopCollector)?;
        return Ok((markdown, MetadataRecord::default()));
    }

    let mut collector = MetadataCollector::new(config.clone());
    let markdown = run(html, options, None, &mut collector)?;
    Ok((markdown, collector.finish()))
}

/// Convert HTML to Markdown with visitor hooks
///
/// A hook returning [`VisitOutcome::Error`] aborts the call with
/// `ConversionError::VisitorAborted` carrying the hook's message; no partial
/// output is returned.
pub fn convert_with_visitor(
    html: &str,
    options: &ConversionOptions,
    visitor: &mut dyn HtmlVisitor,
) -> Result<String, ConversionError> {
    run(html, options, Some(visitor), &mut NoopCollector)
}

/// Convert raw HTML bytes, resolving their character encoding first
///
/// The charset comes from the `Content-Type` parameter when given, then from
/// a `<meta>` declaration near the top of the document, then defaults to
/// UTF-8.
///
/// # Errors
///
/// As [`convert`], plus `ConversionError::EncodingError` when the bytes do
/// not decode with the resolved charset.
pub fn convert_bytes(
    html: &[u8],
    content_type: Option<&str>,
    options: &ConversionOptions,
) -> Result<String, ConversionError> {
    let text = decode_input(html, content_type)?;
    convert(&text, options)
}

/// Reject non-text bytes, then transcode to UTF-8
pub(crate) fn decode_input<'b>(
    html: &'b [u8],
    content_type: Option<&str>,
) -> Result<Cow<'b, str>, ConversionError> {
    if let InputClass::Rejected(reason) = classify(html) {
        return Err(ConversionError::InvalidInput(reason));
    }

    let resolved = charset::resolve_charset(content_type, html);
    log::debug!("decoding input as {} ({:?})", resolved.label, resolved.source);
    charset::decode_to_utf8(html, &resolved.label)
}

/// Shared pipeline: validate, classify, parse, traverse
fn run<'a, 'v>(
    html: &str,
    options: &'a ConversionOptions,
    visitor: Option<&'a mut (dyn HtmlVisitor + 'v)>,
    collector: &'a mut dyn MetadataObserver,
) -> Result<String, ConversionError> {
    options.validate()?;

    match classify(html.as_bytes()) {
        InputClass::Rejected(reason) => {
            log::debug!("input rejected: {reason}");
            Err(ConversionError::InvalidInput(reason))
        }
        InputClass::PlainText => {
            log::debug!("no markup found, skipping the parser");
            let text = html.trim();
            if options.wrap.enabled {
                Ok(wrap::wrap_text(text, &options.wrap))
            } else {
                Ok(text.to_string())
            }
        }
        InputClass::Markup(risk) => {
            log::debug!("markup input, {risk:?} risk");
            let tree = parser::parse_with(html, options.parser, risk, options.max_depth)?;
            MarkdownConverter::new(options, visitor, collector).convert(&tree)
        }
    }
}
