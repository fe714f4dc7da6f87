//! FFI (Foreign Function Interface) layer for C integration
//!
//! This module provides C-compatible data structures and functions that
//! expose the conversion engine to binding layers written in other
//! languages.
//!
//! # FFI Boundary Contract
//!
//! ## String Representation
//!
//! **All strings use UTF-8 bytes + length representation (NOT NUL-terminated C strings)**
//!
//! Every string field is a pointer field (`*mut u8` / `*const u8`) paired
//! with a `usize` length field carrying the `_len` suffix. Lengths are exact
//! byte counts and never include a terminator. C code must use the length
//! field for all operations and must not call `strlen()` on these pointers.
//!
//! ## Memory Management
//!
//! Ownership is symmetric: whoever allocates, frees.
//!
//! - Rust allocates every string it hands to C (`Box<[u8]>`); C releases them
//!   with `markdown_result_free()` exactly once
//! - C owns every buffer it hands to Rust; Rust copies what it keeps.
//!   Visitor callbacks return text through
//!   `markdown_visit_result_set_output()`, which copies the caller's buffer
//!   into Rust memory that Rust frees after reading it
//!
//! ```rust
//! use html_markdown_converter::ffi::{markdown_convert, markdown_result_free, MarkdownOptions, MarkdownResult};
//!
//! let html = b"<h1>Hello</h1>";
//! let options = MarkdownOptions::default();
//! let mut result = MarkdownResult::default();
//!
//! unsafe { markdown_convert(html.as_ptr(), html.len(), &options, &mut result) };
//! assert_eq!(result.error_code, 0);
//!
//! let markdown = unsafe { std::slice::from_raw_parts(result.markdown, result.markdown_len) };
//! assert_eq!(markdown, b"# Hello\n");
//!
//! unsafe { markdown_result_free(&mut result) };
//! assert!(result.markdown.is_null());
//! ```
//!
//! ## Error Handling Contract
//!
//! **Success:** `error_code = 0`, `error_message = NULL`, output fields set.
//!
//! **Error:** `error_code` is one of the `ERROR_*` constants,
//! `error_message` holds a UTF-8 description, output fields are NULL.
//!
//! **Panic Safety:** every entry point runs inside `catch_unwind`; a panic
//! is reported as `ERROR_INTERNAL` and never unwinds into C.
//!
//! ## Visitors
//!
//! C code cannot hand Rust a closure, so visitors are registered under a
//! caller-chosen `u64` id and looked up by that id when a conversion runs:
//!
//! 1. `markdown_visitor_register(id, &callbacks)` stores a visitor that
//!    forwards every hook to `callbacks.dispatch`
//! 2. `markdown_convert_with_visitor(id, ...)` checks the visitor out of the
//!    registry for the duration of the call and checks it back in afterward
//! 3. `markdown_visitor_unregister(id)` drops it; a visitor that is checked
//!    out is dropped when its conversion ends
//!
//! The registry is a single mutex-guarded map. Conversions using different
//! ids may run concurrently; a visitor that is checked out cannot be used by
//! a second concurrent call.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::error::ConversionError;
use crate::metadata::{DEFAULT_MAX_STRUCTURED_DATA_SIZE, MetadataConfig};
use crate::options::{
    CodeBlockStyle, ConversionOptions, HeadingStyle, HighlightStyle, ListIndentStyle, NewlineStyle,
    PreprocessingOptions, PreprocessingPreset, WhitespaceMode, WrapOptions,
};
use crate::parser::{DEFAULT_MAX_DEPTH, ParserStrategy};
use crate::visitor::{HtmlVisitor, NodeContext, NodeType, VisitOutcome};

// ============================================================================
// Error Code Constants
// ============================================================================

/// Success - no error occurred
pub const ERROR_SUCCESS: u32 = 0;

/// Neither parser strategy could build a tree
pub const ERROR_PARSE: u32 = 1;

/// Character encoding error (invalid bytes, unsupported charset)
pub const ERROR_ENCODING: u32 = 2;

/// Invalid input data (NULL pointers, invalid parameters, rejected content)
pub const ERROR_INVALID_INPUT: u32 = 5;

/// A visitor callback returned `VisitResultType::Error`
pub const ERROR_VISITOR_ABORTED: u32 = 6;

/// A depth or size ceiling was hit
pub const ERROR_RESOURCE_LIMIT: u32 = 7;

/// Internal error (unexpected condition, panic caught)
pub const ERROR_INTERNAL: u32 = 99;

// ============================================================================
// Metadata Flags
// ============================================================================

pub const METADATA_DOCUMENT: u32 = 1;
pub const METADATA_HEADERS: u32 = 1 << 1;
pub const METADATA_LINKS: u32 = 1 << 2;
pub const METADATA_IMAGES: u32 = 1 << 3;
pub const METADATA_STRUCTURED_DATA: u32 = 1 << 4;
pub const METADATA_ALL: u32 = METADATA_DOCUMENT
    | METADATA_HEADERS
    | METADATA_LINKS
    | METADATA_IMAGES
    | METADATA_STRUCTURED_DATA;

// ============================================================================
// Preprocessing Flags
// ============================================================================

pub const PREPROCESS_STRIP_NEWLINES: u32 = 1;
pub const PREPROCESS_COLLAPSE_WHITESPACE: u32 = 1 << 1;
pub const PREPROCESS_REMOVE_EMPTY_ELEMENTS: u32 = 1 << 2;
pub const PREPROCESS_TRIM_TEXT_NODES: u32 = 1 << 3;
pub const PREPROCESS_NORMALIZE_UNICODE: u32 = 1 << 4;
pub const PREPROCESS_REMOVE_COMMENTS: u32 = 1 << 5;
pub const PREPROCESS_REMOVE_EMPTY_PARAGRAPHS: u32 = 1 << 6;
pub const PREPROCESS_REMOVE_NAVIGATION: u32 = 1 << 7;
pub const PREPROCESS_REMOVE_FORMS: u32 = 1 << 8;

// ============================================================================
// FFI Data Structures
// ============================================================================

/// Conversion options passed from C to Rust
///
/// Obtain defaults with `markdown_options_default()` and override fields as
/// needed; every enumerated field is validated and an unknown value fails
/// the call with `ERROR_INVALID_INPUT`.
///
/// # Field Descriptions
///
/// - `whitespace_mode`: 0 = Normalized, 1 = Strict
/// - `newline_style`: forced line breaks, 0 = two spaces, 1 = backslash
/// - `list_indent_tabs`: 1 = indent nested lists with tabs
/// - `list_indent_width`: spaces per nesting level when not using tabs
/// - `wrap` / `wrap_width` / `wrap_preserve_words`: post-traversal re-flow
/// - `preprocessing_preset`: 0 = Minimal, 1 = Standard, 2 = Aggressive
/// - `preprocessing_override_mask` / `preprocessing_override_values`:
///   `PREPROCESS_*` bits; every flag set in the mask takes its value from
///   `preprocessing_override_values` instead of the preset
/// - `heading_style`: 0 = ATX, 1 = closed ATX, 2 = Setext underlines
/// - `bullets`: bullet characters cycled by nesting depth, NULL = "-"
/// - `strong_em_symbol`: `'*'` or `'_'`, 0 = default (`'*'`)
/// - `code_block_style`: 0 = backticks, 1 = tildes, 2 = indented
/// - `default_code_language`: language tag for untagged code blocks, NULL = none
/// - `highlight_style`: `<mark>` rendering, 0 = `==`, 1 = HTML, 2 = bold, 3 = plain
/// - `sub_symbol` / `sup_symbol`: NULL = defaults (`~` / `^`)
/// - `strip_tags` / `preserve_tags`: comma-separated tag names, NULL = none
/// - `skip_images`, `br_in_tables`, `convert_as_inline`: 1 = enabled
/// - `parser_strategy`: 0 = Auto, 1 = Fast, 2 = Recovery
/// - `max_depth`: element nesting ceiling, 0 = default (256)
/// - `metadata_flags`: `METADATA_*` bits, only read by `markdown_convert_with_metadata`
/// - `max_structured_data_size`: bytes kept per structured data block, 0 = default (1 MiB)
/// - `fail_on_oversized_structured_data`: 1 = fail with `ERROR_RESOURCE_LIMIT` instead of truncating
/// - `content_type`: optional Content-Type header value for charset detection
/// - `base_url`: optional page URL; links to its origin classify as internal
///
/// # Example Usage (C)
///
/// ```c
/// markdown_options_t options;
/// markdown_options_default(&options);
/// options.whitespace_mode = 1;  // Strict
///
/// const char *ct = "text/html; charset=ISO-8859-1";
/// options.content_type = (const uint8_t *)ct;
/// options.content_type_len = strlen(ct);
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MarkdownOptions {
    pub whitespace_mode: u32,
    pub newline_style: u32,
    pub list_indent_tabs: u8,
    pub list_indent_width: u32,
    pub wrap: u8,
    pub wrap_width: u32,
    pub wrap_preserve_words: u8,
    pub preprocessing_preset: u32,
    pub preprocessing_override_mask: u32,
    pub preprocessing_override_values: u32,
    pub heading_style: u32,
    pub bullets: *const u8,
    pub bullets_len: usize,
    pub strong_em_symbol: u8,
    pub code_block_style: u32,
    pub default_code_language: *const u8,
    pub default_code_language_len: usize,
    pub highlight_style: u32,
    pub sub_symbol: *const u8,
    pub sub_symbol_len: usize,
    pub sup_symbol: *const u8,
    pub sup_symbol_len: usize,
    /// Comma-separated tag names rendered as their children only
    pub strip_tags: *const u8,
    pub strip_tags_len: usize,
    /// Comma-separated tag names emitted verbatim as HTML
    pub preserve_tags: *const u8,
    pub preserve_tags_len: usize,
    pub skip_images: u8,
    pub br_in_tables: u8,
    pub convert_as_inline: u8,
    pub parser_strategy: u32,
    pub max_depth: u32,
    pub metadata_flags: u32,
    pub max_structured_data_size: usize,
    pub fail_on_oversized_structured_data: u8,
    /// Content-Type header value (UTF-8 bytes, can be NULL)
    pub content_type: *const u8,
    /// Length of content_type in bytes (0 if NULL)
    pub content_type_len: usize,
    /// Base URL of the page (UTF-8 bytes, can be NULL)
    pub base_url: *const u8,
    /// Length of base_url in bytes (0 if NULL)
    pub base_url_len: usize,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            whitespace_mode: 0,
            newline_style: 0,
            list_indent_tabs: 0,
            list_indent_width: 2,
            wrap: 0,
            wrap_width: 80,
            wrap_preserve_words: 1,
            preprocessing_preset: 1,
            preprocessing_override_mask: 0,
            preprocessing_override_values: 0,
            heading_style: 0,
            bullets: ptr::null(),
            bullets_len: 0,
            strong_em_symbol: 0,
            code_block_style: 0,
            default_code_language: ptr::null(),
            default_code_language_len: 0,
            highlight_style: 0,
            sub_symbol: ptr::null(),
            sub_symbol_len: 0,
            sup_symbol: ptr::null(),
            sup_symbol_len: 0,
            strip_tags: ptr::null(),
            strip_tags_len: 0,
            preserve_tags: ptr::null(),
            preserve_tags_len: 0,
            skip_images: 0,
            br_in_tables: 0,
            convert_as_inline: 0,
            parser_strategy: 0,
            max_depth: 0,
            metadata_flags: METADATA_ALL,
            max_structured_data_size: 0,
            fail_on_oversized_structured_data: 0,
            content_type: ptr::null(),
            content_type_len: 0,
            base_url: ptr::null(),
            base_url_len: 0,
        }
    }
}

/// Conversion result returned from Rust to C
///
/// # Memory Ownership
///
/// All pointers are Rust-allocated. C must call `markdown_result_free()`
/// exactly once per populated result and must not call `free()` on them.
///
/// # State Invariants
///
/// **Success (error_code == 0):**
/// - `markdown` holds the output; it is NULL with `markdown_len` 0 when the
///   output is empty
/// - `metadata_json` is set only by `markdown_convert_with_metadata`
/// - `error_message` is NULL
///
/// **Error (error_code != 0):**
/// - `markdown` and `metadata_json` are NULL
/// - `error_message` points to a UTF-8 description
#[repr(C)]
#[derive(Debug)]
pub struct MarkdownResult {
    /// Output Markdown (UTF-8 bytes, NOT NUL-terminated)
    pub markdown: *mut u8,
    pub markdown_len: usize,

    /// Metadata record serialized as JSON (UTF-8 bytes), NULL unless requested
    pub metadata_json: *mut u8,
    pub metadata_json_len: usize,

    /// Error code: 0=success, non-zero=error (see ERROR_* constants)
    pub error_code: u32,

    /// Error message (UTF-8 bytes, NULL on success)
    pub error_message: *mut u8,
    pub error_len: usize,
}

impl Default for MarkdownResult {
    fn default() -> Self {
        Self {
            markdown: ptr::null_mut(),
            markdown_len: 0,
            metadata_json: ptr::null_mut(),
            metadata_json_len: 0,
            error_code: ERROR_SUCCESS,
            error_message: ptr::null_mut(),
            error_len: 0,
        }
    }
}

/// What a visitor callback asks the converter to do
///
/// The numeric values are part of the boundary contract.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResultType {
    /// Default conversion
    Continue = 0,
    /// Replace the construct with the text set via `markdown_visit_result_set_output`
    Custom = 1,
    /// Emit nothing for the construct
    Skip = 2,
    /// Emit the construct's HTML source
    PreserveSource = 3,
    /// Abort the conversion; the output text, if any, is the error message
    Error = 4,
}

impl VisitResultType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(VisitResultType::Continue),
            1 => Some(VisitResultType::Custom),
            2 => Some(VisitResultType::Skip),
            3 => Some(VisitResultType::PreserveSource),
            4 => Some(VisitResultType::Error),
            _ => None,
        }
    }
}

/// Stable node type codes for `FfiNodeContext`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiNodeType {
    Text = 0,
    Element = 1,
    Heading = 2,
    Paragraph = 3,
    Div = 4,
    Blockquote = 5,
    Pre = 6,
    Hr = 7,
    List = 8,
    ListItem = 9,
    Table = 10,
    TableRow = 11,
    TableCell = 12,
    Link = 13,
    Image = 14,
    Code = 15,
    Strong = 16,
    Em = 17,
    Strikethrough = 18,
    Underline = 19,
    Subscript = 20,
    Superscript = 21,
    Mark = 22,
    LineBreak = 23,
    DefinitionList = 24,
    DefinitionTerm = 25,
    DefinitionDescription = 26,
    Form = 27,
    Input = 28,
    Button = 29,
    Audio = 30,
    Video = 31,
    Iframe = 32,
    Details = 33,
    Summary = 34,
    Figure = 35,
    Figcaption = 36,
    Comment = 37,
    Custom = 255,
}

impl From<NodeType> for FfiNodeType {
    fn from(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Text => FfiNodeType::Text,
            NodeType::Element => FfiNodeType::Element,
            NodeType::Heading => FfiNodeType::Heading,
            NodeType::Paragraph => FfiNodeType::Paragraph,
            NodeType::Div => FfiNodeType::Div,
            NodeType::Blockquote => FfiNodeType::Blockquote,
            NodeType::Pre => FfiNodeType::Pre,
            NodeType::Hr => FfiNodeType::Hr,
            NodeType::List => FfiNodeType::List,
            NodeType::ListItem => FfiNodeType::ListItem,
            NodeType::Table => FfiNodeType::Table,
            NodeType::TableRow => FfiNodeType::TableRow,
            NodeType::TableCell => FfiNodeType::TableCell,
            NodeType::Link => FfiNodeType::Link,
            NodeType::Image => FfiNodeType::Image,
            NodeType::Code => FfiNodeType::Code,
            NodeType::Strong => FfiNodeType::Strong,
            NodeType::Em => FfiNodeType::Em,
            NodeType::Strikethrough => FfiNodeType::Strikethrough,
            NodeType::Underline => FfiNodeType::Underline,
            NodeType::Subscript => FfiNodeType::Subscript,
            NodeType::Superscript => FfiNodeType::Superscript,
            NodeType::Mark => FfiNodeType::Mark,
            NodeType::LineBreak => FfiNodeType::LineBreak,
            NodeType::DefinitionList => FfiNodeType::DefinitionList,
            NodeType::DefinitionTerm => FfiNodeType::DefinitionTerm,
            NodeType::DefinitionDescription => FfiNodeType::DefinitionDescription,
            NodeType::Form => FfiNodeType::Form,
            NodeType::Input => FfiNodeType::Input,
            NodeType::Button => FfiNodeType::Button,
            NodeType::Audio => FfiNodeType::Audio,
            NodeType::Video => FfiNodeType::Video,
            NodeType::Iframe => FfiNodeType::Iframe,
            NodeType::Details => FfiNodeType::Details,
            NodeType::Summary => FfiNodeType::Summary,
            NodeType::Figure => FfiNodeType::Figure,
            NodeType::Figcaption => FfiNodeType::Figcaption,
            NodeType::Comment => FfiNodeType::Comment,
            NodeType::Custom => FfiNodeType::Custom,
        }
    }
}

/// Which hook fired; passed to the dispatch function
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitEvent {
    ElementStart = 0,
    ElementEnd = 1,
    Text = 2,
    Link = 3,
    Image = 4,
    Heading = 5,
    CodeBlock = 6,
    CodeInline = 7,
    ListStart = 8,
    ListItem = 9,
    ListEnd = 10,
    TableStart = 11,
    TableRow = 12,
    TableEnd = 13,
    Blockquote = 14,
    Strong = 15,
    Emphasis = 16,
    Strikethrough = 17,
    Underline = 18,
    Subscript = 19,
    Superscript = 20,
    Mark = 21,
    LineBreak = 22,
    HorizontalRule = 23,
    CustomElement = 24,
    DefinitionListStart = 25,
    DefinitionTerm = 26,
    DefinitionDescription = 27,
    DefinitionListEnd = 28,
    Form = 29,
    Input = 30,
    Button = 31,
    Audio = 32,
    Video = 33,
    Iframe = 34,
    Details = 35,
    Summary = 36,
    FigureStart = 37,
    Figcaption = 38,
    FigureEnd = 39,
}

/// Node context handed to a callback
///
/// Borrowed from the conversion in progress: every pointer is valid only
/// until the callback returns.
#[repr(C)]
#[derive(Debug)]
pub struct FfiNodeContext {
    pub node_type: FfiNodeType,
    pub tag_name: *const u8,
    pub tag_name_len: usize,
    /// NULL when the node has no parent element
    pub parent_tag: *const u8,
    pub parent_tag_len: usize,
    pub depth: usize,
    pub index_in_parent: usize,
    /// 1 for inline content, 0 for blocks
    pub is_inline: u8,
}

/// Hook-specific data handed to a callback
///
/// | event | `text` | `detail` | `extra` | `number` | `flag` |
/// |---|---|---|---|---|---|
/// | Text, CodeInline, emphasis family, Summary, Figcaption, Button, DefinitionTerm/Description | text | | | | |
/// | ElementEnd, ListEnd, TableEnd, DefinitionListEnd, FigureEnd | rendered Markdown | | | | ListEnd: ordered |
/// | Link | href | link text | title | | |
/// | Image | src | alt | title | | |
/// | Heading | text | id | | level | |
/// | CodeBlock | code | language | | | |
/// | ListStart | | | | | ordered |
/// | ListItem | item text | marker | | | ordered |
/// | TableRow | cells joined by TAB | | | cell count | header row |
/// | Blockquote | content | | | nesting depth | |
/// | CustomElement | element HTML | tag name | | | |
/// | Form | action | method | | | |
/// | Input | input type | name | value | | |
/// | Audio, Video, Iframe | src | | | | |
/// | Details | | | | | open |
///
/// Pointers are NULL (length 0) when a value is absent.
#[repr(C)]
#[derive(Debug)]
pub struct FfiVisitPayload {
    pub text: *const u8,
    pub text_len: usize,
    pub detail: *const u8,
    pub detail_len: usize,
    pub extra: *const u8,
    pub extra_len: usize,
    pub number: u64,
    pub flag: u8,
}

/// Callback outcome, written by C through the `out` argument
///
/// Set `result_type` directly; set the text with
/// `markdown_visit_result_set_output()`. The output buffer belongs to Rust.
#[repr(C)]
#[derive(Debug)]
pub struct FfiVisitResult {
    /// A `VisitResultType` code
    pub result_type: u32,
    pub output: *mut u8,
    pub output_len: usize,
}

/// Callback invoked for every visitor hook
pub type VisitDispatchFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    event: VisitEvent,
    ctx: *const FfiNodeContext,
    payload: *const FfiVisitPayload,
    out: *mut FfiVisitResult,
);

/// Visitor registration data
///
/// `user_data` is passed back verbatim on every call. It may be used from
/// whichever thread runs the conversion.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiVisitorCallbacks {
    pub user_data: *mut c_void,
    pub dispatch: Option<VisitDispatchFn>,
}

// ============================================================================
// Callback visitor
// ============================================================================

/// `HtmlVisitor` forwarding every hook to a C dispatch function
struct CallbackVisitor {
    user_data: *mut c_void,
    dispatch: VisitDispatchFn,
}

// SAFETY: registration requires `user_data` to be usable from any thread;
// the registry hands a visitor to at most one conversion at a time.
unsafe impl Send for CallbackVisitor {}

fn str_parts(text: Option<&str>) -> (*const u8, usize) {
    match text {
        Some(text) => (text.as_ptr(), text.len()),
        None => (ptr::null(), 0),
    }
}

/// Hook arguments before they are lowered into an `FfiVisitPayload`
#[derive(Default)]
struct EventArgs<'a> {
    text: Option<&'a str>,
    detail: Option<&'a str>,
    extra: Option<&'a str>,
    number: u64,
    flag: bool,
}

impl<'a> EventArgs<'a> {
    fn new(text: Option<&'a str>, detail: Option<&'a str>) -> Self {
        Self {
            text,
            detail,
            ..Self::default()
        }
    }

    fn extra(mut self, extra: Option<&'a str>) -> Self {
        self.extra = extra;
        self
    }

    fn number(mut self, number: u64) -> Self {
        self.number = number;
        self
    }

    fn flag(mut self, flag: bool) -> Self {
        self.flag = flag;
        self
    }
}

impl CallbackVisitor {
    fn call(&mut self, event: VisitEvent, ctx: &NodeContext<'_>, args: EventArgs<'_>) -> VisitOutcome {
        let (tag_name, tag_name_len) = str_parts(Some(ctx.tag_name));
        let (parent_tag, parent_tag_len) = str_parts(ctx.parent_tag);
        let ffi_ctx = FfiNodeContext {
            node_type: ctx.node_type.into(),
            tag_name,
            tag_name_len,
            parent_tag,
            parent_tag_len,
            depth: ctx.depth,
            index_in_parent: ctx.index_in_parent,
            is_inline: u8::from(ctx.is_inline),
        };

        let (text, text_len) = str_parts(args.text);
        let (detail, detail_len) = str_parts(args.detail);
        let (extra, extra_len) = str_parts(args.extra);
        let payload = FfiVisitPayload {
            text,
            text_len,
            detail,
            detail_len,
            extra,
            extra_len,
            number: args.number,
            flag: u8::from(args.flag),
        };

        let mut result = FfiVisitResult {
            result_type: VisitResultType::Continue as u32,
            output: ptr::null_mut(),
            output_len: 0,
        };

        // SAFETY: the dispatch function was supplied at registration; every
        // pointer passed here stays valid until it returns.
        unsafe { (self.dispatch)(self.user_data, event, &ffi_ctx, &payload, &mut result) };

        let output = take_output(&mut result);
        match VisitResultType::from_code(result.result_type) {
            Some(VisitResultType::Continue) => VisitOutcome::Continue,
            Some(VisitResultType::Custom) => VisitOutcome::Custom(output.unwrap_or_default()),
            Some(VisitResultType::Skip) => VisitOutcome::Skip,
            Some(VisitResultType::PreserveSource) => VisitOutcome::PreserveSource,
            Some(VisitResultType::Error) => VisitOutcome::Error(
                output.unwrap_or_else(|| "visitor callback returned an error".to_string()),
            ),
            None => VisitOutcome::Error(format!(
                "visitor callback returned unknown result type {}",
                result.result_type
            )),
        }
    }

    fn text_event(&mut self, event: VisitEvent, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.call(event, ctx, EventArgs::new(Some(text), None))
    }

    fn bare_event(&mut self, event: VisitEvent, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.call(event, ctx, EventArgs::new(None, None))
    }
}

/// Reclaim the output buffer set by `markdown_visit_result_set_output`
fn take_output(result: &mut FfiVisitResult) -> Option<String> {
    if result.output.is_null() {
        return None;
    }
    let raw = ptr::slice_from_raw_parts_mut(result.output, result.output_len);
    // SAFETY: a non-NULL `output` is only ever produced by
    // `markdown_visit_result_set_output` from a `Box<[u8]>`.
    let bytes = unsafe { Box::from_raw(raw) };
    result.output = ptr::null_mut();
    result.output_len = 0;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

impl HtmlVisitor for CallbackVisitor {
    fn visit_element_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.bare_event(VisitEvent::ElementStart, ctx)
    }

    fn visit_element_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        self.text_event(VisitEvent::ElementEnd, ctx, output)
    }

    fn visit_text(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Text, ctx, text)
    }

    fn visit_link(&mut self, ctx: &NodeContext<'_>, href: &str, text: &str, title: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Link, ctx, EventArgs::new(Some(href), Some(text)).extra(title))
    }

    fn visit_image(&mut self, ctx: &NodeContext<'_>, src: &str, alt: &str, title: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Image, ctx, EventArgs::new(Some(src), Some(alt)).extra(title))
    }

    fn visit_heading(&mut self, ctx: &NodeContext<'_>, level: u8, text: &str, id: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Heading, ctx, EventArgs::new(Some(text), id).number(u64::from(level)))
    }

    fn visit_code_block(&mut self, ctx: &NodeContext<'_>, language: Option<&str>, code: &str) -> VisitOutcome {
        self.call(VisitEvent::CodeBlock, ctx, EventArgs::new(Some(code), language))
    }

    fn visit_code_inline(&mut self, ctx: &NodeContext<'_>, code: &str) -> VisitOutcome {
        self.text_event(VisitEvent::CodeInline, ctx, code)
    }

    fn visit_list_start(&mut self, ctx: &NodeContext<'_>, ordered: bool) -> VisitOutcome {
        self.call(VisitEvent::ListStart, ctx, EventArgs::new(None, None).flag(ordered))
    }

    fn visit_list_item(&mut self, ctx: &NodeContext<'_>, ordered: bool, marker: &str, text: &str) -> VisitOutcome {
        self.call(VisitEvent::ListItem, ctx, EventArgs::new(Some(text), Some(marker)).flag(ordered))
    }

    fn visit_list_end(&mut self, ctx: &NodeContext<'_>, ordered: bool, output: &str) -> VisitOutcome {
        self.call(VisitEvent::ListEnd, ctx, EventArgs::new(Some(output), None).flag(ordered))
    }

    fn visit_table_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.bare_event(VisitEvent::TableStart, ctx)
    }

    fn visit_table_row(&mut self, ctx: &NodeContext<'_>, cells: &[String], is_header: bool) -> VisitOutcome {
        let joined = cells.join("\t");
        let args = EventArgs::new(Some(&joined), None)
            .number(cells.len() as u64)
            .flag(is_header);
        self.call(VisitEvent::TableRow, ctx, args)
    }

    fn visit_table_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        self.text_event(VisitEvent::TableEnd, ctx, output)
    }

    fn visit_blockquote(&mut self, ctx: &NodeContext<'_>, content: &str, depth: usize) -> VisitOutcome {
        self.call(VisitEvent::Blockquote, ctx, EventArgs::new(Some(content), None).number(depth as u64))
    }

    fn visit_strong(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Strong, ctx, text)
    }

    fn visit_emphasis(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Emphasis, ctx, text)
    }

    fn visit_strikethrough(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Strikethrough, ctx, text)
    }

    fn visit_underline(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Underline, ctx, text)
    }

    fn visit_subscript(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Subscript, ctx, text)
    }

    fn visit_superscript(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Superscript, ctx, text)
    }

    fn visit_mark(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Mark, ctx, text)
    }

    fn visit_line_break(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.bare_event(VisitEvent::LineBreak, ctx)
    }

    fn visit_horizontal_rule(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.bare_event(VisitEvent::HorizontalRule, ctx)
    }

    fn visit_custom_element(&mut self, ctx: &NodeContext<'_>, tag_name: &str, html: &str) -> VisitOutcome {
        self.call(VisitEvent::CustomElement, ctx, EventArgs::new(Some(html), Some(tag_name)))
    }

    fn visit_definition_list_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.bare_event(VisitEvent::DefinitionListStart, ctx)
    }

    fn visit_definition_term(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::DefinitionTerm, ctx, text)
    }

    fn visit_definition_description(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::DefinitionDescription, ctx, text)
    }

    fn visit_definition_list_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        self.text_event(VisitEvent::DefinitionListEnd, ctx, output)
    }

    fn visit_form(&mut self, ctx: &NodeContext<'_>, action: Option<&str>, method: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Form, ctx, EventArgs::new(action, method))
    }

    fn visit_input(
        &mut self,
        ctx: &NodeContext<'_>,
        input_type: &str,
        name: Option<&str>,
        value: Option<&str>,
    ) -> VisitOutcome {
        self.call(VisitEvent::Input, ctx, EventArgs::new(Some(input_type), name).extra(value))
    }

    fn visit_button(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Button, ctx, text)
    }

    fn visit_audio(&mut self, ctx: &NodeContext<'_>, src: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Audio, ctx, EventArgs::new(src, None))
    }

    fn visit_video(&mut self, ctx: &NodeContext<'_>, src: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Video, ctx, EventArgs::new(src, None))
    }

    fn visit_iframe(&mut self, ctx: &NodeContext<'_>, src: Option<&str>) -> VisitOutcome {
        self.call(VisitEvent::Iframe, ctx, EventArgs::new(src, None))
    }

    fn visit_details(&mut self, ctx: &NodeContext<'_>, open: bool) -> VisitOutcome {
        self.call(VisitEvent::Details, ctx, EventArgs::new(None, None).flag(open))
    }

    fn visit_summary(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Summary, ctx, text)
    }

    fn visit_figure_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.bare_event(VisitEvent::FigureStart, ctx)
    }

    fn visit_figcaption(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.text_event(VisitEvent::Figcaption, ctx, text)
    }

    fn visit_figure_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        self.text_event(VisitEvent::FigureEnd, ctx, output)
    }
}

// ============================================================================
// Visitor registry
// ============================================================================

/// Registered visitors plus the ids currently lent to a conversion
#[derive(Default)]
struct Registry {
    visitors: HashMap<u64, Box<dyn HtmlVisitor + Send>>,
    checked_out: HashSet<u64>,
    /// Checked-out ids unregistered mid-conversion; dropped at check-in
    pending_removal: HashSet<u64>,
}

fn registry() -> MutexGuard<'static, Registry> {
    static VISITORS: OnceLock<Mutex<Registry>> = OnceLock::new();
    VISITORS
        .get_or_init(|| Mutex::new(Registry::default()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Store a visitor under `id`
///
/// # Errors
///
/// Returns `ConversionError::InvalidInput` when the id is taken, including
/// by a visitor that is checked out.
pub fn register_visitor(id: u64, visitor: Box<dyn HtmlVisitor + Send>) -> Result<(), ConversionError> {
    let mut state = registry();
    if state.visitors.contains_key(&id) || state.checked_out.contains(&id) {
        return Err(ConversionError::InvalidInput(format!(
            "visitor id {id} is already registered"
        )));
    }
    state.visitors.insert(id, visitor);
    log::debug!("registered visitor {id}");
    Ok(())
}

/// Remove the visitor stored under `id`; false when there is none
///
/// A visitor checked out by a running conversion is dropped when that
/// conversion checks it back in.
pub fn unregister_visitor(id: u64) -> bool {
    let mut state = registry();
    if state.visitors.remove(&id).is_some() {
        return true;
    }
    if state.checked_out.contains(&id) {
        log::debug!("visitor {id} unregistered while in use");
        return state.pending_removal.insert(id);
    }
    false
}

/// Run `f` with the visitor registered under `id` checked out of the registry
///
/// The lock is not held while `f` runs. The visitor is checked back in
/// afterward, even when `f` panics, unless it was unregistered meanwhile.
pub fn with_visitor<T>(
    id: u64,
    f: impl FnOnce(&mut dyn HtmlVisitor) -> Result<T, ConversionError>,
) -> Result<T, ConversionError> {
    let mut visitor = {
        let mut state = registry();
        let visitor = match state.visitors.remove(&id) {
            Some(visitor) => visitor,
            None if state.checked_out.contains(&id) => {
                return Err(ConversionError::InvalidInput(format!(
                    "visitor {id} is in use by another conversion"
                )));
            }
            None => {
                return Err(ConversionError::InvalidInput(format!(
                    "no visitor registered under id {id}"
                )));
            }
        };
        state.checked_out.insert(id);
        visitor
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let borrowed: &mut dyn HtmlVisitor = &mut *visitor;
        f(borrowed)
    }));

    let unregistered = {
        let mut state = registry();
        state.checked_out.remove(&id);
        if state.pending_removal.remove(&id) {
            Some(visitor)
        } else {
            state.visitors.insert(id, visitor);
            None
        }
    };
    // Dropped outside the lock
    drop(unregistered);

    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct ConversionOutput {
    markdown: Box<[u8]>,
    metadata_json: Option<Box<[u8]>>,
}

fn reset_result(result: &mut MarkdownResult) {
    *result = MarkdownResult::default();
}

fn set_error_result(result: &mut MarkdownResult, error_code: u32, error_message: String) {
    let error_bytes = error_message.into_bytes().into_boxed_slice();
    result.error_code = error_code;
    result.error_len = error_bytes.len();
    result.error_message = Box::into_raw(error_bytes) as *mut u8;
}

fn set_success_result(result: &mut MarkdownResult, output: ConversionOutput) {
    result.error_code = ERROR_SUCCESS;
    result.error_message = ptr::null_mut();
    result.error_len = 0;

    if output.markdown.is_empty() {
        result.markdown = ptr::null_mut();
        result.markdown_len = 0;
    } else {
        result.markdown_len = output.markdown.len();
        result.markdown = Box::into_raw(output.markdown) as *mut u8;
    }

    if let Some(json) = output.metadata_json {
        result.metadata_json_len = json.len();
        result.metadata_json = Box::into_raw(json) as *mut u8;
    }
}

fn required_ref<'a, T>(ptr: *const T, name: &str) -> Result<&'a T, ConversionError> {
    if ptr.is_null() {
        return Err(ConversionError::InvalidInput(format!("{name} pointer is NULL")));
    }

    // SAFETY: Caller provided a non-NULL pointer and accepts the FFI contract
    // that this points to a valid, properly aligned value.
    Ok(unsafe { &*ptr })
}

fn required_bytes<'a>(ptr: *const u8, len: usize, name: &str) -> Result<&'a [u8], ConversionError> {
    if len == 0 {
        return Ok(&[]);
    }

    if ptr.is_null() {
        return Err(ConversionError::InvalidInput(format!("{name} pointer is NULL")));
    }

    // SAFETY: Pointer was validated as non-NULL above; caller guarantees `len`
    // bytes are valid and readable for the duration of this call.
    Ok(unsafe { slice::from_raw_parts(ptr, len) })
}

fn optional_utf8<'a>(ptr: *const u8, len: usize, field_name: &str) -> Result<Option<&'a str>, ConversionError> {
    if len == 0 {
        return Ok(None);
    }

    if ptr.is_null() {
        return Err(ConversionError::InvalidInput(format!(
            "{field_name}_len > 0 with NULL {field_name} pointer"
        )));
    }

    // SAFETY: Pointer is non-NULL and caller guarantees `len` readable bytes.
    let bytes = unsafe { slice::from_raw_parts(ptr, len) };

    std::str::from_utf8(bytes)
        .map(Some)
        .map_err(|_| ConversionError::InvalidInput(format!("{field_name} is not valid UTF-8")))
}

/// Translate C options into `ConversionOptions`
fn conversion_options(raw: &MarkdownOptions) -> Result<ConversionOptions, ConversionError> {
    let invalid = |field: &str, value: u32| {
        ConversionError::InvalidInput(format!("unknown {field} value {value}"))
    };

    let whitespace_mode = match raw.whitespace_mode {
        0 => WhitespaceMode::Normalized,
        1 => WhitespaceMode::Strict,
        other => return Err(invalid("whitespace_mode", other)),
    };
    let newline_style = match raw.newline_style {
        0 => NewlineStyle::Spaces,
        1 => NewlineStyle::Backslash,
        other => return Err(invalid("newline_style", other)),
    };
    let preset = match raw.preprocessing_preset {
        0 => PreprocessingPreset::Minimal,
        1 => PreprocessingPreset::Standard,
        2 => PreprocessingPreset::Aggressive,
        other => return Err(invalid("preprocessing_preset", other)),
    };
    let parser = match raw.parser_strategy {
        0 => ParserStrategy::Auto,
        1 => ParserStrategy::Fast,
        2 => ParserStrategy::Recovery,
        other => return Err(invalid("parser_strategy", other)),
    };

    let heading_style = match raw.heading_style {
        0 => HeadingStyle::Atx,
        1 => HeadingStyle::AtxClosed,
        2 => HeadingStyle::Underlined,
        other => return Err(invalid("heading_style", other)),
    };
    let code_block_style = match raw.code_block_style {
        0 => CodeBlockStyle::Backticks,
        1 => CodeBlockStyle::Tildes,
        2 => CodeBlockStyle::Indented,
        other => return Err(invalid("code_block_style", other)),
    };
    let highlight_style = match raw.highlight_style {
        0 => HighlightStyle::DoubleEqual,
        1 => HighlightStyle::Html,
        2 => HighlightStyle::Bold,
        3 => HighlightStyle::None,
        other => return Err(invalid("highlight_style", other)),
    };

    let list_indent = if raw.list_indent_tabs != 0 {
        ListIndentStyle::Tabs
    } else {
        ListIndentStyle::Spaces(raw.list_indent_width as usize)
    };

    let max_depth = if raw.max_depth == 0 {
        DEFAULT_MAX_DEPTH
    } else {
        raw.max_depth as usize
    };

    let defaults = ConversionOptions::default();
    let text_or = |ptr: *const u8, len: usize, name: &str, fallback: &str| {
        optional_utf8(ptr, len, name).map(|value| value.unwrap_or(fallback).to_string())
    };

    Ok(ConversionOptions {
        whitespace_mode,
        newline_style,
        list_indent,
        wrap: WrapOptions {
            enabled: raw.wrap != 0,
            width: raw.wrap_width as usize,
            preserve_words: raw.wrap_preserve_words != 0,
        },
        preprocessing: preprocessing_options(preset, raw.preprocessing_override_mask, raw.preprocessing_override_values),
        heading_style,
        bullets: text_or(raw.bullets, raw.bullets_len, "bullets", defaults.bullets.as_str())?,
        strong_em_symbol: match raw.strong_em_symbol {
            0 => defaults.strong_em_symbol,
            symbol => char::from(symbol),
        },
        code_block_style,
        default_code_language: text_or(
            raw.default_code_language,
            raw.default_code_language_len,
            "default_code_language",
            defaults.default_code_language.as_str(),
        )?,
        highlight_style,
        sub_symbol: text_or(raw.sub_symbol, raw.sub_symbol_len, "sub_symbol", defaults.sub_symbol.as_str())?,
        sup_symbol: text_or(raw.sup_symbol, raw.sup_symbol_len, "sup_symbol", defaults.sup_symbol.as_str())?,
        strip_tags: tag_list(optional_utf8(raw.strip_tags, raw.strip_tags_len, "strip_tags")?),
        preserve_tags: tag_list(optional_utf8(raw.preserve_tags, raw.preserve_tags_len, "preserve_tags")?),
        skip_images: raw.skip_images != 0,
        br_in_tables: raw.br_in_tables != 0,
        convert_as_inline: raw.convert_as_inline != 0,
        parser,
        max_depth,
    })
}

/// Expand the preset, then apply the flags selected by `mask`
fn preprocessing_options(preset: PreprocessingPreset, mask: u32, values: u32) -> PreprocessingOptions {
    let mut options = PreprocessingOptions::from_preset(preset);
    let fields: [(u32, &mut bool); 9] = [
        (PREPROCESS_STRIP_NEWLINES, &mut options.strip_newlines),
        (PREPROCESS_COLLAPSE_WHITESPACE, &mut options.collapse_whitespace),
        (PREPROCESS_REMOVE_EMPTY_ELEMENTS, &mut options.remove_empty_elements),
        (PREPROCESS_TRIM_TEXT_NODES, &mut options.trim_text_nodes),
        (PREPROCESS_NORMALIZE_UNICODE, &mut options.normalize_unicode),
        (PREPROCESS_REMOVE_COMMENTS, &mut options.remove_comments),
        (PREPROCESS_REMOVE_EMPTY_PARAGRAPHS, &mut options.remove_empty_paragraphs),
        (PREPROCESS_REMOVE_NAVIGATION, &mut options.remove_navigation),
        (PREPROCESS_REMOVE_FORMS, &mut options.remove_forms),
    ];
    for (bit, flag) in fields {
        if mask & bit != 0 {
            *flag = values & bit != 0;
        }
    }
    options
}

fn tag_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(|tag| tag.trim().to_ascii_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn metadata_config(raw: &MarkdownOptions, base_url: Option<&str>) -> MetadataConfig {
    let flags = raw.metadata_flags;
    MetadataConfig {
        extract_document: flags & METADATA_DOCUMENT != 0,
        extract_headers: flags & METADATA_HEADERS != 0,
        extract_links: flags & METADATA_LINKS != 0,
        extract_images: flags & METADATA_IMAGES != 0,
        extract_structured_data: flags & METADATA_STRUCTURED_DATA != 0,
        max_structured_data_size: if raw.max_structured_data_size == 0 {
            DEFAULT_MAX_STRUCTURED_DATA_SIZE
        } else {
            raw.max_structured_data_size
        },
        fail_on_oversized_structured_data: raw.fail_on_oversized_structured_data != 0,
        base_url: base_url.map(str::to_string),
    }
}

/// Which entry point is converting
enum Mode {
    Plain,
    Metadata,
    Visitor(u64),
}

fn convert_inner(html: &[u8], raw: &MarkdownOptions, mode: Mode) -> Result<ConversionOutput, ConversionError> {
    let content_type = optional_utf8(raw.content_type, raw.content_type_len, "content_type")?;
    let base_url = optional_utf8(raw.base_url, raw.base_url_len, "base_url")?;
    let options = conversion_options(raw)?;

    let text = crate::decode_input(html, content_type)?;

    let (markdown, metadata_json) = match mode {
        Mode::Plain => (crate::convert(&text, &options)?, None),
        Mode::Metadata => {
            let config = metadata_config(raw, base_url);
            let (markdown, record) = crate::convert_with_metadata(&text, &options, &config)?;
            let json = serde_json::to_vec(&record).map_err(|e| {
                ConversionError::InternalError(format!("metadata serialization failed: {e}"))
            })?;
            (markdown, Some(json.into_boxed_slice()))
        }
        Mode::Visitor(id) => {
            let markdown = with_visitor(id, |visitor| crate::convert_with_visitor(&text, &options, visitor))?;
            (markdown, None)
        }
    };

    Ok(ConversionOutput {
        markdown: markdown.into_bytes().into_boxed_slice(),
        metadata_json,
    })
}

/// Shared body of the conversion entry points
///
/// # Safety
///
/// Same contract as `markdown_convert`.
unsafe fn run_conversion(
    html: *const u8,
    html_len: usize,
    options: *const MarkdownOptions,
    result: *mut MarkdownResult,
    mode: Mode,
) {
    if result.is_null() {
        // Cannot report an error without a result struct
        return;
    }

    // SAFETY: `result` was validated as non-NULL above.
    let result_ref = unsafe { &mut *result };
    reset_result(result_ref);

    let panic_result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<ConversionOutput, ConversionError> {
        let options_ref = required_ref(options, "Options")?;
        let html_slice = required_bytes(html, html_len, "HTML")?;
        convert_inner(html_slice, options_ref, mode)
    }));

    match panic_result {
        Ok(Ok(output)) => set_success_result(result_ref, output),
        Ok(Err(e)) => set_error_result(result_ref, e.code(), e.to_string()),
        Err(_) => {
            log::error!("panic caught at the C boundary during conversion");
            set_error_result(
                result_ref,
                ERROR_INTERNAL,
                "Internal panic during conversion".to_string(),
            );
        }
    }
}

fn free_buffer(ptr_field: &mut *mut u8, len_field: &mut usize) {
    if (*ptr_field).is_null() {
        return;
    }

    let raw = ptr::slice_from_raw_parts_mut(*ptr_field, *len_field);
    // SAFETY: `raw` was allocated by `Box<[u8]>` via `Box::into_raw`.
    let _ = unsafe { Box::from_raw(raw) };
    *ptr_field = ptr::null_mut();
    *len_field = 0;
}

// ============================================================================
// FFI Functions
// ============================================================================

/// Fill `options` with the documented defaults
///
/// # Safety
///
/// `options` must be NULL or point to writable memory for a `MarkdownOptions`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_options_default(options: *mut MarkdownOptions) {
    if options.is_null() {
        return;
    }
    // SAFETY: `options` was validated as non-NULL above.
    unsafe { options.write(MarkdownOptions::default()) };
}

/// Convert HTML bytes to Markdown
///
/// # Parameters
///
/// - `html`: HTML input bytes; may be NULL when `html_len == 0`. The
///   charset is resolved from `options.content_type`, then from a `<meta>`
///   declaration, then defaults to UTF-8
/// - `options`: conversion options, must be non-NULL
/// - `result`: populated on return; previous contents are overwritten
///   without being freed
///
/// # Error Codes
///
/// - `ERROR_INVALID_INPUT` (5): NULL pointer, invalid option, rejected input
/// - `ERROR_PARSE` (1): no parser strategy could build a tree
/// - `ERROR_ENCODING` (2): input bytes do not decode
/// - `ERROR_RESOURCE_LIMIT` (7): nesting deeper than `max_depth`
/// - `ERROR_INTERNAL` (99): internal error or panic caught
///
/// # Example (C)
///
/// ```c
/// markdown_options_t options;
/// markdown_options_default(&options);
///
/// markdown_result_t result;
/// markdown_convert(html, html_len, &options, &result);
/// if (result.error_code == 0) {
///     send_response(result.markdown, result.markdown_len);
/// } else {
///     log_error(result.error_code, result.error_message, result.error_len);
/// }
/// markdown_result_free(&result);
/// ```
///
/// # Safety
///
/// - Non-NULL pointers must point to valid memory of the stated size
/// - A NULL `result` makes the call a no-op
/// - Not calling `markdown_result_free()` leaks memory (not UB)
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_convert(
    html: *const u8,
    html_len: usize,
    options: *const MarkdownOptions,
    result: *mut MarkdownResult,
) {
    // SAFETY: forwarded caller contract.
    unsafe { run_conversion(html, html_len, options, result, Mode::Plain) }
}

/// Convert HTML bytes to Markdown and collect metadata
///
/// On success `result.metadata_json` holds the metadata record as a JSON
/// object with `document`, `headers`, `links`, `images` and
/// `structured_data` keys. `options.metadata_flags` selects the categories;
/// disabled categories are empty.
///
/// # Safety
///
/// Same contract as `markdown_convert`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_convert_with_metadata(
    html: *const u8,
    html_len: usize,
    options: *const MarkdownOptions,
    result: *mut MarkdownResult,
) {
    // SAFETY: forwarded caller contract.
    unsafe { run_conversion(html, html_len, options, result, Mode::Metadata) }
}

/// Convert HTML bytes to Markdown with the visitor registered under `visitor_id`
///
/// A callback answering `VisitResultType::Error` fails the call with
/// `ERROR_VISITOR_ABORTED` and the callback's output as the message. An
/// unknown id fails with `ERROR_INVALID_INPUT`.
///
/// # Safety
///
/// Same contract as `markdown_convert`; the registered callbacks must stay
/// valid for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_convert_with_visitor(
    visitor_id: u64,
    html: *const u8,
    html_len: usize,
    options: *const MarkdownOptions,
    result: *mut MarkdownResult,
) {
    // SAFETY: forwarded caller contract.
    unsafe { run_conversion(html, html_len, options, result, Mode::Visitor(visitor_id)) }
}

/// Register C callbacks as a visitor under a caller-chosen id
///
/// # Returns
///
/// `ERROR_SUCCESS`, or `ERROR_INVALID_INPUT` when `callbacks` is NULL, has
/// no dispatch function, or the id is already registered.
///
/// # Safety
///
/// `callbacks` must be NULL or point to a valid `FfiVisitorCallbacks`. The
/// dispatch function and `user_data` must stay valid until the visitor is
/// unregistered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_visitor_register(visitor_id: u64, callbacks: *const FfiVisitorCallbacks) -> u32 {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), ConversionError> {
        let callbacks = required_ref(callbacks, "Callbacks")?;
        let dispatch = callbacks.dispatch.ok_or_else(|| {
            ConversionError::InvalidInput("dispatch function pointer is NULL".to_string())
        })?;
        let visitor = CallbackVisitor {
            user_data: callbacks.user_data,
            dispatch,
        };
        register_visitor(visitor_id, Box::new(visitor))
    }));

    match outcome {
        Ok(Ok(())) => ERROR_SUCCESS,
        Ok(Err(e)) => e.code(),
        Err(_) => {
            log::error!("panic caught at the C boundary during visitor registration");
            ERROR_INTERNAL
        }
    }
}

/// Drop the visitor registered under `visitor_id`
///
/// Returns 1 when a visitor was removed, 0 otherwise. A visitor in use by a
/// running conversion is removed when that conversion finishes.
#[unsafe(no_mangle)]
pub extern "C" fn markdown_visitor_unregister(visitor_id: u64) -> u8 {
    panic::catch_unwind(|| u8::from(unregister_visitor(visitor_id))).unwrap_or(0)
}

/// Set the text of a visitor callback result
///
/// Copies `len` bytes from `text`; the caller keeps ownership of its buffer.
/// Replaces any previously set text.
///
/// # Returns
///
/// `ERROR_SUCCESS`, or `ERROR_INVALID_INPUT` for a NULL `out`, or a NULL
/// `text` with a non-zero `len`.
///
/// # Safety
///
/// `out` must be the pointer passed to the dispatch function; `text` must
/// point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_visit_result_set_output(
    out: *mut FfiVisitResult,
    text: *const u8,
    len: usize,
) -> u32 {
    if out.is_null() {
        return ERROR_INVALID_INPUT;
    }
    let bytes = match required_bytes(text, len, "Output") {
        Ok(bytes) => bytes,
        Err(e) => return e.code(),
    };

    // SAFETY: `out` was validated as non-NULL above.
    let out_ref = unsafe { &mut *out };
    free_buffer(&mut out_ref.output, &mut out_ref.output_len);

    let copy: Box<[u8]> = bytes.into();
    out_ref.output_len = copy.len();
    out_ref.output = Box::into_raw(copy) as *mut u8;
    ERROR_SUCCESS
}

/// Free memory allocated by a conversion result
///
/// Frees `markdown`, `metadata_json` and `error_message`, then sets every
/// pointer to NULL and every length to 0. Calling it again on the same
/// result is a no-op.
///
/// **NEVER** call C's `free()` on these pointers: they belong to Rust's
/// allocator and are not NUL-terminated C strings.
///
/// # Safety
///
/// - A NULL `result` is a no-op
/// - `result` must have been populated by one of the conversion functions
#[unsafe(no_mangle)]
pub unsafe extern "C" fn markdown_result_free(result: *mut MarkdownResult) {
    if result.is_null() {
        return;
    }

    // SAFETY: `result` was validated as non-NULL above.
    let result_ref = unsafe { &mut *result };
    free_buffer(&mut result_ref.markdown, &mut result_ref.markdown_len);
    free_buffer(&mut result_ref.metadata_json, &mut result_ref.metadata_json_len);
    free_buffer(&mut result_ref.error_message, &mut result_ref.error_len);
    result_ref.error_code = ERROR_SUCCESS;
}
