//! Formatting policy
//!
//! [`ConversionOptions`] is consulted at every emission decision and is never
//! mutated during a conversion. All fields are public; start from
//! `ConversionOptions::default()` and override what you need. Call
//! [`ConversionOptions::validate`] (the conversion entry points do) to catch
//! settings that cannot produce sensible output.
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::options::{ConversionOptions, WhitespaceMode, WrapOptions};
//!
//! let options = ConversionOptions {
//!     whitespace_mode: WhitespaceMode::Strict,
//!     wrap: WrapOptions { enabled: true, width: 72, preserve_words: true },
//!     ..ConversionOptions::default()
//! };
//! assert!(options.validate().is_ok());
//! ```

use crate::error::ConversionError;
use crate::parser::{DEFAULT_MAX_DEPTH, ParserStrategy};

/// How text node whitespace is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhitespaceMode {
    /// Every space, tab and newline is kept
    Strict,
    /// Runs collapse to one space; block edges are trimmed
    #[default]
    Normalized,
}

/// Rendering of forced line breaks (`<br>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewlineStyle {
    /// Two trailing spaces
    #[default]
    Spaces,
    /// A trailing backslash
    Backslash,
}

/// Indentation unit for nested list content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListIndentStyle {
    Spaces(usize),
    Tabs,
}

impl Default for ListIndentStyle {
    fn default() -> Self {
        ListIndentStyle::Spaces(2)
    }
}

impl ListIndentStyle {
    /// One level of indentation
    pub fn unit(&self) -> String {
        match self {
            ListIndentStyle::Spaces(n) => " ".repeat(*n),
            ListIndentStyle::Tabs => "\t".to_string(),
        }
    }
}

/// Post-traversal line wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapOptions {
    pub enabled: bool,
    /// Maximum line length in characters
    pub width: usize,
    /// Never break inside a word; overlong words get a line of their own
    pub preserve_words: bool,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 80,
            preserve_words: true,
        }
    }
}

/// Named bundles of preprocessing flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreprocessingPreset {
    Minimal,
    #[default]
    Standard,
    Aggressive,
}

/// Preprocessing flags, normally obtained from a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessingOptions {
    /// Line breaks inside text nodes become spaces
    pub strip_newlines: bool,
    /// Collapse blank line runs and trailing whitespace in the final output
    pub collapse_whitespace: bool,
    /// Omit elements with neither text nor media
    pub remove_empty_elements: bool,
    /// Trim block content at its edges
    pub trim_text_nodes: bool,
    /// Map Unicode space separators to ASCII space and drop zero-width characters
    pub normalize_unicode: bool,
    /// Drop comments instead of passing them through
    pub remove_comments: bool,
    /// Omit paragraphs with no visible content
    pub remove_empty_paragraphs: bool,
    /// Drop `<nav>` subtrees
    pub remove_navigation: bool,
    /// Drop `<form>` subtrees
    pub remove_forms: bool,
}

impl PreprocessingOptions {
    /// Expand a preset into its flags
    pub fn from_preset(preset: PreprocessingPreset) -> Self {
        match preset {
            PreprocessingPreset::Minimal => Self {
                strip_newlines: false,
                collapse_whitespace: false,
                remove_empty_elements: false,
                trim_text_nodes: false,
                normalize_unicode: false,
                remove_comments: true,
                remove_empty_paragraphs: false,
                remove_navigation: false,
                remove_forms: false,
            },
            PreprocessingPreset::Standard => Self {
                strip_newlines: false,
                collapse_whitespace: true,
                remove_empty_elements: false,
                trim_text_nodes: true,
                normalize_unicode: true,
                remove_comments: true,
                remove_empty_paragraphs: true,
                remove_navigation: false,
                remove_forms: false,
            },
            PreprocessingPreset::Aggressive => Self {
                strip_newlines: true,
                collapse_whitespace: true,
                remove_empty_elements: true,
                trim_text_nodes: true,
                normalize_unicode: true,
                remove_comments: true,
                remove_empty_paragraphs: true,
                remove_navigation: true,
                remove_forms: true,
            },
        }
    }
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self::from_preset(PreprocessingPreset::default())
    }
}

impl From<PreprocessingPreset> for PreprocessingOptions {
    fn from(preset: PreprocessingPreset) -> Self {
        Self::from_preset(preset)
    }
}

/// Heading syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadingStyle {
    /// `## Title`
    #[default]
    Atx,
    /// `## Title ##`
    AtxClosed,
    /// Setext underlines for levels 1 and 2, ATX below
    Underlined,
}

/// Code block syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeBlockStyle {
    #[default]
    Backticks,
    Tildes,
    /// Four-space indentation; the language tag is lost
    Indented,
}

/// Rendering of `<mark>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighlightStyle {
    /// `==text==`
    #[default]
    DoubleEqual,
    /// `<mark>text</mark>`
    Html,
    /// `**text**`
    Bold,
    /// Plain text
    None,
}

/// Everything that shapes the Markdown output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub whitespace_mode: WhitespaceMode,
    pub newline_style: NewlineStyle,
    pub list_indent: ListIndentStyle,
    pub wrap: WrapOptions,
    pub preprocessing: PreprocessingOptions,
    pub heading_style: HeadingStyle,
    /// Bullet characters, cycled by list nesting depth
    pub bullets: String,
    /// `*` or `_`; doubled for strong emphasis
    pub strong_em_symbol: char,
    pub code_block_style: CodeBlockStyle,
    /// Language tag for code blocks that declare none
    pub default_code_language: String,
    pub highlight_style: HighlightStyle,
    pub sub_symbol: String,
    pub sup_symbol: String,
    /// Elements rendered as their children only
    pub strip_tags: Vec<String>,
    /// Elements emitted verbatim as HTML
    pub preserve_tags: Vec<String>,
    pub skip_images: bool,
    /// Use `<br>` for line breaks inside table cells instead of a space
    pub br_in_tables: bool,
    /// Render block elements as inline text
    pub convert_as_inline: bool,
    pub parser: ParserStrategy,
    /// Ceiling on element nesting depth
    pub max_depth: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            whitespace_mode: WhitespaceMode::default(),
            newline_style: NewlineStyle::default(),
            list_indent: ListIndentStyle::default(),
            wrap: WrapOptions::default(),
            preprocessing: PreprocessingOptions::default(),
            heading_style: HeadingStyle::default(),
            bullets: "-".to_string(),
            strong_em_symbol: '*',
            code_block_style: CodeBlockStyle::default(),
            default_code_language: String::new(),
            highlight_style: HighlightStyle::default(),
            sub_symbol: "~".to_string(),
            sup_symbol: "^".to_string(),
            strip_tags: Vec::new(),
            preserve_tags: Vec::new(),
            skip_images: false,
            br_in_tables: false,
            convert_as_inline: false,
            parser: ParserStrategy::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ConversionOptions {
    /// Options with the given preprocessing preset and defaults elsewhere
    pub fn with_preset(preset: PreprocessingPreset) -> Self {
        Self {
            preprocessing: PreprocessingOptions::from_preset(preset),
            ..Self::default()
        }
    }

    /// Reject settings that cannot produce sensible output
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::InvalidInput` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.wrap.enabled && self.wrap.width == 0 {
            return Err(invalid("wrap width must be greater than 0 when wrapping is enabled"));
        }
        if self.list_indent == ListIndentStyle::Spaces(0) {
            return Err(invalid("list indent width must be greater than 0"));
        }
        if self.bullets.trim().is_empty() {
            return Err(invalid("at least one bullet character is required"));
        }
        if !matches!(self.strong_em_symbol, '*' | '_') {
            return Err(invalid("emphasis symbol must be '*' or '_'"));
        }
        if self.max_depth == 0 {
            return Err(invalid("maximum depth must be greater than 0"));
        }
        Ok(())
    }

    /// Bullet for a list at the given nesting depth (0 = outermost)
    pub fn bullet_for_depth(&self, depth: usize) -> char {
        let bullets: Vec<char> = self.bullets.chars().filter(|c| !c.is_whitespace()).collect();
        if bullets.is_empty() {
            return '-';
        }
        bullets[depth % bullets.len()]
    }

    pub(crate) fn is_stripped(&self, tag: &str) -> bool {
        self.strip_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub(crate) fn is_preserved(&self, tag: &str) -> bool {
        self.preserve_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

fn invalid(message: &str) -> ConversionError {
    ConversionError::InvalidInput(message.to_string())
}
