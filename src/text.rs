//! Text handling helpers
//!
//! Whitespace and Unicode normalization for text nodes, plus the small string
//! builders the converter uses for inline delimiters, code spans, fences and
//! line prefixes.

use std::borrow::Cow;

use crate::options::{ConversionOptions, WhitespaceMode};

/// Whitespace as HTML defines it (space, tab, LF, FF, CR)
///
/// Non-breaking and other Unicode spaces are content, not whitespace.
pub fn is_html_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0c')
}

/// Collapse every run of HTML whitespace to a single space
///
/// Leading and trailing runs are kept as one space so adjacent inline
/// content stays separated.
///
/// # Examples
///
/// ```rust
/// use html_markdown_converter::text::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("Hello   world"), "Hello world");
/// assert_eq!(collapse_whitespace("\n  a\tb  "), " a b ");
/// ```
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for ch in text.chars() {
        if is_html_whitespace(ch) {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

/// Map Unicode space separators to ASCII space and drop zero-width characters
pub fn normalize_unicode(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| unicode_space(c) || zero_width(c)) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(
        text.chars()
            .filter(|c| !zero_width(*c))
            .map(|c| if unicode_space(c) { ' ' } else { c })
            .collect(),
    )
}

fn unicode_space(c: char) -> bool {
    matches!(
        c,
        '\u{00a0}' | '\u{1680}' | '\u{2000}'..='\u{200a}' | '\u{202f}' | '\u{205f}' | '\u{3000}'
    )
}

fn zero_width(c: char) -> bool {
    matches!(c, '\u{200b}'..='\u{200d}' | '\u{2060}' | '\u{feff}')
}

/// Turn line breaks into spaces
pub fn strip_newlines(text: &str) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.replace("\r\n", " ").replace(['\n', '\r'], " "))
    } else {
        Cow::Borrowed(text)
    }
}

/// Apply the text-node pipeline the options ask for
///
/// Unicode normalization and newline stripping run first (when enabled by
/// the preprocessing flags), then whitespace collapsing in Normalized mode.
/// Strict mode keeps every remaining character.
pub fn prepare_text(text: &str, options: &ConversionOptions) -> String {
    let mut text = Cow::Borrowed(text);
    if options.preprocessing.normalize_unicode
        && let Cow::Owned(normalized) = normalize_unicode(&text)
    {
        text = Cow::Owned(normalized);
    }
    if options.preprocessing.strip_newlines
        && let Cow::Owned(stripped) = strip_newlines(&text)
    {
        text = Cow::Owned(stripped);
    }

    match options.whitespace_mode {
        WhitespaceMode::Normalized => collapse_whitespace(&text),
        WhitespaceMode::Strict => text.into_owned(),
    }
}

/// Whether the text has nothing visible (only whitespace or zero-width characters)
pub fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace() || zero_width(c))
}

/// Surround inline content with delimiters
///
/// Whitespace at the edges moves outside the delimiters (`** x **` is not
/// emphasis in Markdown). Content that is only whitespace comes back as a
/// single space, or nothing when empty.
///
/// # Examples
///
/// ```rust
/// use html_markdown_converter::text::wrap_inline;
///
/// assert_eq!(wrap_inline(" bold ", "**", "**"), " **bold** ");
/// assert_eq!(wrap_inline("   ", "**", "**"), " ");
/// assert_eq!(wrap_inline("", "*", "*"), "");
/// ```
pub fn wrap_inline(content: &str, open: &str, close: &str) -> String {
    let core = content.trim_matches(is_html_whitespace);
    if core.is_empty() {
        return if content.is_empty() {
            String::new()
        } else {
            " ".to_string()
        };
    }

    let start = content.len() - content.trim_start_matches(is_html_whitespace).len();
    let end = content.trim_end_matches(is_html_whitespace).len();

    let mut out = String::with_capacity(content.len() + open.len() + close.len());
    out.push_str(&content[..start]);
    out.push_str(open);
    out.push_str(core);
    out.push_str(close);
    out.push_str(&content[end..]);
    out
}

/// Longest run of `ch` in `text`
fn longest_run(text: &str, ch: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == ch {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Inline code span with a delimiter longer than any backtick run inside
///
/// # Examples
///
/// ```rust
/// use html_markdown_converter::text::code_span;
///
/// assert_eq!(code_span("x = 1"), "`x = 1`");
/// assert_eq!(code_span("a`b"), "``a`b``");
/// assert_eq!(code_span("`tick"), "`` `tick ``");
/// ```
pub fn code_span(code: &str) -> String {
    if code.is_empty() {
        return String::new();
    }
    let fence = "`".repeat(longest_run(code, '`') + 1);
    let pad = if code.starts_with('`') || code.ends_with('`') {
        " "
    } else {
        ""
    };
    format!("{fence}{pad}{code}{pad}{fence}")
}

/// Opening fence of at least three `ch`, longer than any run in `code`
pub fn code_fence(code: &str, ch: char) -> String {
    let length = (longest_run(code, ch) + 1).max(3);
    std::iter::repeat_n(ch, length).collect()
}

/// Flatten text onto one line, collapsing the whitespace left behind
pub fn squash_lines(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Make text safe inside a pipe-table cell
pub fn escape_table_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for ch in text.trim().chars() {
        match ch {
            '\n' | '\r' | '\t' => {
                if !prev_space {
                    out.push(' ');
                    prev_space = true;
                }
            }
            ' ' => {
                if !prev_space {
                    out.push(' ');
                }
                prev_space = true;
            }
            '|' => {
                out.push_str("\\|");
                prev_space = false;
            }
            _ => {
                out.push(ch);
                prev_space = false;
            }
        }
    }
    out
}

/// Prefix every line, using `first` on the first line and `rest` after
///
/// Empty lines receive `rest` with its trailing whitespace removed, so a
/// blockquote keeps its `>` on blank lines while list indentation leaves
/// them empty.
pub fn prefix_lines(text: &str, first: &str, rest: &str) -> String {
    let mut out = String::with_capacity(text.len() + first.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let prefix = if i == 0 { first } else { rest };
        if line.is_empty() {
            out.push_str(prefix.trim_end());
        } else {
            out.push_str(prefix);
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{PreprocessingOptions, PreprocessingPreset};
    use proptest::prelude::*;

    #[test]
    fn test_collapse_keeps_nbsp() {
        assert_eq!(collapse_whitespace("a\u{a0}\u{a0}b"), "a\u{a0}\u{a0}b");
        assert_eq!(collapse_whitespace("a \r\n\t b"), "a b");
    }

    #[test]
    fn test_normalize_unicode() {
        assert_eq!(normalize_unicode("a\u{a0}b\u{3000}c"), "a b c");
        assert_eq!(normalize_unicode("zero\u{200b}width\u{feff}"), "zerowidth");
        assert!(matches!(normalize_unicode("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_newlines() {
        assert_eq!(strip_newlines("a\r\nb\nc\rd"), "a b c d");
    }

    #[test]
    fn test_prepare_text_modes() {
        let mut options = ConversionOptions::default();
        assert_eq!(prepare_text("Hello   world", &options), "Hello world");

        options.whitespace_mode = WhitespaceMode::Strict;
        assert_eq!(prepare_text("Hello   world", &options), "Hello   world");

        options.preprocessing = PreprocessingOptions::from_preset(PreprocessingPreset::Aggressive);
        assert_eq!(prepare_text("a\nb", &options), "a b");
    }

    #[test]
    fn test_prepare_text_unicode_flag() {
        let mut options = ConversionOptions::default();
        assert_eq!(prepare_text("a\u{a0} b", &options), "a b");

        options.preprocessing.normalize_unicode = false;
        assert_eq!(prepare_text("a\u{a0} b", &options), "a\u{a0} b");
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank(" \u{a0}\u{200b}\n"));
        assert!(!is_blank(" x "));
    }

    #[test]
    fn test_wrap_inline_strict_edges() {
        assert_eq!(wrap_inline("\n  x  ", "_", "_"), "\n  _x_  ");
    }

    #[test]
    fn test_fences() {
        assert_eq!(code_fence("plain", '`'), "```");
        assert_eq!(code_fence("has ```` inside", '`'), "`````");
        assert_eq!(code_fence("~~~", '~'), "~~~~");
    }

    #[test]
    fn test_escape_table_cell() {
        assert_eq!(escape_table_cell(" a | b\nc  d "), "a \\| b c d");
    }

    #[test]
    fn test_prefix_lines() {
        assert_eq!(prefix_lines("a\n\nb", "> ", "> "), "> a\n>\n> b");
        assert_eq!(prefix_lines("item\nmore", "- ", "  "), "- item\n  more");
        assert_eq!(prefix_lines("item\n\nmore", "- ", "  "), "- item\n\n  more");
    }

    proptest! {
        #[test]
        fn prop_collapse_leaves_no_double_space(text in "[ a-z\t\n]{0,60}") {
            let collapsed = collapse_whitespace(&text);
            prop_assert!(!collapsed.contains("  "));
            prop_assert!(!collapsed.contains(['\t', '\n']));
        }

        #[test]
        fn prop_collapse_keeps_words(text in "[ a-z\t\n]{0,60}") {
            let collapsed = collapse_whitespace(&text);
            let before: Vec<&str> = text.split_whitespace().collect();
            let after: Vec<&str> = collapsed.split_whitespace().collect();
            prop_assert_eq!(before, after);
        }

        #[test]
        fn prop_code_span_delimiter_is_unique(code in "[a-z`]{1,20}") {
            let span = code_span(&code);
            let fence_len = span.chars().take_while(|c| *c == '`').count();
            prop_assert!(fence_len > longest_run(&code, '`'));
        }
    }
}
