//! Line re-flow for finished Markdown
//!
//! Runs once over the assembled output when wrapping is enabled. Lines are
//! wrapped greedily by character count. Structure is left alone: fenced code,
//! headings, table rows, HTML lines and blank lines pass through untouched,
//! and the prefix of a line (indentation, `>` markers, a list marker) is
//! repeated as plain indentation on its continuation lines.

use crate::options::WrapOptions;

/// Re-flow `text` to `options.width`
///
/// With `preserve_words` a word longer than the available width is kept
/// whole on its own line; without it such words are split so no line
/// exceeds the width.
///
/// # Examples
///
/// ```rust
/// use html_markdown_converter::options::WrapOptions;
/// use html_markdown_converter::wrap::wrap_text;
///
/// let options = WrapOptions { enabled: true, width: 12, preserve_words: true };
/// assert_eq!(wrap_text("- one two three four", &options), "- one two\n  three four");
/// ```
pub fn wrap_text(text: &str, options: &WrapOptions) -> String {
    let width = options.width.max(1);
    let mut out = String::with_capacity(text.len() + text.len() / width);
    let mut in_fence = false;

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            out.push_str(line);
            continue;
        }

        if in_fence || !wrappable(line, width) {
            out.push_str(line);
            continue;
        }

        wrap_line(line, width, options.preserve_words, &mut out);
    }

    out
}

fn wrappable(line: &str, width: usize) -> bool {
    if line.chars().count() <= width {
        return false;
    }
    let trimmed = line.trim_start();
    !(trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with('|')
        || trimmed.starts_with('<')
        || line.starts_with("    ")
        || line.starts_with('\t'))
}

/// Split a line into its structural prefix and the prose after it
fn split_prefix(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() && bytes[pos] == b' ' {
        pos += 1;
    }
    while bytes.get(pos) == Some(&b'>') {
        pos += 1;
        if bytes.get(pos) == Some(&b' ') {
            pos += 1;
        }
    }

    let rest = &line[pos..];
    let marker_len = if rest.starts_with("- ") || rest.starts_with("* ") || rest.starts_with("+ ") {
        2
    } else {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && rest[digits..].starts_with(". ") {
            digits + 2
        } else {
            0
        }
    };

    line.split_at(pos + marker_len)
}

/// Prefix for continuation lines: quote markers kept, list markers blanked
fn continuation_prefix(prefix: &str) -> String {
    let quote_end = prefix
        .rfind('>')
        .map(|i| if prefix[i + 1..].starts_with(' ') { i + 2 } else { i + 1 })
        .unwrap_or(0);
    let (quotes, marker) = prefix.split_at(quote_end);
    let mut out = quotes.to_string();
    out.extend(std::iter::repeat_n(' ', marker.chars().count()));
    out
}

fn wrap_line(line: &str, width: usize, preserve_words: bool, out: &mut String) {
    let (prefix, body) = split_prefix(line);

    // A hard break marker has to stay at the end of the last line
    let (body, hard_break) = if let Some(stripped) = body.strip_suffix("  ") {
        (stripped.trim_end(), "  ")
    } else if let Some(stripped) = body.strip_suffix('\\') {
        (stripped, "\\")
    } else {
        (body, "")
    };

    let follow = continuation_prefix(prefix);
    let prefix_len = prefix.chars().count().max(follow.chars().count());
    let available = width.saturating_sub(prefix_len).max(1);

    let mut lines = LineBuilder::new(available);
    for (gap, word) in gaps_and_words(body) {
        let word_len = word.chars().count();

        if word_len > available && !preserve_words {
            let chars: Vec<char> = word.chars().collect();
            for (i, chunk) in chars.chunks(available).enumerate() {
                let piece: String = chunk.iter().collect();
                lines.push(if i == 0 { gap } else { "" }, &piece, chunk.len());
            }
            continue;
        }

        lines.push(gap, word, word_len);
    }
    let lines = lines.finish();

    let last = lines.len() - 1;
    for (i, text) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str(&follow);
        } else {
            out.push_str(prefix);
        }
        out.push_str(text);
        if i == last {
            out.push_str(hard_break);
        }
    }
}

/// Split prose into words, each paired with the run of spaces before it
fn gaps_and_words(body: &str) -> Vec<(&str, &str)> {
    let mut pieces = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let after_gap = rest.trim_start_matches(' ');
        let gap = &rest[..rest.len() - after_gap.len()];
        let word_end = after_gap.find(' ').unwrap_or(after_gap.len());
        if word_end == 0 {
            break;
        }
        pieces.push((gap, &after_gap[..word_end]));
        rest = &after_gap[word_end..];
    }
    pieces
}

/// Greedy line filling; a gap is kept verbatim inside a line and dropped at a break
struct LineBuilder {
    done: Vec<String>,
    current: String,
    current_len: usize,
    available: usize,
}

impl LineBuilder {
    fn new(available: usize) -> Self {
        Self {
            done: Vec::new(),
            current: String::new(),
            current_len: 0,
            available,
        }
    }

    fn push(&mut self, gap: &str, word: &str, word_len: usize) {
        if self.current_len > 0 && self.current_len + gap.len() + word_len > self.available {
            self.done.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
        if self.current_len > 0 || self.done.is_empty() {
            self.current.push_str(gap);
            self.current_len += gap.len();
        }
        self.current.push_str(word);
        self.current_len += word_len;
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() || self.done.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}
