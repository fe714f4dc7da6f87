//! Markdown converter - transforms the node tree to Markdown
//!
//! This module holds the conversion engine: a single depth-first walk over
//! the parsed tree that emits Markdown while tracking nesting context (list
//! stack, table phase, blockquote depth). The same walk drives the optional
//! [`HtmlVisitor`] and feeds the [`MetadataObserver`], so neither needs a
//! second pass.
//!
//! # Traversal
//!
//! Every element goes through the same steps:
//!
//! 1. Its metadata is reported to the observer (headings, links, images,
//!    head fields, structured data), before any visitor can intervene, so
//!    metadata always reflects the source document.
//! 2. `visit_element_start` runs. A `Custom`, `Skip` or `PreserveSource`
//!    outcome replaces the element's output and its subtree is walked for
//!    metadata only.
//! 3. The element's handler renders its Markdown into a private buffer and
//!    calls the construct hook (`visit_heading`, `visit_link`, ...) with the
//!    rendered text; an overriding outcome replaces the buffer.
//! 4. `visit_element_end` sees the final buffer and may replace it.
//! 5. The buffer is appended to the parent's output as a block (separated by
//!    a blank line) or inline.
//!
//! An `Error` outcome from any hook aborts the whole conversion; no partial
//! output is returned.
//!
//! # Element Handlers
//!
//! - **Headings (h1-h6)**: ATX (`#`), closed ATX or setext underlines
//! - **Paragraphs, divs, sections**: blocks separated by blank lines
//! - **Emphasis family**: `**strong**`, `*em*`, `~~del~~`, `<u>u</u>`,
//!   `~sub~`, `^sup^`, `==mark==`
//! - **Links and images**: `[text](href "title")`, `![alt](src "title")`
//! - **Lists**: bullets cycled by depth or numbers honouring `start`/`value`,
//!   nested content indented by the configured unit
//! - **Tables**: GFM pipe tables with alignment, `colspan` padding and caption
//! - **Blockquotes**: `> ` per nesting level
//! - **Code**: fenced blocks with a language tag, backtick spans inline
//! - **Definition lists, forms, media, details, figures**: Markdown
//!   approximations; custom elements render their children
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::converter::MarkdownConverter;
//! use html_markdown_converter::metadata::NoopCollector;
//! use html_markdown_converter::options::ConversionOptions;
//! use html_markdown_converter::parser::{parse, ParserStrategy};
//!
//! let tree = parse("<h2>Setup</h2><ul><li>one</li><li>two</li></ul>", ParserStrategy::Auto).unwrap();
//! let options = ConversionOptions::default();
//! let mut collector = NoopCollector;
//! let markdown = MarkdownConverter::new(&options, None, &mut collector).convert(&tree).unwrap();
//!
//! assert_eq!(markdown, "## Setup\n\n- one\n- two\n");
//! ```

use crate::dom::{Namespace, Node, NodeKind};
use crate::error::ConversionError;
use crate::metadata::MetadataObserver;
use crate::options::{
    CodeBlockStyle, ConversionOptions, HeadingStyle, HighlightStyle, NewlineStyle, WhitespaceMode,
};
use crate::text::{self, is_html_whitespace};
use crate::visitor::{HtmlVisitor, NodeContext, NodeType, VisitOutcome};
use crate::wrap;

/// Elements rendered as blocks separated by blank lines
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "caption", "center", "details", "dialog", "dd",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hgroup", "hr", "legend", "li", "listing", "main", "menu", "nav",
    "ol", "p", "plaintext", "pre", "search", "section", "summary", "table", "tr", "ul", "xmp",
];

/// Elements that never produce output; their metadata is still collected
const NON_CONTENT_ELEMENTS: &[&str] = &[
    "head", "title", "meta", "link", "base", "script", "style", "noscript", "template", "noembed",
    "noframes",
];

/// Elements that count as content even without text
const MEDIA_ELEMENTS: &[&str] = &[
    "img", "video", "audio", "iframe", "svg", "math", "input", "select", "textarea", "embed",
    "object", "canvas", "picture", "hr", "br",
];

/// Table column alignment (GFM)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableAlignment {
    Default,
    Left,
    Center,
    Right,
}

/// Which part of a table is being converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TablePhase {
    #[default]
    None,
    Header,
    Body,
}

/// One open list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListFrame {
    pub ordered: bool,
    /// Number the next ordered item receives
    pub next_number: u64,
}

/// Mutable traversal state; lives for one conversion
#[derive(Debug, Default)]
pub struct ConversionState {
    pub list_stack: Vec<ListFrame>,
    pub table_phase: TablePhase,
    pub blockquote_depth: usize,
    /// Elements seen so far, in document order
    pub position: usize,
}

/// How an element's output joins its parent's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Block,
    Inline,
    /// Block when the rendered children end in a block, inline otherwise
    Transparent,
}

/// Where a node sits in the tree, as reported to the visitor
#[derive(Debug, Clone, Copy)]
struct Place<'n> {
    parent: Option<&'n str>,
    index: usize,
    depth: usize,
}

/// Rendered table row
enum RowOutput {
    Cells(Vec<String>, Vec<TableAlignment>),
    Line(String),
    Omitted,
}

/// Tree-to-Markdown converter for one conversion call
///
/// Consumed by [`MarkdownConverter::convert`]; build a new one per call.
pub struct MarkdownConverter<'a, 'v> {
    options: &'a ConversionOptions,
    visitor: Option<&'a mut (dyn HtmlVisitor + 'v)>,
    collector: &'a mut dyn MetadataObserver,
    state: ConversionState,
}

impl<'a, 'v> MarkdownConverter<'a, 'v> {
    /// Create a converter
    ///
    /// # Arguments
    ///
    /// * `options` - Formatting policy, read-only for the whole call
    /// * `visitor` - Optional interception hooks
    /// * `collector` - Metadata observer; pass a `NoopCollector` when no metadata is wanted
    pub fn new(
        options: &'a ConversionOptions,
        visitor: Option<&'a mut (dyn HtmlVisitor + 'v)>,
        collector: &'a mut dyn MetadataObserver,
    ) -> Self {
        Self {
            options,
            visitor,
            collector,
            state: ConversionState::default(),
        }
    }

    /// Convert a parsed tree to Markdown
    ///
    /// The result is post-processed: re-flowed when wrapping is enabled,
    /// line endings normalized, and terminated by exactly one newline
    /// (empty output stays empty).
    ///
    /// # Errors
    ///
    /// - `ConversionError::VisitorAborted` when a visitor hook returns `Error`
    /// - `ConversionError::ResourceLimitExceeded` when nesting exceeds `max_depth`
    ///   or an oversized structured data block is configured to be fatal
    pub fn convert(mut self, tree: &Node) -> Result<String, ConversionError> {
        let mut output = String::with_capacity(1024);
        let root = Place {
            parent: None,
            index: 0,
            depth: 0,
        };
        self.node(tree, root, &mut output)?;
        Ok(self.finish(&output))
    }

    fn finish(&self, output: &str) -> String {
        let markdown = output.trim_start_matches('\n').trim_end();
        if markdown.is_empty() {
            return String::new();
        }

        if self.options.wrap.enabled {
            let wrapped = wrap::wrap_text(markdown, &self.options.wrap);
            normalize_output(&wrapped, self.options.preprocessing.collapse_whitespace)
        } else {
            normalize_output(markdown, self.options.preprocessing.collapse_whitespace)
        }
    }

    fn node<'n>(&mut self, node: &'n Node, place: Place<'n>, out: &mut String) -> Result<(), ConversionError> {
        match &node.kind {
            NodeKind::Document => self.children(node, place.parent, place.depth, out),
            NodeKind::Text(text) => self.text(node, text, place, out),
            NodeKind::Comment(comment) => {
                if !self.options.preprocessing.remove_comments {
                    self.emit(out, &format!("<!--{comment}-->"), Flow::Block);
                }
                Ok(())
            }
            NodeKind::Element { tag, namespace, .. } => self.element(node, tag, *namespace, place, out),
        }
    }

    fn children<'n>(
        &mut self,
        node: &'n Node,
        parent: Option<&'n str>,
        depth: usize,
        out: &mut String,
    ) -> Result<(), ConversionError> {
        for (index, child) in node.children.iter().enumerate() {
            self.node(child, Place { parent, index, depth }, out)?;
        }
        Ok(())
    }

    /// Render an element's children into a fresh buffer
    fn inner<'n>(&mut self, node: &'n Node, tag: &'n str, depth: usize) -> Result<String, ConversionError> {
        let mut buf = String::new();
        self.children(node, Some(tag), depth + 1, &mut buf)?;
        Ok(buf)
    }

    fn text(&mut self, node: &Node, raw: &str, place: Place<'_>, out: &mut String) -> Result<(), ConversionError> {
        let mut text = text::prepare_text(raw, self.options);
        if text.is_empty() {
            return Ok(());
        }

        if text.chars().all(is_html_whitespace) {
            let redundant = out.ends_with('\n')
                || (self.options.whitespace_mode == WhitespaceMode::Normalized && out.ends_with(' '));
            if !redundant {
                self.push_inline(out, &text);
            }
            return Ok(());
        }

        let ctx = NodeContext {
            node_type: NodeType::Text,
            tag_name: "",
            attributes: &[],
            depth: place.depth,
            index_in_parent: place.index,
            parent_tag: place.parent,
            is_inline: true,
        };
        let outcome = self.call(|v| v.visit_text(&ctx, &text));
        apply(outcome, node, &mut text)?;

        self.push_inline(out, &text);
        Ok(())
    }

    fn element<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        namespace: Namespace,
        place: Place<'n>,
        out: &mut String,
    ) -> Result<(), ConversionError> {
        if place.depth >= self.options.max_depth {
            return Err(ConversionError::ResourceLimitExceeded(format!(
                "element nesting exceeds maximum depth of {}",
                self.options.max_depth
            )));
        }

        self.state.position += 1;
        self.observe(node, tag)?;

        if namespace == Namespace::Svg {
            return self.collect_descendants(node);
        }

        let preprocessing = &self.options.preprocessing;
        if NON_CONTENT_ELEMENTS.contains(&tag)
            || (tag == "nav" && preprocessing.remove_navigation)
            || (tag == "form" && preprocessing.remove_forms)
        {
            return self.collect_descendants(node);
        }

        // Structural wrappers are invisible to the visitor
        if matches!(tag, "html" | "body") {
            return self.children(node, place.parent, place.depth, out);
        }
        if self.options.is_stripped(tag) {
            let mut buf = String::new();
            self.children(node, place.parent, place.depth, &mut buf)?;
            self.emit(out, &buf, Flow::Transparent);
            return Ok(());
        }

        let node_type = NodeType::for_tag(tag);
        let flow = flow_for(tag, node_type);

        if self.options.is_preserved(tag) {
            self.collect_descendants(node)?;
            self.emit(out, &node.to_html(), flow);
            return Ok(());
        }

        if self.options.preprocessing.remove_empty_elements && is_empty_element(node, tag) {
            self.collect_descendants(node)?;
            if flow == Flow::Inline && !node.children.is_empty() {
                self.push_inline(out, " ");
            }
            return Ok(());
        }

        let ctx = NodeContext {
            node_type,
            tag_name: tag,
            attributes: node.attrs(),
            depth: place.depth,
            index_in_parent: place.index,
            parent_tag: place.parent,
            is_inline: flow != Flow::Block,
        };

        let outcome = self.call(|v| v.visit_element_start(&ctx));
        if let Some(replacement) = resolve(outcome, node)? {
            self.collect_descendants(node)?;
            self.emit(out, &replacement, flow);
            return Ok(());
        }

        let mut rendered = self.render(node, tag, &ctx, place.depth)?;

        let outcome = self.call(|v| v.visit_element_end(&ctx, &rendered));
        apply(outcome, node, &mut rendered)?;

        self.emit(out, &rendered, flow);
        Ok(())
    }

    /// Dispatch to the element's handler
    fn render<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.handle_heading(node, tag, ctx, depth),
            "p" => self.handle_paragraph(node, ctx, depth),
            "blockquote" => self.handle_blockquote(node, ctx, depth),
            "pre" | "listing" | "xmp" | "plaintext" => self.handle_code_block(node, ctx),
            "hr" => self.handle_rule(node, ctx),
            "br" => self.handle_line_break(node, ctx),
            "ul" | "ol" | "menu" => self.handle_list(node, tag, ctx, depth),
            "li" => self.handle_list_item(node, ctx, depth),
            "table" => self.handle_table(node, ctx, depth),
            "a" => self.handle_link(node, ctx, depth),
            "img" => self.handle_image(node, ctx),
            "code" | "kbd" | "samp" | "tt" => self.handle_inline_code(node, ctx),
            "dl" => self.handle_definition_list(node, ctx, depth),
            "dt" => self.handle_definition_term(node, ctx, depth),
            "dd" => self.handle_definition_description(node, ctx, depth),
            "form" => self.handle_form(node, ctx, depth),
            "input" => self.handle_input(node, ctx),
            "button" => self.handle_button(node, ctx, depth),
            "select" => self.handle_select(node),
            "textarea" => self.handle_textarea(node),
            "audio" | "video" | "iframe" => self.handle_media(node, tag, ctx),
            "details" => self.handle_details(node, ctx, depth),
            "summary" => self.handle_summary(node, ctx, depth),
            "figure" => self.handle_figure(node, ctx, depth),
            "figcaption" => self.handle_figcaption(node, ctx, depth),
            "math" => self.handle_math(node),
            _ => match ctx.node_type {
                NodeType::Strong
                | NodeType::Em
                | NodeType::Strikethrough
                | NodeType::Underline
                | NodeType::Subscript
                | NodeType::Superscript
                | NodeType::Mark => self.handle_inline_format(node, tag, ctx, depth),
                NodeType::Custom => self.handle_custom_element(node, tag, ctx, depth),
                _ => self.inner(node, tag, depth),
            },
        }
    }

    /// Handle heading elements (h1-h6)
    ///
    /// The heading text is the inline rendering of the children flattened onto
    /// one line. Empty headings produce nothing.
    ///
    /// # Output Format
    ///
    /// - `Atx`: `## Heading`
    /// - `AtxClosed`: `## Heading ##`
    /// - `Underlined`: setext underline (`===` / `---`) for levels 1 and 2, ATX below
    fn handle_heading<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let level = heading_level(tag);
        let content = self.inner(node, tag, depth)?;
        let text = self.flatten(&content);
        if text.is_empty() {
            return Ok(String::new());
        }

        let hashes = "#".repeat(usize::from(level));
        let mut rendered = if self.options.convert_as_inline {
            text.clone()
        } else {
            match self.options.heading_style {
                HeadingStyle::Atx => format!("{hashes} {text}"),
                HeadingStyle::AtxClosed => format!("{hashes} {text} {hashes}"),
                HeadingStyle::Underlined if level <= 2 => {
                    let rule = if level == 1 { "=" } else { "-" };
                    let width = text.chars().count().max(3);
                    format!("{text}\n{}", rule.repeat(width))
                }
                HeadingStyle::Underlined => format!("{hashes} {text}"),
            }
        };

        let id = node.attr("id");
        let outcome = self.call(|v| v.visit_heading(ctx, level, &text, id));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle paragraph elements
    ///
    /// Paragraphs with no visible content are dropped when
    /// `remove_empty_paragraphs` is set.
    fn handle_paragraph<'n>(
        &mut self,
        node: &'n Node,
        _ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "p", depth)?;
        let content = self.trim_content(&content);
        if self.options.preprocessing.remove_empty_paragraphs && text::is_blank(&content) {
            return Ok(String::new());
        }
        Ok(content)
    }

    fn handle_blockquote<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        self.state.blockquote_depth += 1;
        let content = self.inner(node, "blockquote", depth);
        self.state.blockquote_depth -= 1;

        let content = self.trim_content(&content?);
        if text::is_blank(&content) {
            return Ok(String::new());
        }

        let mut rendered = if self.options.convert_as_inline {
            content.clone()
        } else {
            text::prefix_lines(&content, "> ", "> ")
        };

        let quote_depth = self.state.blockquote_depth + 1;
        let outcome = self.call(|v| v.visit_blockquote(ctx, &content, quote_depth));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle preformatted code blocks
    ///
    /// Code is taken verbatim from the subtree (with `<br>` as a newline), never
    /// normalized. The language comes from a `language-*`/`lang-*` class or a
    /// `data-language` attribute on the `pre` or its `code` child, falling
    /// back to `default_code_language`. Fences grow past any fence-like run in
    /// the code.
    fn handle_code_block<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
    ) -> Result<String, ConversionError> {
        self.collect_descendants(node)?;

        let code_child = node.children.iter().find(|c| c.is_element("code"));
        let language = code_language(node)
            .or_else(|| code_child.and_then(code_language))
            .or_else(|| {
                let fallback = self.options.default_code_language.trim();
                (!fallback.is_empty()).then(|| fallback.to_string())
            });

        let mut raw = String::new();
        raw_text(node, &mut raw);
        let code = raw.trim_end_matches('\n');

        let mut rendered = if self.options.convert_as_inline {
            text::code_span(code)
        } else {
            match self.options.code_block_style {
                CodeBlockStyle::Backticks | CodeBlockStyle::Tildes => {
                    let ch = if self.options.code_block_style == CodeBlockStyle::Tildes { '~' } else { '`' };
                    let fence = text::code_fence(code, ch);
                    let lang = language.as_deref().unwrap_or("");
                    if code.is_empty() {
                        format!("{fence}{lang}\n{fence}")
                    } else {
                        format!("{fence}{lang}\n{code}\n{fence}")
                    }
                }
                CodeBlockStyle::Indented => text::prefix_lines(code, "    ", "    "),
            }
        };

        let outcome = self.call(|v| v.visit_code_block(ctx, language.as_deref(), code));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_rule<'n>(&mut self, node: &'n Node, ctx: &NodeContext<'n>) -> Result<String, ConversionError> {
        let mut rendered = if self.options.convert_as_inline {
            String::new()
        } else {
            "---".to_string()
        };
        let outcome = self.call(|v| v.visit_horizontal_rule(ctx));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle forced line breaks
    ///
    /// Inside table cells a break cannot end the line, so it becomes a space
    /// (or a literal `<br>` with `br_in_tables`).
    fn handle_line_break<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
    ) -> Result<String, ConversionError> {
        let mut rendered = if self.state.table_phase != TablePhase::None {
            if self.options.br_in_tables { "<br>" } else { " " }.to_string()
        } else if self.options.convert_as_inline {
            " ".to_string()
        } else {
            match self.options.newline_style {
                NewlineStyle::Spaces => "  \n".to_string(),
                NewlineStyle::Backslash => "\\\n".to_string(),
            }
        };
        let outcome = self.call(|v| v.visit_line_break(ctx));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle list elements (ul/ol/menu)
    ///
    /// Items are rendered one per line with no blank line between them.
    /// Ordered lists start at the `start` attribute (default 1).
    fn handle_list<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let ordered = tag == "ol";
        let outcome = self.call(|v| v.visit_list_start(ctx, ordered));
        if let Some(replacement) = resolve(outcome, node)? {
            self.collect_descendants(node)?;
            return Ok(replacement);
        }

        let start = if ordered {
            node.attr("start")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(1)
        } else {
            1
        };

        self.state.list_stack.push(ListFrame {
            ordered,
            next_number: start,
        });
        let items = self.list_entries(node, tag, depth);
        self.state.list_stack.pop();

        let mut rendered = items?.join("\n");
        let outcome = self.call(|v| v.visit_list_end(ctx, ordered, &rendered));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn list_entries<'n>(&mut self, node: &'n Node, tag: &'n str, depth: usize) -> Result<Vec<String>, ConversionError> {
        let mut entries = Vec::new();
        for (index, child) in node.children.iter().enumerate() {
            let mut buf = String::new();
            let place = Place {
                parent: Some(tag),
                index,
                depth: depth + 1,
            };
            self.node(child, place, &mut buf)?;
            let entry = buf.trim_matches('\n').trim_end();
            if !entry.trim().is_empty() {
                entries.push(entry.to_string());
            }
        }
        Ok(entries)
    }

    /// Handle list items
    ///
    /// The item content is indented by the list indent unit on continuation
    /// lines, so nested lists and extra paragraphs stay inside the item.
    /// Nested lists follow their text with no blank line in between.
    fn handle_list_item<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let list_depth = self.state.list_stack.len().saturating_sub(1);
        let (ordered, marker) = match self.state.list_stack.last_mut() {
            Some(frame) if frame.ordered => {
                let number = node
                    .attr("value")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(frame.next_number);
                frame.next_number = number.saturating_add(1);
                (true, format!("{number}."))
            }
            _ => (false, self.options.bullet_for_depth(list_depth).to_string()),
        };

        let content = self.list_item_content(node, depth)?;
        let indent = self.options.list_indent.unit();
        let mut rendered = if content.is_empty() {
            marker.clone()
        } else {
            text::prefix_lines(&content, &format!("{marker} "), &indent)
        };

        let outcome = self.call(|v| v.visit_list_item(ctx, ordered, &marker, &content));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn list_item_content<'n>(&mut self, node: &'n Node, depth: usize) -> Result<String, ConversionError> {
        let mut parts: Vec<(String, bool)> = Vec::new();
        let mut flow = String::new();

        for (index, child) in node.children.iter().enumerate() {
            let place = Place {
                parent: Some("li"),
                index,
                depth: depth + 1,
            };
            let nested_list = child.namespace() == Some(Namespace::Html)
                && matches!(child.tag(), Some("ul" | "ol" | "menu"));

            if !nested_list {
                self.node(child, place, &mut flow)?;
                continue;
            }

            let text = self.trim_content(&flow);
            if !text.is_empty() {
                parts.push((text, false));
            }
            flow.clear();

            let mut nested = String::new();
            self.node(child, place, &mut nested)?;
            let nested = nested.trim_matches('\n').trim_end();
            if !nested.is_empty() {
                parts.push((nested.to_string(), true));
            }
        }

        let text = self.trim_content(&flow);
        if !text.is_empty() {
            parts.push((text, false));
        }

        let mut content = String::new();
        for (i, (part, is_list)) in parts.iter().enumerate() {
            if i > 0 {
                content.push_str(if *is_list { "\n" } else { "\n\n" });
            }
            content.push_str(part);
        }
        Ok(content)
    }

    /// Handle table elements
    ///
    /// Produces a GFM pipe table. The header is the first `thead` row, or the
    /// first row when there is no `thead`. Every row is padded to the widest
    /// row; `colspan` repeats empty cells.
    fn handle_table<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let outcome = self.call(|v| v.visit_table_start(ctx));
        if let Some(replacement) = resolve(outcome, node)? {
            self.collect_descendants(node)?;
            return Ok(replacement);
        }

        let mut caption = String::new();
        let mut rows: Vec<(&'n Node, &'n str, bool)> = Vec::new();
        for child in &node.children {
            match child.tag() {
                Some("caption") => {
                    self.state.position += 1;
                    self.observe(child, "caption")?;
                    let content = self.inner(child, "caption", depth + 1)?;
                    caption = self.flatten(&content);
                }
                Some(section @ ("thead" | "tbody" | "tfoot")) => {
                    self.state.position += 1;
                    self.observe(child, section)?;
                    for row in &child.children {
                        match row.tag() {
                            Some("tr") => rows.push((row, section, section == "thead")),
                            Some(other) => {
                                self.state.position += 1;
                                self.observe(row, other)?;
                                self.collect_descendants(row)?;
                            }
                            None => {}
                        }
                    }
                }
                Some("tr") => rows.push((child, "table", false)),
                Some(other) => {
                    self.state.position += 1;
                    self.observe(child, other)?;
                    self.collect_descendants(child)?;
                }
                None => {}
            }
        }

        let header_index = rows.iter().position(|(_, _, in_head)| *in_head).unwrap_or(0);

        let saved_phase = self.state.table_phase;
        let mut outputs = Vec::with_capacity(rows.len());
        let mut failure = None;
        for (index, &(row, parent, _)) in rows.iter().enumerate() {
            let is_header = index == header_index;
            self.state.table_phase = if is_header { TablePhase::Header } else { TablePhase::Body };
            match self.table_row(row, parent, index, depth + 1, is_header) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.state.table_phase = saved_phase;
        if let Some(e) = failure {
            return Err(e);
        }

        let columns = outputs
            .iter()
            .map(|row| match row {
                RowOutput::Cells(cells, _) => cells.len(),
                _ => 0,
            })
            .max()
            .unwrap_or(0);

        let mut lines: Vec<String> = Vec::new();
        let order = std::iter::once(header_index).chain((0..outputs.len()).filter(|i| *i != header_index));
        for index in order {
            let Some(row) = outputs.get(index) else {
                continue;
            };
            match row {
                RowOutput::Cells(cells, _) => lines.push(format_row(cells, columns)),
                RowOutput::Line(line) => lines.push(line.clone()),
                RowOutput::Omitted => continue,
            }
            if index == header_index && columns > 0 {
                let alignments: &[TableAlignment] = match row {
                    RowOutput::Cells(_, alignments) => alignments.as_slice(),
                    _ => &[],
                };
                lines.push(separator_row(alignments, columns));
            }
        }

        let table = lines.join("\n");
        let mut rendered = match (caption.is_empty(), table.is_empty()) {
            (true, _) => table,
            (false, true) => caption,
            (false, false) => format!("{caption}\n\n{table}"),
        };

        let outcome = self.call(|v| v.visit_table_end(ctx, &rendered));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn table_row<'n>(
        &mut self,
        row: &'n Node,
        parent: &'n str,
        index: usize,
        depth: usize,
        is_header: bool,
    ) -> Result<RowOutput, ConversionError> {
        self.state.position += 1;
        self.observe(row, "tr")?;

        let mut cells = Vec::new();
        let mut alignments = Vec::new();
        for cell in &row.children {
            match cell.tag() {
                Some(tag @ ("td" | "th")) => {
                    self.state.position += 1;
                    self.observe(cell, tag)?;
                    let content = self.inner(cell, tag, depth + 1)?;
                    let alignment = cell_alignment(cell);
                    let span = cell
                        .attr("colspan")
                        .and_then(|s| s.trim().parse::<usize>().ok())
                        .filter(|span| (1..=1000).contains(span))
                        .unwrap_or(1);

                    cells.push(text::escape_table_cell(&content));
                    alignments.push(alignment);
                    for _ in 1..span {
                        cells.push(String::new());
                        alignments.push(alignment);
                    }
                }
                Some(other) => {
                    self.state.position += 1;
                    self.observe(cell, other)?;
                    self.collect_descendants(cell)?;
                }
                None => {}
            }
        }

        let ctx = NodeContext {
            node_type: NodeType::TableRow,
            tag_name: "tr",
            attributes: row.attrs(),
            depth,
            index_in_parent: index,
            parent_tag: Some(parent),
            is_inline: false,
        };
        let outcome = self.call(|v| v.visit_table_row(&ctx, &cells, is_header));
        Ok(match resolve(outcome, row)? {
            None => RowOutput::Cells(cells, alignments),
            Some(line) if line.is_empty() => RowOutput::Omitted,
            Some(line) => RowOutput::Line(line),
        })
    }

    /// Handle anchor (link) elements
    ///
    /// Converts anchors to `[text](href "title")`. Without an `href` the
    /// children are emitted as plain text. Whitespace at the edges of the
    /// link text is moved outside the brackets.
    fn handle_link<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "a", depth)?;
        let Some(href) = node.attr("href").map(str::trim) else {
            return Ok(content);
        };

        let text = self.flatten(&content);
        if text.is_empty() && self.options.preprocessing.remove_empty_elements {
            return Ok(String::new());
        }

        let title = node.attr("title").map(str::trim).filter(|t| !t.is_empty());
        let link = format!("[{text}]({}{})", destination(href), title_suffix(title));
        let mut rendered = self.keep_edges(&content, link);

        let outcome = self.call(|v| v.visit_link(ctx, href, &text, title));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle image elements
    ///
    /// Converts `img` to `![alt](src "title")`. Images without a `src`, and all
    /// images when `skip_images` is set, produce nothing.
    fn handle_image<'n>(&mut self, node: &'n Node, ctx: &NodeContext<'n>) -> Result<String, ConversionError> {
        let src = node.attr("src").map(str::trim).unwrap_or("");
        if src.is_empty() || self.options.skip_images {
            return Ok(String::new());
        }

        let alt = text::squash_lines(node.attr("alt").unwrap_or(""));
        let title = node.attr("title").map(str::trim).filter(|t| !t.is_empty());
        let mut rendered = format!("![{alt}]({}{})", destination(src), title_suffix(title));

        let outcome = self.call(|v| v.visit_image(ctx, src, &alt, title));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle inline code elements (code, kbd, samp, tt)
    ///
    /// Content is taken verbatim; only line breaks become spaces in Normalized mode.
    fn handle_inline_code<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
    ) -> Result<String, ConversionError> {
        self.collect_descendants(node)?;

        let mut code = String::new();
        raw_text(node, &mut code);
        if self.options.whitespace_mode == WhitespaceMode::Normalized {
            code = code.replace("\r\n", " ").replace(['\n', '\r'], " ");
        }
        if code.trim().is_empty() {
            return Ok(String::new());
        }

        let mut rendered = text::code_span(&code);
        let outcome = self.call(|v| v.visit_code_inline(ctx, &code));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle the emphasis family
    ///
    /// strong/b, em/i, del/s, u/ins, sub, sup and mark wrap their content in
    /// the configured delimiters. A delimiter already surrounding the content
    /// (`<b><strong>x</strong></b>`) is not doubled.
    fn handle_inline_format<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, tag, depth)?;
        let emphasis = self.options.strong_em_symbol.to_string();

        let (open, close) = match ctx.node_type {
            NodeType::Strong => (emphasis.repeat(2), emphasis.repeat(2)),
            NodeType::Em => (emphasis.clone(), emphasis),
            NodeType::Strikethrough => ("~~".to_string(), "~~".to_string()),
            NodeType::Underline => ("<u>".to_string(), "</u>".to_string()),
            NodeType::Subscript => (self.options.sub_symbol.clone(), self.options.sub_symbol.clone()),
            NodeType::Superscript => (self.options.sup_symbol.clone(), self.options.sup_symbol.clone()),
            _ => match self.options.highlight_style {
                HighlightStyle::DoubleEqual => ("==".to_string(), "==".to_string()),
                HighlightStyle::Html => ("<mark>".to_string(), "</mark>".to_string()),
                HighlightStyle::Bold => (emphasis.repeat(2), emphasis.repeat(2)),
                HighlightStyle::None => (String::new(), String::new()),
            },
        };

        let core = content.trim_matches(is_html_whitespace);
        let already_wrapped = !open.is_empty()
            && core.len() > open.len() + close.len()
            && core.starts_with(open.as_str())
            && core.ends_with(close.as_str());
        let mut rendered = if already_wrapped {
            content.clone()
        } else {
            text::wrap_inline(&content, &open, &close)
        };

        let outcome = self.call(|v| match ctx.node_type {
            NodeType::Strong => v.visit_strong(ctx, core),
            NodeType::Em => v.visit_emphasis(ctx, core),
            NodeType::Strikethrough => v.visit_strikethrough(ctx, core),
            NodeType::Underline => v.visit_underline(ctx, core),
            NodeType::Subscript => v.visit_subscript(ctx, core),
            NodeType::Superscript => v.visit_superscript(ctx, core),
            _ => v.visit_mark(ctx, core),
        });
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_definition_list<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let outcome = self.call(|v| v.visit_definition_list_start(ctx));
        if let Some(replacement) = resolve(outcome, node)? {
            self.collect_descendants(node)?;
            return Ok(replacement);
        }

        let mut rendered = String::new();
        let mut previous: Option<&str> = None;
        for (index, child) in node.children.iter().enumerate() {
            let mut buf = String::new();
            let place = Place {
                parent: Some("dl"),
                index,
                depth: depth + 1,
            };
            self.node(child, place, &mut buf)?;
            let entry = buf.trim_matches('\n').trim_end();
            if entry.trim().is_empty() {
                continue;
            }

            let tag = child.tag();
            if !rendered.is_empty() {
                let new_group = tag == Some("dt") && previous != Some("dt");
                rendered.push_str(if new_group { "\n\n" } else { "\n" });
            }
            rendered.push_str(entry);
            previous = tag;
        }

        let outcome = self.call(|v| v.visit_definition_list_end(ctx, &rendered));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_definition_term<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "dt", depth)?;
        let mut rendered = self.flatten(&content);
        let term = rendered.clone();
        let outcome = self.call(|v| v.visit_definition_term(ctx, &term));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_definition_description<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "dd", depth)?;
        let content = self.trim_content(&content);
        if content.is_empty() {
            return Ok(String::new());
        }

        let mut rendered = text::prefix_lines(&content, ": ", "  ");
        let outcome = self.call(|v| v.visit_definition_description(ctx, &content));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_form<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "form", depth)?;
        let mut rendered = content.trim_matches('\n').to_string();
        let action = node.attr("action");
        let method = node.attr("method");
        let outcome = self.call(|v| v.visit_form(ctx, action, method));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Handle input elements
    ///
    /// Checkboxes and radio buttons become task markers (`[x] ` / `[ ] `),
    /// buttons their label; other controls have no Markdown form.
    fn handle_input<'n>(&mut self, node: &'n Node, ctx: &NodeContext<'n>) -> Result<String, ConversionError> {
        let input_type = node
            .attr("type")
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "text".to_string());
        let name = node.attr("name");
        let value = node.attr("value");

        let mut rendered = match input_type.as_str() {
            "checkbox" | "radio" if node.has_attr("checked") => "[x] ".to_string(),
            "checkbox" | "radio" => "[ ] ".to_string(),
            "submit" | "button" | "reset" => value.unwrap_or_default().trim().to_string(),
            _ => String::new(),
        };

        let outcome = self.call(|v| v.visit_input(ctx, &input_type, name, value));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_button<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "button", depth)?;
        let mut rendered = self.flatten(&content);
        let label = rendered.clone();
        let outcome = self.call(|v| v.visit_button(ctx, &label));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// Selected options, or every option when none is selected, comma-separated
    fn handle_select(&mut self, node: &Node) -> Result<String, ConversionError> {
        self.collect_descendants(node)?;

        let mut options = Vec::new();
        collect_options(node, &mut options);
        let selected: Vec<&Node> = options.iter().copied().filter(|o| o.has_attr("selected")).collect();
        let shown = if selected.is_empty() { options } else { selected };

        Ok(shown
            .iter()
            .map(|option| text::squash_lines(&option.text_content()))
            .filter(|label| !label.is_empty())
            .collect::<Vec<_>>()
            .join(", "))
    }

    fn handle_textarea(&mut self, node: &Node) -> Result<String, ConversionError> {
        self.collect_descendants(node)?;
        Ok(text::prepare_text(&node.text_content(), self.options))
    }

    /// Handle audio, video and iframe
    ///
    /// Rendered as a link to the source (`src`, or the first `<source>` child).
    fn handle_media<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        ctx: &NodeContext<'n>,
    ) -> Result<String, ConversionError> {
        self.collect_descendants(node)?;

        let src = node
            .attr("src")
            .or_else(|| {
                node.children
                    .iter()
                    .find(|c| c.is_element("source"))
                    .and_then(|s| s.attr("src"))
            })
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut rendered = match src {
            Some(src) => format!("[{src}]({})", destination(src)),
            None => String::new(),
        };

        let outcome = self.call(|v| match tag {
            "audio" => v.visit_audio(ctx, src),
            "video" => v.visit_video(ctx, src),
            _ => v.visit_iframe(ctx, src),
        });
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_details<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "details", depth)?;
        let mut rendered = content.trim_matches('\n').to_string();
        let open = node.has_attr("open");
        let outcome = self.call(|v| v.visit_details(ctx, open));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_summary<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "summary", depth)?;
        let text = self.flatten(&content);
        let strong = self.options.strong_em_symbol.to_string().repeat(2);
        let mut rendered = text::wrap_inline(&text, &strong, &strong);
        let outcome = self.call(|v| v.visit_summary(ctx, &text));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_figure<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let outcome = self.call(|v| v.visit_figure_start(ctx));
        if let Some(replacement) = resolve(outcome, node)? {
            self.collect_descendants(node)?;
            return Ok(replacement);
        }

        let content = self.inner(node, "figure", depth)?;
        let mut rendered = content.trim_matches('\n').to_string();
        let outcome = self.call(|v| v.visit_figure_end(ctx, &rendered));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    fn handle_figcaption<'n>(
        &mut self,
        node: &'n Node,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let content = self.inner(node, "figcaption", depth)?;
        let text = self.flatten(&content);
        let emphasis = self.options.strong_em_symbol.to_string();
        let mut rendered = text::wrap_inline(&text, &emphasis, &emphasis);
        let outcome = self.call(|v| v.visit_figcaption(ctx, &text));
        apply(outcome, node, &mut rendered)?;
        Ok(rendered)
    }

    /// MathML renders as its `alttext`, or its text content
    fn handle_math(&mut self, node: &Node) -> Result<String, ConversionError> {
        self.collect_descendants(node)?;
        Ok(match node.attr("alttext").map(str::trim).filter(|t| !t.is_empty()) {
            Some(alt) => alt.to_string(),
            None => text::squash_lines(&node.text_content()),
        })
    }

    /// Custom elements and unknown tags render their children
    fn handle_custom_element<'n>(
        &mut self,
        node: &'n Node,
        tag: &'n str,
        ctx: &NodeContext<'n>,
        depth: usize,
    ) -> Result<String, ConversionError> {
        let mut rendered = self.inner(node, tag, depth)?;
        if self.visitor.is_some() {
            let html = node.to_html();
            let outcome = self.call(|v| v.visit_custom_element(ctx, tag, &html));
            apply(outcome, node, &mut rendered)?;
        }
        Ok(rendered)
    }

    /// Report an element's metadata to the observer
    fn observe(&mut self, node: &Node, tag: &str) -> Result<(), ConversionError> {
        if !self.collector.is_active() {
            return Ok(());
        }

        match tag {
            "html" => self.collector.observe_root(node.attrs()),
            "title" if node.namespace() == Some(Namespace::Html) => {
                self.collector.observe_title(&node.text_content());
            }
            "meta" => self.collector.observe_meta(node.attrs()),
            "link" => self.collector.observe_head_link(node.attrs()),
            "base" => {
                if let Some(href) = node.attr("href") {
                    self.collector.observe_base(href);
                }
            }
            "script" => {
                let json_ld = node
                    .attr("type")
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/ld+json"));
                if json_ld {
                    self.collector.observe_json_ld(&node.text_content())?;
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let text = text::squash_lines(&node.text_content());
                self.collector
                    .observe_heading(heading_level(tag), &text, node.attr("id"), self.state.position);
            }
            "a" => {
                if let Some(href) = node.attr("href") {
                    let text = text::squash_lines(&node.text_content());
                    self.collector
                        .observe_link(href.trim(), &text, node.attr("title"), node.attrs());
                }
            }
            "img" => {
                if let Some(src) = node.attr("src") {
                    self.collector
                        .observe_image(src.trim(), node.attr("alt"), node.attr("title"), node.attrs());
                }
            }
            _ => {}
        }

        if node.has_attr("itemscope") || node.has_attr("typeof") {
            self.collector.observe_item_scope(node)?;
        }
        Ok(())
    }

    /// Walk a subtree that produces no output, for metadata only
    fn collect_descendants(&mut self, node: &Node) -> Result<(), ConversionError> {
        if !self.collector.is_active() {
            return Ok(());
        }
        for child in &node.children {
            if let Some(tag) = child.tag() {
                self.state.position += 1;
                self.observe(child, tag)?;
                self.collect_descendants(child)?;
            }
        }
        Ok(())
    }

    /// Run a visitor hook; `Continue` when no visitor is attached
    fn call(&mut self, hook: impl FnOnce(&mut (dyn HtmlVisitor + 'v)) -> VisitOutcome) -> VisitOutcome {
        match self.visitor.as_deref_mut() {
            Some(visitor) => hook(visitor),
            None => VisitOutcome::Continue,
        }
    }

    fn emit(&self, out: &mut String, text: &str, flow: Flow) {
        let block = match flow {
            Flow::Block => true,
            Flow::Inline => false,
            Flow::Transparent => text.ends_with('\n'),
        };

        if !block {
            self.push_inline(out, text);
        } else if self.options.convert_as_inline {
            let text = text.trim();
            if !text.is_empty() {
                if !out.is_empty() && !out.ends_with([' ', '\n']) {
                    out.push(' ');
                }
                out.push_str(text);
            }
        } else {
            self.push_block(out, text);
        }
    }

    fn push_inline(&self, out: &mut String, text: &str) {
        let text = match self.options.whitespace_mode {
            WhitespaceMode::Normalized if out.ends_with(['\n', ' ']) => text.trim_start_matches(' '),
            WhitespaceMode::Strict if out.ends_with('\n') => text.trim_start_matches(is_html_whitespace),
            _ => text,
        };
        out.push_str(text);
    }

    /// Append a block, separated from what precedes it by one blank line
    fn push_block(&self, out: &mut String, text: &str) {
        let mut text = text.trim_matches('\n').trim_end();
        if self.options.whitespace_mode == WhitespaceMode::Normalized
            && text.starts_with(' ')
            && !text.starts_with("  ")
        {
            text = &text[1..];
        }
        if text.trim().is_empty() {
            return;
        }

        if out.trim().is_empty() {
            out.clear();
        } else {
            let kept = out.trim_end_matches([' ', '\t']).len();
            out.truncate(kept);
            while !out.ends_with("\n\n") {
                out.push('\n');
            }
        }

        out.push_str(text);
        out.push_str("\n\n");
    }

    /// Trim block content at its edges, dropping trailing hard breaks
    fn trim_content(&self, content: &str) -> String {
        let mut text = content;
        loop {
            let stripped = text.trim_end_matches([' ', '\t']);
            match stripped.strip_suffix("  \n").or_else(|| stripped.strip_suffix("\\\n")) {
                Some(rest) => text = rest,
                None => break,
            }
        }

        let trim_spaces = self.options.whitespace_mode == WhitespaceMode::Normalized
            && self.options.preprocessing.trim_text_nodes;
        if trim_spaces {
            text.trim_matches(is_html_whitespace).to_string()
        } else {
            text.trim_matches('\n').to_string()
        }
    }

    /// Rendered content flattened onto one line
    fn flatten(&self, content: &str) -> String {
        let joined = content
            .replace("  \n", " ")
            .replace("\\\n", " ")
            .replace('\n', " ");
        match self.options.whitespace_mode {
            WhitespaceMode::Normalized => text::collapse_whitespace(&joined).trim().to_string(),
            WhitespaceMode::Strict => joined.trim_matches(is_html_whitespace).to_string(),
        }
    }

    /// Re-attach the whitespace that surrounded `content` to `rendered`
    fn keep_edges(&self, content: &str, rendered: String) -> String {
        if self.options.whitespace_mode == WhitespaceMode::Strict {
            return rendered;
        }
        let lead = if content.starts_with(is_html_whitespace) { " " } else { "" };
        let trail = if content.ends_with(is_html_whitespace) { " " } else { "" };
        format!("{lead}{rendered}{trail}")
    }
}

/// Map a visitor outcome to a replacement for the construct's output
///
/// `None` keeps the default rendering.
fn resolve(outcome: VisitOutcome, node: &Node) -> Result<Option<String>, ConversionError> {
    match outcome {
        VisitOutcome::Continue => Ok(None),
        VisitOutcome::Custom(text) => Ok(Some(text)),
        VisitOutcome::Skip => Ok(Some(String::new())),
        VisitOutcome::PreserveSource => Ok(Some(node.to_html())),
        VisitOutcome::Error(message) => {
            log::warn!("visitor aborted conversion: {message}");
            Err(ConversionError::VisitorAborted(message))
        }
    }
}

fn apply(outcome: VisitOutcome, node: &Node, rendered: &mut String) -> Result<(), ConversionError> {
    if let Some(replacement) = resolve(outcome, node)? {
        *rendered = replacement;
    }
    Ok(())
}

fn flow_for(tag: &str, node_type: NodeType) -> Flow {
    if BLOCK_ELEMENTS.contains(&tag) {
        Flow::Block
    } else if node_type == NodeType::Custom {
        Flow::Transparent
    } else {
        Flow::Inline
    }
}

fn heading_level(tag: &str) -> u8 {
    tag.as_bytes()
        .get(1)
        .map(|b| b.saturating_sub(b'0'))
        .filter(|level| (1..=6).contains(level))
        .unwrap_or(1)
}

/// No text and no media anywhere in the subtree
fn is_empty_element(node: &Node, tag: &str) -> bool {
    !MEDIA_ELEMENTS.contains(&tag) && text::is_blank(&node.text_content()) && !has_media(node)
}

fn has_media(node: &Node) -> bool {
    node.children.iter().any(|child| {
        child.tag().is_some_and(|tag| MEDIA_ELEMENTS.contains(&tag)) || has_media(child)
    })
}

/// Language from `language-*`/`lang-*` classes or `data-language`
fn code_language(node: &Node) -> Option<String> {
    if let Some(class) = node.attr("class") {
        for name in class.split_whitespace() {
            if let Some(lang) = name.strip_prefix("language-").or_else(|| name.strip_prefix("lang-"))
                && !lang.is_empty()
            {
                return Some(lang.to_string());
            }
        }
    }
    node.attr("data-language")
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Text of a subtree exactly as written, with `<br>` as a newline
fn raw_text(node: &Node, output: &mut String) {
    for child in &node.children {
        match &child.kind {
            NodeKind::Text(text) => output.push_str(text),
            NodeKind::Element { tag, .. } if tag == "br" => output.push('\n'),
            NodeKind::Element { .. } => raw_text(child, output),
            _ => {}
        }
    }
}

fn collect_options<'n>(node: &'n Node, options: &mut Vec<&'n Node>) {
    for child in &node.children {
        if child.is_element("option") {
            options.push(child);
        } else {
            collect_options(child, options);
        }
    }
}

/// Link destination, wrapped in angle brackets when it contains spaces
fn destination(url: &str) -> String {
    if url.contains(char::is_whitespace) {
        format!("<{url}>")
    } else {
        url.to_string()
    }
}

fn title_suffix(title: Option<&str>) -> String {
    match title {
        Some(title) => format!(" \"{}\"", title.replace('"', "\\\"")),
        None => String::new(),
    }
}

/// Extract alignment from a cell's `align` attribute or `text-align` style
fn cell_alignment(cell: &Node) -> TableAlignment {
    let from_keyword = |value: &str| {
        if value.contains("center") {
            Some(TableAlignment::Center)
        } else if value.contains("right") {
            Some(TableAlignment::Right)
        } else if value.contains("left") {
            Some(TableAlignment::Left)
        } else {
            None
        }
    };

    if let Some(align) = cell.attr("align")
        && let Some(alignment) = from_keyword(&align.to_ascii_lowercase())
    {
        return alignment;
    }

    if let Some(style) = cell.attr("style") {
        let style = style.to_ascii_lowercase();
        for declaration in style.split(';') {
            if let Some((property, value)) = declaration.split_once(':')
                && property.trim() == "text-align"
                && let Some(alignment) = from_keyword(value)
            {
                return alignment;
            }
        }
    }

    TableAlignment::Default
}

fn format_row(cells: &[String], columns: usize) -> String {
    let mut row = String::from("|");
    for i in 0..columns {
        row.push(' ');
        row.push_str(cells.get(i).map(String::as_str).unwrap_or(""));
        row.push_str(" |");
    }
    row
}

fn separator_row(alignments: &[TableAlignment], columns: usize) -> String {
    let mut row = String::from("|");
    for i in 0..columns {
        row.push_str(match alignments.get(i).copied().unwrap_or(TableAlignment::Default) {
            TableAlignment::Default => " --- |",
            TableAlignment::Left => " :--- |",
            TableAlignment::Center => " :---: |",
            TableAlignment::Right => " ---: |",
        });
    }
    row
}

/// Normalize final output for deterministic Markdown
///
/// **Normalization Rules:**
/// 1. **Line Endings**: LF only
/// 2. **Blank Lines**: runs collapse to one blank line (with `collapse_whitespace`)
/// 3. **Trailing Whitespace**: removed (with `collapse_whitespace`), except a
///    two-space hard break
/// 4. **Code**: fenced code blocks pass through untouched
/// 5. **Final Newline**: exactly one; empty input stays empty
///
/// # Examples
///
/// ```rust
/// use html_markdown_converter::converter::normalize_output;
///
/// assert_eq!(normalize_output("Line 1\r\n\r\n\r\nLine 2  \n\n", true), "Line 1\n\nLine 2\n");
/// ```
pub fn normalize_output(markdown: &str, collapse_whitespace: bool) -> String {
    let markdown = markdown.replace("\r\n", "\n").replace('\r', "\n");
    let markdown = markdown.trim_start_matches('\n');

    let mut result = String::with_capacity(markdown.len() + 1);
    let mut prev_blank = false;
    let mut fence: Option<(char, usize)> = None;

    for line in markdown.split('\n') {
        let trimmed = line.trim_start();

        if let Some((ch, length)) = fence {
            result.push_str(line);
            result.push('\n');
            let closing = trimmed.trim_end();
            if closing.len() >= length && closing.chars().all(|c| c == ch) {
                fence = None;
            }
            prev_blank = false;
            continue;
        }

        if let Some(ch) = trimmed.chars().next().filter(|c| *c == '`' || *c == '~') {
            let length = trimmed.chars().take_while(|c| *c == ch).count();
            if length >= 3 {
                fence = Some((ch, length));
                result.push_str(line);
                result.push('\n');
                prev_blank = false;
                continue;
            }
        }

        if !collapse_whitespace {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let content = line.trim_end();
        if content.is_empty() {
            if !prev_blank {
                result.push('\n');
                prev_blank = true;
            }
            continue;
        }

        result.push_str(content);
        if line[content.len()..].starts_with("  ") {
            result.push_str("  ");
        }
        result.push('\n');
        prev_blank = false;
    }

    let kept = result.trim_end().len();
    result.truncate(kept);
    if !result.is_empty() {
        result.push('\n');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert;
    use crate::options::{ListIndentStyle, PreprocessingPreset};
    use proptest::prelude::*;

    fn convert_html_for_test(html: &str) -> String {
        convert(html, &ConversionOptions::default()).expect("Conversion failed")
    }

    fn convert_with(html: &str, options: &ConversionOptions) -> String {
        convert(html, options).expect("Conversion failed")
    }

    #[test]
    fn test_heading_conversion() {
        assert_eq!(convert_html_for_test("<h1>Title</h1><p>Hello   world</p>"), "# Title\n\nHello world\n");
    }

    #[test]
    fn test_all_heading_levels() {
        let html = "<h1>1</h1><h2>2</h2><h3>3</h3><h4>4</h4><h5>5</h5><h6>6</h6>";
        assert_eq!(
            convert_html_for_test(html),
            "# 1\n\n## 2\n\n### 3\n\n#### 4\n\n##### 5\n\n###### 6\n"
        );
    }

    #[test]
    fn test_heading_styles() {
        let mut options = ConversionOptions {
            heading_style: HeadingStyle::Underlined,
            ..ConversionOptions::default()
        };
        assert_eq!(convert_with("<h1>Hi</h1><h2>Sub</h2><h3>Low</h3>", &options), "Hi\n===\n\nSub\n---\n\n### Low\n");

        options.heading_style = HeadingStyle::AtxClosed;
        assert_eq!(convert_with("<h2>Closed</h2>", &options), "## Closed ##\n");
    }

    #[test]
    fn test_empty_heading_and_paragraph_vanish() {
        assert_eq!(convert_html_for_test("<h2> </h2><p></p><p>x</p>"), "x\n");
    }

    #[test]
    fn test_nested_structure() {
        let html = "<div>\n  <h1>Title</h1>\n  <p>First paragraph.</p>\n  <p>Second paragraph.</p>\n</div>";
        assert_eq!(
            convert_html_for_test(html),
            "# Title\n\nFirst paragraph.\n\nSecond paragraph.\n"
        );
    }

    #[test]
    fn test_text_normalization() {
        assert_eq!(
            convert_html_for_test("<p>Text\nwith\n  newlines</p>"),
            "Text with newlines\n"
        );
    }

    #[test]
    fn test_strict_whitespace() {
        let options = ConversionOptions {
            whitespace_mode: WhitespaceMode::Strict,
            ..ConversionOptions::default()
        };
        assert_eq!(convert_with("<h1>Title</h1><p>Hello   world</p>", &options), "# Title\n\nHello   world\n");
    }

    #[test]
    fn test_inline_whitespace_survives_around_markup() {
        assert_eq!(
            convert_html_for_test("<p>a <strong>bold</strong> and <em> spaced </em> word</p>"),
            "a **bold** and *spaced* word\n"
        );
        assert_eq!(
            convert_html_for_test("<p>see<a href=\"/x\"> the link </a>now</p>"),
            "see [the link](/x) now\n"
        );
    }

    #[test]
    fn test_script_and_style_removal() {
        let html = "<head><style>p{}</style></head><p>Before</p><script>alert(1)</script><noscript>x</noscript><p>After</p>";
        assert_eq!(convert_html_for_test(html), "Before\n\nAfter\n");
    }

    #[test]
    fn test_emphasis_family() {
        let html = "<p><b>b</b> <i>i</i> <del>d</del> <u>u</u> H<sub>2</sub>O x<sup>2</sup> <mark>m</mark></p>";
        assert_eq!(
            convert_html_for_test(html),
            "**b** *i* ~~d~~ <u>u</u> H~2~O x^2^ ==m==\n"
        );
    }

    #[test]
    fn test_emphasis_symbol_and_highlight_style() {
        let options = ConversionOptions {
            strong_em_symbol: '_',
            highlight_style: HighlightStyle::Html,
            ..ConversionOptions::default()
        };
        assert_eq!(
            convert_with("<p><strong>s</strong> <em>e</em> <mark>m</mark></p>", &options),
            "__s__ _e_ <mark>m</mark>\n"
        );
    }

    #[test]
    fn test_nested_same_emphasis_not_doubled() {
        assert_eq!(convert_html_for_test("<p><b><strong>x</strong></b></p>"), "**x**\n");
    }

    #[test]
    fn test_link_conversion() {
        assert_eq!(
            convert_html_for_test(r#"<p><a href="https://example.com" title="Ex &quot;1&quot;">Example</a></p>"#),
            "[Example](https://example.com \"Ex \\\"1\\\"\")\n"
        );
    }

    #[test]
    fn test_link_without_href() {
        assert_eq!(convert_html_for_test("<p><a name=\"x\">Plain</a></p>"), "Plain\n");
    }

    #[test]
    fn test_link_with_spaces_in_href() {
        assert_eq!(convert_html_for_test("<p><a href=\"my file.html\">f</a></p>"), "[f](<my file.html>)\n");
    }

    #[test]
    fn test_image_conversion() {
        assert_eq!(
            convert_html_for_test(r#"<p><img src="a.png" alt="Alt text" title="T"></p>"#),
            "![Alt text](a.png \"T\")\n"
        );
        assert_eq!(convert_html_for_test(r#"<p><img alt="no src"></p>"#), "");
    }

    #[test]
    fn test_skip_images() {
        let options = ConversionOptions {
            skip_images: true,
            ..ConversionOptions::default()
        };
        assert_eq!(convert_with(r#"<p>x <img src="a.png"></p>"#, &options), "x\n");
    }

    #[test]
    fn test_unordered_list_conversion() {
        assert_eq!(convert_html_for_test("<ul><li>Item 1</li><li>Item 2</li></ul>"), "- Item 1\n- Item 2\n");
    }

    #[test]
    fn test_ordered_list_start_and_value() {
        assert_eq!(
            convert_html_for_test(r#"<ol start="3"><li>c</li><li value="7">g</li><li>h</li></ol>"#),
            "3. c\n7. g\n8. h\n"
        );
    }

    #[test]
    fn test_nested_lists() {
        let html = "<ul><li>One<ul><li>Sub<ol><li>Deep</li></ol></li></ul></li><li>Two</li></ul>";
        assert_eq!(convert_html_for_test(html), "- One\n  - Sub\n    1. Deep\n- Two\n");
    }

    #[test]
    fn test_list_indent_and_bullets() {
        let options = ConversionOptions {
            list_indent: ListIndentStyle::Tabs,
            bullets: "*+".to_string(),
            ..ConversionOptions::default()
        };
        let html = "<ul><li>a<ul><li>b</li></ul></li></ul>";
        assert_eq!(convert_with(html, &options), "* a\n\t+ b\n");
    }

    #[test]
    fn test_list_item_paragraphs() {
        let html = "<ul><li><p>First</p><p>Second</p></li><li>Next</li></ul>";
        assert_eq!(convert_html_for_test(html), "- First\n\n  Second\n- Next\n");
    }

    #[test]
    fn test_task_list() {
        let html = r#"<ul><li><input type="checkbox" checked> Done</li><li><input type="checkbox"> Todo</li></ul>"#;
        assert_eq!(convert_html_for_test(html), "- [x] Done\n- [ ] Todo\n");
    }

    #[test]
    fn test_code_block_with_language() {
        let html = "<pre><code class=\"language-rust\">fn  main() {\n    let x = 1;\n}\n</code></pre>";
        assert_eq!(
            convert_html_for_test(html),
            "```rust\nfn  main() {\n    let x = 1;\n}\n```\n"
        );
    }

    #[test]
    fn test_code_block_fence_grows() {
        let html = "<pre>```\ninner\n```</pre>";
        assert_eq!(convert_html_for_test(html), "````\n```\ninner\n```\n````\n");
    }

    #[test]
    fn test_code_block_styles() {
        let mut options = ConversionOptions {
            code_block_style: CodeBlockStyle::Tildes,
            default_code_language: "text".to_string(),
            ..ConversionOptions::default()
        };
        assert_eq!(convert_with("<pre>a\nb</pre>", &options), "~~~text\na\nb\n~~~\n");

        options.code_block_style = CodeBlockStyle::Indented;
        assert_eq!(convert_with("<p>x</p><pre>a\nb</pre>", &options), "x\n\n    a\n    b\n");
    }

    #[test]
    fn test_inline_code() {
        assert_eq!(
            convert_html_for_test("<p>Use <code>let  x</code> or <code>a`b</code></p>"),
            "Use `let  x` or ``a`b``\n"
        );
    }

    #[test]
    fn test_blockquote() {
        let html = "<blockquote><p>One</p><p>Two</p><blockquote>Nested</blockquote></blockquote>";
        assert_eq!(convert_html_for_test(html), "> One\n>\n> Two\n>\n> > Nested\n");
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(convert_html_for_test("<p>a<br>b</p>"), "a  \nb\n");

        let options = ConversionOptions {
            newline_style: NewlineStyle::Backslash,
            ..ConversionOptions::default()
        };
        assert_eq!(convert_with("<p>a<br>b<br></p>", &options), "a\\\nb\n");
    }

    #[test]
    fn test_horizontal_rule() {
        assert_eq!(convert_html_for_test("<p>a</p><hr><p>b</p>"), "a\n\n---\n\nb\n");
    }

    #[test]
    fn test_table_conversion() {
        let html = r#"<table>
            <thead><tr><th>Name</th><th align="right">Qty</th><th style="text-align: center">Note</th></tr></thead>
            <tbody><tr><td>Apple</td><td>3</td><td>a|b</td></tr><tr><td colspan="2">Total</td><td>x<br>y</td></tr></tbody>
        </table>"#;
        assert_eq!(
            convert_html_for_test(html),
            "| Name | Qty | Note |\n| --- | ---: | :---: |\n| Apple | 3 | a\\|b |\n| Total |  | x y |\n"
        );
    }

    #[test]
    fn test_table_without_thead_and_caption() {
        let html = "<table><caption>Prices</caption><tr><td>a</td><td>b</td></tr><tr><td>c</td></tr></table>";
        assert_eq!(
            convert_html_for_test(html),
            "Prices\n\n| a | b |\n| --- | --- |\n| c |  |\n"
        );
    }

    #[test]
    fn test_br_in_tables_option() {
        let options = ConversionOptions {
            br_in_tables: true,
            ..ConversionOptions::default()
        };
        assert_eq!(
            convert_with("<table><tr><th>h</th></tr><tr><td>x<br>y</td></tr></table>", &options),
            "| h |\n| --- |\n| x<br>y |\n"
        );
    }

    #[test]
    fn test_definition_list() {
        let html = "<dl><dt>Term</dt><dd>Meaning</dd><dt>Other</dt><dt>Alias</dt><dd>Second</dd></dl>";
        assert_eq!(
            convert_html_for_test(html),
            "Term\n: Meaning\n\nOther\nAlias\n: Second\n"
        );
    }

    #[test]
    fn test_details_and_figure() {
        let html = r#"<details><summary>More</summary><p>Hidden</p></details><figure><img src="f.png" alt="F"><figcaption>Caption</figcaption></figure>"#;
        assert_eq!(
            convert_html_for_test(html),
            "**More**\n\nHidden\n\n![F](f.png)\n\n*Caption*\n"
        );
    }

    #[test]
    fn test_media_links() {
        let html = r#"<p><video><source src="v.mp4"></video> <audio src="a.mp3"></audio> <iframe src="https://x.test/e"></iframe></p>"#;
        assert_eq!(
            convert_html_for_test(html),
            "[v.mp4](v.mp4) [a.mp3](a.mp3) [https://x.test/e](https://x.test/e)\n"
        );
    }

    #[test]
    fn test_form_controls() {
        let html = r#"<form action="/s"><p><select><option>One</option><option selected>Two</option></select> <button>Go</button> <input type="submit" value="Send"></p></form>"#;
        assert_eq!(convert_html_for_test(html), "Two Go Send\n");
    }

    #[test]
    fn test_remove_forms_and_navigation() {
        let options = ConversionOptions::with_preset(PreprocessingPreset::Aggressive);
        let html = "<nav><a href=\"/\">Home</a></nav><form><button>Go</button></form><p>Body</p>";
        assert_eq!(convert_with(html, &options), "Body\n");
        assert_eq!(convert_html_for_test(html), "[Home](/)\n\nGo\n\nBody\n");
    }

    #[test]
    fn test_custom_element_renders_children() {
        assert_eq!(
            convert_html_for_test("<p>before <my-tag>inside</my-tag> after</p><x-card><p>Card</p></x-card>"),
            "before inside after\n\nCard\n"
        );
    }

    #[test]
    fn test_strip_and_preserve_tags() {
        let options = ConversionOptions {
            strip_tags: vec!["a".to_string()],
            preserve_tags: vec!["table".to_string()],
            ..ConversionOptions::default()
        };
        let html = r#"<p><a href="/x">link</a></p><table><tr><td>c</td></tr></table>"#;
        assert_eq!(
            convert_with(html, &options),
            "link\n\n<table><tr><td>c</td></tr></table>\n"
        );
    }

    #[test]
    fn test_comments() {
        let html = "<p>a</p><!-- note --><p>b</p>";
        assert_eq!(convert_html_for_test(html), "a\n\nb\n");

        let mut options = ConversionOptions::default();
        options.preprocessing.remove_comments = false;
        assert_eq!(convert_with(html, &options), "a\n\n<!-- note -->\n\nb\n");
    }

    #[test]
    fn test_svg_dropped_math_alttext() {
        let html = r#"<p>x <svg><title>icon</title><circle r="1"/></svg> <math alttext="a+b"><mi>a</mi></math></p>"#;
        assert_eq!(convert_html_for_test(html), "x a+b\n");
    }

    #[test]
    fn test_remove_empty_elements() {
        let html = r#"<p>a <a href="/x"></a> b</p>"#;
        assert_eq!(convert_html_for_test(html), "a [](/x) b\n");

        let mut options = ConversionOptions::default();
        options.preprocessing.remove_empty_elements = true;
        assert_eq!(convert_with(html, &options), "a b\n");
    }

    #[test]
    fn test_unicode_normalization_flag() {
        let html = "<p>a\u{a0}b\u{200b}c</p>";
        assert_eq!(convert_html_for_test(html), "a bc\n");

        let options = ConversionOptions::with_preset(PreprocessingPreset::Minimal);
        assert_eq!(convert_with(html, &options), "a\u{a0}b\u{200b}c\n");
    }

    #[test]
    fn test_convert_as_inline() {
        let options = ConversionOptions {
            convert_as_inline: true,
            ..ConversionOptions::default()
        };
        assert_eq!(convert_with("<h1>Title</h1><p>Body <b>bold</b></p>", &options), "Title Body **bold**\n");
    }

    #[test]
    fn test_wrapping_applies_after_traversal() {
        let options = ConversionOptions {
            wrap: crate::options::WrapOptions {
                enabled: true,
                width: 20,
                preserve_words: true,
            },
            ..ConversionOptions::default()
        };
        let html = "<p>The quick brown fox jumps over the lazy dog</p><pre>a very long line of code that must stay</pre>";
        assert_eq!(
            convert_with(html, &options),
            "The quick brown fox\njumps over the lazy\ndog\n\n```\na very long line of code that must stay\n```\n"
        );
    }

    #[test]
    fn test_max_depth_enforced() {
        let options = ConversionOptions {
            max_depth: 3,
            ..ConversionOptions::default()
        };
        let html = "<div><div><div><div><p>deep</p></div></div></div></div>";
        assert!(matches!(
            convert(html, &options),
            Err(ConversionError::ResourceLimitExceeded(_))
        ));
    }

    #[test]
    fn test_normalize_crlf_to_lf() {
        assert_eq!(normalize_output("a\r\nb\rc", true), "a\nb\nc\n");
    }

    #[test]
    fn test_normalize_consecutive_blank_lines() {
        assert_eq!(normalize_output("a\n\n\n\nb", true), "a\n\nb\n");
        assert_eq!(normalize_output("a\n\n\n\nb", false), "a\n\n\n\nb\n");
    }

    #[test]
    fn test_normalize_keeps_hard_breaks() {
        assert_eq!(normalize_output("a   \nb \n", true), "a  \nb\n");
    }

    #[test]
    fn test_normalize_preserves_code_blocks() {
        let input = "```rust\nfn  test()  {   \n\n\n}\n```\n";
        assert_eq!(normalize_output(input, true), input);
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_output("", true), "");
        assert_eq!(normalize_output("\n\n  \n", true), "");
    }

    #[test]
    fn test_deterministic_output_complex_html() {
        let html = r#"<h1>T</h1><ul><li>a <a href="/x">x</a></li></ul><table><tr><th>h</th></tr><tr><td>d</td></tr></table>"#;
        assert_eq!(convert_html_for_test(html), convert_html_for_test(html));
    }

    proptest! {
        #[test]
        fn prop_structural_preservation_headings(level in 1usize..=6, text in "[A-Za-z][A-Za-z0-9]{0,15}") {
            let html = format!("<h{level}>{text}</h{level}>");
            let expected = format!("{} {text}\n", "#".repeat(level));
            prop_assert_eq!(convert_html_for_test(&html), expected);
        }

        #[test]
        fn prop_paragraph_whitespace_collapses(words in proptest::collection::vec("[a-z]{1,8}", 1..8), gaps in proptest::collection::vec("[ \t\n]{1,4}", 8)) {
            let mut body = String::new();
            for (i, word) in words.iter().enumerate() {
                if i > 0 {
                    body.push_str(&gaps[i % gaps.len()]);
                }
                body.push_str(word);
            }
            let html = format!("<p>{body}</p>");
            prop_assert_eq!(convert_html_for_test(&html), format!("{}\n", words.join(" ")));
        }

        #[test]
        fn prop_deterministic_output_identical_html_is_byte_identical(
            items in proptest::collection::vec("[a-z ]{0,12}", 0..6),
            heading in "[a-z ]{0,12}"
        ) {
            let list: String = items.iter().map(|i| format!("<li>{i}</li>")).collect();
            let html = format!("<h2>{heading}</h2><ul>{list}</ul><p>{heading}</p>");
            prop_assert_eq!(convert_html_for_test(&html), convert_html_for_test(&html));
        }

        #[test]
        fn prop_unicode_text_is_preserved_in_markdown(text in "[\\p{L}\\p{N}]{1,20}") {
            let html = format!("<p>{text}</p>");
            prop_assert_eq!(convert_html_for_test(&html), format!("{text}\n"));
        }
    }
}
