//! Visitor hooks for customizing conversion
//!
//! Implement [`HtmlVisitor`] and pass it to
//! [`convert_with_visitor`](crate::convert_with_visitor) to inspect or
//! override how individual constructs are rendered. Every method has a
//! default implementation returning [`VisitOutcome::Continue`], so a visitor
//! only implements the hooks it cares about.
//!
//! Hooks are called synchronously in document order, at most once per
//! construct. `visit_element_start` runs before an element's children are
//! converted; construct hooks such as `visit_link` run after, with the
//! rendered text of the children; `visit_element_end` runs last with the
//! element's complete Markdown.
//!
//! The [`NodeContext`] handed to a hook borrows from the parsed tree and the
//! conversion state, so it cannot be kept past the call.
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::visitor::{HtmlVisitor, NodeContext, VisitOutcome};
//! use html_markdown_converter::{convert_with_visitor, ConversionOptions};
//!
//! struct PlainLinks;
//!
//! impl HtmlVisitor for PlainLinks {
//!     fn visit_link(&mut self, _ctx: &NodeContext<'_>, href: &str, text: &str, _title: Option<&str>) -> VisitOutcome {
//!         VisitOutcome::Custom(format!("{text} <{href}>"))
//!     }
//! }
//!
//! let html = r#"<p>See <a href="https://example.com">the site</a>.</p>"#;
//! let markdown = convert_with_visitor(html, &ConversionOptions::default(), &mut PlainLinks).unwrap();
//! assert_eq!(markdown, "See the site <https://example.com>.\n");
//! ```

use crate::dom::Attribute;

/// Kind of node a hook is looking at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Text,
    Element,
    Heading,
    Paragraph,
    Div,
    Blockquote,
    Pre,
    Hr,
    List,
    ListItem,
    Table,
    TableRow,
    TableCell,
    Link,
    Image,
    Code,
    Strong,
    Em,
    Strikethrough,
    Underline,
    Subscript,
    Superscript,
    Mark,
    LineBreak,
    DefinitionList,
    DefinitionTerm,
    DefinitionDescription,
    Form,
    Input,
    Button,
    Audio,
    Video,
    Iframe,
    Details,
    Summary,
    Figure,
    Figcaption,
    Comment,
    /// Custom elements and tags without a dedicated rule
    Custom,
}

impl NodeType {
    /// Classify an element by tag name
    pub fn for_tag(tag: &str) -> NodeType {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => NodeType::Heading,
            "p" => NodeType::Paragraph,
            "div" | "section" | "article" | "main" | "header" | "footer" | "nav" | "aside" => {
                NodeType::Div
            }
            "blockquote" => NodeType::Blockquote,
            "pre" => NodeType::Pre,
            "hr" => NodeType::Hr,
            "ul" | "ol" | "menu" => NodeType::List,
            "li" => NodeType::ListItem,
            "table" => NodeType::Table,
            "tr" => NodeType::TableRow,
            "td" | "th" => NodeType::TableCell,
            "a" => NodeType::Link,
            "img" => NodeType::Image,
            "code" | "kbd" | "samp" | "tt" => NodeType::Code,
            "strong" | "b" => NodeType::Strong,
            "em" | "i" | "cite" | "dfn" | "var" => NodeType::Em,
            "del" | "s" | "strike" => NodeType::Strikethrough,
            "u" | "ins" => NodeType::Underline,
            "sub" => NodeType::Subscript,
            "sup" => NodeType::Superscript,
            "mark" => NodeType::Mark,
            "br" => NodeType::LineBreak,
            "dl" => NodeType::DefinitionList,
            "dt" => NodeType::DefinitionTerm,
            "dd" => NodeType::DefinitionDescription,
            "form" => NodeType::Form,
            "input" => NodeType::Input,
            "button" => NodeType::Button,
            "audio" => NodeType::Audio,
            "video" => NodeType::Video,
            "iframe" => NodeType::Iframe,
            "details" => NodeType::Details,
            "summary" => NodeType::Summary,
            "figure" => NodeType::Figure,
            "figcaption" => NodeType::Figcaption,
            t if t.contains('-') => NodeType::Custom,
            t if is_known_element(t) => NodeType::Element,
            _ => NodeType::Custom,
        }
    }
}

/// Elements that render with a generic rule rather than a dedicated one
const GENERIC_ELEMENTS: &[&str] = &[
    "html", "head", "body", "title", "meta", "link", "base", "script", "style", "noscript",
    "template", "span", "abbr", "small", "big", "q", "time", "data", "label", "select",
    "option", "optgroup", "textarea", "fieldset", "legend", "caption", "thead", "tbody", "tfoot",
    "colgroup", "col", "address", "hgroup", "center", "font", "bdi", "bdo", "ruby", "rt", "rp",
    "picture", "source", "track", "svg", "math", "canvas", "object", "embed", "map", "area",
    "wbr", "output", "progress", "meter", "dialog", "search", "listing", "xmp",
    "plaintext", "noembed", "noframes", "param",
];

/// Whether the tag is a standard HTML element without a dedicated rule
pub fn is_known_element(tag: &str) -> bool {
    GENERIC_ELEMENTS.contains(&tag)
}

/// Per-visit description of where the traversal is
///
/// Borrowed from the tree being converted; valid only for the duration of the hook.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    pub node_type: NodeType,
    /// Empty for text nodes
    pub tag_name: &'a str,
    pub attributes: &'a [Attribute],
    /// Number of element ancestors
    pub depth: usize,
    /// Position among the parent's children
    pub index_in_parent: usize,
    pub parent_tag: Option<&'a str>,
    pub is_inline: bool,
}

impl NodeContext<'_> {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }
}

/// What the converter should do with a construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Default conversion
    Continue,
    /// Emit this text instead of the default conversion
    Custom(String),
    /// Emit nothing for the construct
    Skip,
    /// Emit the construct's HTML instead of converting it
    PreserveSource,
    /// Abort the whole conversion with this message
    Error(String),
}

/// Conversion hooks; every method defaults to [`VisitOutcome::Continue`]
#[allow(unused_variables)]
pub trait HtmlVisitor {
    /// Before any element is converted
    fn visit_element_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    /// After an element is converted, with its Markdown
    fn visit_element_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_text(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_link(
        &mut self,
        ctx: &NodeContext<'_>,
        href: &str,
        text: &str,
        title: Option<&str>,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_image(
        &mut self,
        ctx: &NodeContext<'_>,
        src: &str,
        alt: &str,
        title: Option<&str>,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_heading(
        &mut self,
        ctx: &NodeContext<'_>,
        level: u8,
        text: &str,
        id: Option<&str>,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_code_block(
        &mut self,
        ctx: &NodeContext<'_>,
        language: Option<&str>,
        code: &str,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_code_inline(&mut self, ctx: &NodeContext<'_>, code: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_list_start(&mut self, ctx: &NodeContext<'_>, ordered: bool) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_list_item(
        &mut self,
        ctx: &NodeContext<'_>,
        ordered: bool,
        marker: &str,
        text: &str,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_list_end(&mut self, ctx: &NodeContext<'_>, ordered: bool, output: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_table_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_table_row(
        &mut self,
        ctx: &NodeContext<'_>,
        cells: &[String],
        is_header: bool,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_table_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    /// `content` is the converted inner Markdown, before `>` prefixing
    fn visit_blockquote(&mut self, ctx: &NodeContext<'_>, content: &str, depth: usize) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_strong(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_emphasis(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_strikethrough(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_underline(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_subscript(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_superscript(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_mark(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_line_break(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_horizontal_rule(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    /// Custom elements (`<my-widget>`) and unknown tags; `html` is the element's source
    fn visit_custom_element(&mut self, ctx: &NodeContext<'_>, tag_name: &str, html: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_definition_list_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_definition_term(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_definition_description(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_definition_list_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_form(
        &mut self,
        ctx: &NodeContext<'_>,
        action: Option<&str>,
        method: Option<&str>,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_input(
        &mut self,
        ctx: &NodeContext<'_>,
        input_type: &str,
        name: Option<&str>,
        value: Option<&str>,
    ) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_button(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_audio(&mut self, ctx: &NodeContext<'_>, src: Option<&str>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_video(&mut self, ctx: &NodeContext<'_>, src: Option<&str>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_iframe(&mut self, ctx: &NodeContext<'_>, src: Option<&str>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_details(&mut self, ctx: &NodeContext<'_>, open: bool) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_summary(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_figure_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_figcaption(&mut self, ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }

    fn visit_figure_end(&mut self, ctx: &NodeContext<'_>, output: &str) -> VisitOutcome {
        VisitOutcome::Continue
    }
}
