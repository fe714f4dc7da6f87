//! HTML parsing with two interchangeable strategies
//!
//! Both strategies produce the owned [`Node`](crate::dom::Node) tree and both
//! sit on html5ever's tokenizer, so numeric and named character references
//! decode identically no matter which one built the tree.
//!
//! # Strategies
//!
//! - **Fast** ([`FastParser`]): drives the tokenizer with its own token sink
//!   and a plain open-element stack. It understands void elements, raw text
//!   elements and the usual optional end tags (`p`, `li`, `td`, ...), but it
//!   does not repair mismatched nesting or handle SVG/MathML. Anything it
//!   cannot build is reported as a parse error.
//! - **Recovery** ([`RecoveryParser`]): the full WHATWG tree construction
//!   algorithm from html5ever into `markup5ever_rcdom`, then copied into the
//!   owned tree.
//!
//! # Selection
//!
//! [`ParserStrategy::Auto`] uses the fast strategy for ordinary input and the
//! recovery strategy when the classifier graded the input as elevated risk
//! or when the fast strategy fails.
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::parser::{parse, ParserStrategy};
//!
//! let tree = parse("<p>Fish &amp; chips</p>", ParserStrategy::Auto).expect("parses");
//! assert_eq!(tree.text_content(), "Fish & chips");
//!
//! // Mismatched nesting defeats the fast strategy but not the recovery one
//! assert!(parse("<b><i>x</b></i>", ParserStrategy::Fast).is_err());
//! assert!(parse("<b><i>x</b></i>", ParserStrategy::Recovery).is_ok());
//! ```

use html5ever::parse_document;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
    TokenizerResult,
};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::classifier::Risk;
use crate::dom::{Attribute, Namespace, Node, NodeKind, VOID_ELEMENTS};
use crate::error::ConversionError;

/// Default ceiling on element nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 256;

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";

/// Elements whose end tag may be omitted
const OPTIONAL_END_TAGS: &[&str] = &[
    "p", "li", "dt", "dd", "tr", "td", "th", "option", "optgroup", "thead", "tbody", "tfoot",
    "colgroup", "caption", "rb", "rt", "rp", "html", "head", "body",
];

/// Block-level starts that implicitly close an open paragraph
const CLOSES_PARAGRAPH: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "div", "dl", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hgroup", "hr", "main", "menu", "nav", "ol", "p", "pre", "section", "table", "ul",
];

/// Which tree builder a conversion uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserStrategy {
    /// Fast for ordinary input, recovery for elevated risk or on failure
    #[default]
    Auto,
    /// Fast strategy only; its failures are returned
    Fast,
    /// Always the recovery strategy
    Recovery,
}

/// Capability shared by the two strategies: produce a node tree from text
pub trait TreeBuilder {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Build the tree; the returned node is always a document node
    fn build(&self, html: &str) -> Result<Node, ConversionError>;
}

/// Tokenizer-driven builder for well-formed markup
#[derive(Debug, Clone, Copy)]
pub struct FastParser {
    pub max_depth: usize,
}

/// html5ever tree construction with full error recovery
#[derive(Debug, Clone, Copy)]
pub struct RecoveryParser {
    pub max_depth: usize,
}

impl Default for FastParser {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for RecoveryParser {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Parse with the given strategy, treating the input as ordinary risk
pub fn parse(html: &str, strategy: ParserStrategy) -> Result<Node, ConversionError> {
    parse_with(html, strategy, Risk::Ordinary, DEFAULT_MAX_DEPTH)
}

/// Parse with the given strategy, risk grade and depth ceiling
///
/// # Errors
///
/// - `ConversionError::ParseError` when the selected strategies cannot build a tree
/// - `ConversionError::ResourceLimitExceeded` when nesting exceeds `max_depth`
pub fn parse_with(
    html: &str,
    strategy: ParserStrategy,
    risk: Risk,
    max_depth: usize,
) -> Result<Node, ConversionError> {
    let fast = FastParser { max_depth };
    let recovery = RecoveryParser { max_depth };

    match strategy {
        ParserStrategy::Fast => fast.build(html),
        ParserStrategy::Recovery => recovery.build(html),
        ParserStrategy::Auto if risk == Risk::Elevated => {
            log::debug!("elevated-risk input, using {} parser", recovery.name());
            recovery.build(html)
        }
        ParserStrategy::Auto => match fast.build(html) {
            Err(ConversionError::ParseError(reason)) => {
                log::debug!(
                    "{} parser gave up ({reason}), falling back to {} parser",
                    fast.name(),
                    recovery.name()
                );
                recovery.build(html).map_err(|e| match e {
                    ConversionError::ParseError(second) => ConversionError::ParseError(format!(
                        "both parser strategies failed: {reason}; {second}"
                    )),
                    other => other,
                })
            }
            other => other,
        },
    }
}

impl TreeBuilder for FastParser {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn build(&self, html: &str) -> Result<Node, ConversionError> {
        let mut input = BufferQueue::default();
        input.push_back(StrTendril::from_slice(html));

        let sink = FastSink::new(self.max_depth);
        let mut tokenizer = Tokenizer::new(sink, TokenizerOpts::default());
        match tokenizer.feed(&mut input) {
            TokenizerResult::Done => {}
            // Only a sink answering `TokenSinkResult::Script` pauses the tokenizer; FastSink never does
            TokenizerResult::Script(()) => {
                return Err(ConversionError::InternalError("fast tokenizer paused on a script".to_string()));
            }
        }
        tokenizer.end();

        tokenizer.sink.finish()
    }
}

impl TreeBuilder for RecoveryParser {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn build(&self, html: &str) -> Result<Node, ConversionError> {
        let dom = parse_document(RcDom::default(), Default::default()).one(html);
        let mut root = Node::document(Vec::new());
        append_rcdom_children(&mut root, &dom.document, 1, self.max_depth)?;
        Ok(root)
    }
}

fn append_rcdom_children(
    parent: &mut Node,
    handle: &Handle,
    depth: usize,
    max_depth: usize,
) -> Result<(), ConversionError> {
    for child in handle.children.borrow().iter() {
        match child.data {
            NodeData::Text { ref contents } => parent.push_text(&contents.borrow()),
            NodeData::Comment { ref contents } => parent.children.push(Node::comment(&**contents)),
            NodeData::Element {
                ref name,
                ref attrs,
                ..
            } => {
                if depth > max_depth {
                    return Err(depth_exceeded(max_depth));
                }

                let namespace = match &*name.ns {
                    SVG_NAMESPACE => Namespace::Svg,
                    MATHML_NAMESPACE => Namespace::MathMl,
                    _ => Namespace::Html,
                };
                let attrs = attrs
                    .borrow()
                    .iter()
                    .map(|a| Attribute::new(&*a.name.local, &*a.value))
                    .collect();

                let mut element = Node::element(&*name.local, namespace, attrs);
                append_rcdom_children(&mut element, child, depth + 1, max_depth)?;
                parent.children.push(element);
            }
            NodeData::Document
            | NodeData::Doctype { .. }
            | NodeData::ProcessingInstruction { .. } => {}
        }
    }
    Ok(())
}

fn depth_exceeded(max_depth: usize) -> ConversionError {
    ConversionError::ResourceLimitExceeded(format!(
        "element nesting exceeds maximum depth of {max_depth}"
    ))
}

/// Token sink building the tree from an open-element stack
struct FastSink {
    /// `stack[0]` is the document node
    stack: Vec<Node>,
    max_depth: usize,
    failure: Option<ConversionError>,
    /// Drop one leading newline from the next text run (`pre`, `textarea`, `listing`)
    skip_newline: bool,
}

impl FastSink {
    fn new(max_depth: usize) -> Self {
        Self {
            stack: vec![Node::document(Vec::new())],
            max_depth,
            failure: None,
            skip_newline: false,
        }
    }

    fn fail(&mut self, reason: String) {
        if self.failure.is_none() {
            self.failure = Some(ConversionError::ParseError(reason));
        }
    }

    fn top(&mut self) -> &mut Node {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn top_tag(&self) -> Option<&str> {
        self.stack.last().and_then(Node::tag)
    }

    /// Pop the current element into its parent
    fn close_top(&mut self) {
        if self.stack.len() > 1
            && let Some(node) = self.stack.pop()
        {
            self.top().children.push(node);
        }
    }

    fn close_implied(&mut self, tag: &str) {
        let closers: &[&str] = match tag {
            "li" => &["p", "li"],
            "dt" | "dd" => &["p", "dt", "dd"],
            "tr" => &["td", "th", "tr"],
            "td" | "th" => &["td", "th"],
            "thead" | "tbody" | "tfoot" => &["td", "th", "tr", "thead", "tbody", "tfoot"],
            "option" => &["option"],
            "optgroup" => &["option", "optgroup"],
            "body" => &["head"],
            t if CLOSES_PARAGRAPH.contains(&t) => &["p"],
            _ => &[],
        };

        while let Some(top) = self.top_tag() {
            if closers.contains(&top) {
                self.close_top();
            } else {
                break;
            }
        }
    }

    fn start_tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        let name = tag.name.to_string();

        if name == "svg" || name == "math" {
            self.fail(format!("<{name}> content needs the recovery parser"));
            return TokenSinkResult::Continue;
        }

        self.close_implied(&name);

        let depth = self.stack.len();
        if depth > self.max_depth {
            self.failure = Some(depth_exceeded(self.max_depth));
            return TokenSinkResult::Continue;
        }

        let attrs = tag
            .attrs
            .iter()
            .map(|a| Attribute::new(&*a.name.local, &*a.value))
            .collect();
        let element = Node::element(name.as_str(), Namespace::Html, attrs);

        if VOID_ELEMENTS.contains(&name.as_str()) {
            self.top().children.push(element);
            return TokenSinkResult::Continue;
        }

        self.stack.push(element);
        self.skip_newline = matches!(name.as_str(), "pre" | "textarea" | "listing");

        match name.as_str() {
            "script" => TokenSinkResult::RawData(RawKind::ScriptData),
            "style" | "xmp" | "iframe" | "noembed" | "noframes" => {
                TokenSinkResult::RawData(RawKind::Rawtext)
            }
            "title" | "textarea" => TokenSinkResult::RawData(RawKind::Rcdata),
            "plaintext" => TokenSinkResult::Plaintext,
            _ => TokenSinkResult::Continue,
        }
    }

    fn end_tag(&mut self, tag: Tag) {
        let name = tag.name.to_string();

        let Some(position) = self
            .stack
            .iter()
            .rposition(|node| node.tag() == Some(name.as_str()))
        else {
            if !VOID_ELEMENTS.contains(&name.as_str()) {
                self.fail(format!("stray </{name}> end tag"));
            }
            return;
        };

        if position == 0 {
            return;
        }

        let blocked = self.stack[position + 1..]
            .iter()
            .filter_map(Node::tag)
            .find(|open| !OPTIONAL_END_TAGS.contains(open))
            .map(str::to_string);
        if let Some(open) = blocked {
            self.fail(format!("</{name}> while <{open}> is still open"));
            return;
        }

        while self.stack.len() > position {
            self.close_top();
        }
    }

    fn text(&mut self, text: &str) {
        let mut text = text;
        if self.skip_newline {
            self.skip_newline = false;
            if self.top().children.is_empty() {
                text = text.strip_prefix('\n').unwrap_or(text);
            }
        }
        if !text.is_empty() {
            self.top().push_text(text);
        }
    }

    fn finish(mut self) -> Result<Node, ConversionError> {
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }

        while self.stack.len() > 1 {
            if let Some(open) = self.top_tag()
                && !OPTIONAL_END_TAGS.contains(&open)
            {
                return Err(ConversionError::ParseError(format!(
                    "<{open}> is never closed"
                )));
            }
            self.close_top();
        }

        self.stack
            .pop()
            .ok_or_else(|| ConversionError::InternalError("parser stack is empty".to_string()))
    }
}

impl TokenSink for FastSink {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        if self.failure.is_some() {
            return TokenSinkResult::Continue;
        }

        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start_tag(tag),
                TagKind::EndTag => self.end_tag(tag),
            },
            Token::CharacterTokens(text) => self.text(&text),
            Token::CommentToken(text) => {
                self.skip_newline = false;
                self.top().children.push(Node::comment(&*text));
            }
            Token::NullCharacterToken
            | Token::DoctypeToken(_)
            | Token::EOFToken
            | Token::ParseError(_) => {}
        }
        TokenSinkResult::Continue
    }
}

/// Strategy-independent structural fingerprint, used by tests to compare trees
pub fn outline(node: &Node) -> String {
    let mut out = String::new();
    write_outline(node, &mut out);
    out
}

fn write_outline(node: &Node, out: &mut String) {
    match &node.kind {
        NodeKind::Element { tag, .. } if matches!(tag.as_str(), "html" | "head" | "body") => {
            for child in &node.children {
                write_outline(child, out);
            }
        }
        NodeKind::Element { tag, .. } => {
            out.push('(');
            out.push_str(tag);
            for child in &node.children {
                write_outline(child, out);
            }
            out.push(')');
        }
        NodeKind::Text(text) => out.push_str(text.trim()),
        NodeKind::Document => {
            for child in &node.children {
                write_outline(child, out);
            }
        }
        NodeKind::Comment(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fast(html: &str) -> Result<Node, ConversionError> {
        FastParser::default().build(html)
    }

    fn recovery(html: &str) -> Node {
        RecoveryParser::default().build(html).expect("recovery parser never gives up")
    }

    #[test]
    fn test_fast_parses_simple_document() {
        let tree = fast("<html><body><h1>Hello</h1><p>World</p></body></html>").unwrap();
        assert_eq!(outline(&tree), "(h1Hello)(pWorld)");
    }

    #[test]
    fn test_fast_handles_optional_end_tags() {
        let tree = fast("<ul><li>one<li>two</ul><p>a<p>b").unwrap();
        assert_eq!(outline(&tree), "(ul(lione)(litwo))(pa)(pb)");
    }

    #[test]
    fn test_fast_table_without_end_tags() {
        let tree = fast("<table><tr><td>a<td>b<tr><td>c</table>").unwrap();
        assert_eq!(outline(&tree), "(table(tr(tda)(tdb))(tr(tdc)))");
    }

    #[test]
    fn test_fast_void_and_self_closing() {
        let tree = fast("<p>a<br>b<img src=x.png/></p>").unwrap();
        assert_eq!(outline(&tree), "(pa(br)b(img))");
    }

    #[test]
    fn test_fast_raw_text_elements() {
        let tree = fast("<script>if (a < b) { x = '<p>'; }</script><p>ok</p>").unwrap();
        let script = &tree.children[0];
        assert_eq!(script.text_content(), "if (a < b) { x = '<p>'; }");
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn test_fast_tokenizes_past_every_script() {
        let tree = fast("<script>a()</script><p>one</p><script>b()</script><p>two</p>").unwrap();
        let tags: Vec<&str> = tree.children.iter().filter_map(Node::tag).collect();
        assert_eq!(tags, vec!["script", "p", "script", "p"]);
        assert_eq!(tree.children[3].text_content(), "two");
    }

    #[test]
    fn test_fast_rejects_mismatched_nesting() {
        assert!(matches!(fast("<b><i>x</b></i>"), Err(ConversionError::ParseError(_))));
        assert!(matches!(fast("<div>x</span></div>"), Err(ConversionError::ParseError(_))));
        assert!(matches!(fast("<h1>open"), Err(ConversionError::ParseError(_))));
    }

    #[test]
    fn test_fast_rejects_foreign_content() {
        assert!(matches!(
            fast("<p><svg><circle/></svg></p>"),
            Err(ConversionError::ParseError(_))
        ));
    }

    #[test]
    fn test_fast_drops_newline_after_pre() {
        let tree = fast("<pre>\nline</pre>").unwrap();
        assert_eq!(tree.children[0].text_content(), "line");
    }

    #[test]
    fn test_recovery_repairs_nesting() {
        let tree = recovery("<b><i>x</b>y</i>");
        assert!(tree.text_content().contains('x'));
        assert!(tree.text_content().contains('y'));
    }

    #[test]
    fn test_recovery_marks_foreign_namespaces() {
        let tree = recovery("<p>a</p><svg><circle r='1'/></svg>");
        let mut stack = vec![&tree];
        let mut found = false;
        while let Some(node) = stack.pop() {
            if node.is_element("svg") {
                assert_eq!(node.namespace(), Some(Namespace::Svg));
                found = true;
            }
            stack.extend(node.children.iter());
        }
        assert!(found);
    }

    #[test]
    fn test_auto_falls_back_on_fast_failure() {
        let tree = parse("<div><b>bold</div>", ParserStrategy::Auto).unwrap();
        assert!(tree.text_content().contains("bold"));
        assert!(parse("<div><b>bold</div>", ParserStrategy::Fast).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let html = "<div>".repeat(40) + &"</div>".repeat(40);
        let fast_result = FastParser { max_depth: 10 }.build(&html);
        assert!(matches!(fast_result, Err(ConversionError::ResourceLimitExceeded(_))));
        let recovery_result = RecoveryParser { max_depth: 10 }.build(&html);
        assert!(matches!(recovery_result, Err(ConversionError::ResourceLimitExceeded(_))));
        assert!(parse_with(&html, ParserStrategy::Auto, Risk::Ordinary, 100).is_ok());
    }

    #[test]
    fn test_entities_decode_identically() {
        let html = "<p>&lt;tag&gt; &amp; &#169; &#x263A; &eacute; &nbsp;x</p>";
        let a = fast(html).unwrap().text_content();
        let b = recovery(html).text_content();
        assert_eq!(a, b);
        assert!(a.contains("<tag> & © ☺ é"));
    }

    #[test]
    fn test_duplicate_attributes_keep_first_in_both_strategies() {
        let html = r#"<a href="first" href="second">x</a>"#;
        for tree in [fast(html).unwrap(), recovery(html)] {
            let mut stack = vec![&tree];
            while let Some(node) = stack.pop() {
                if node.is_element("a") {
                    assert_eq!(node.attr("href"), Some("first"));
                }
                stack.extend(node.children.iter());
            }
        }
    }

    proptest! {
        #[test]
        fn prop_strategies_agree_on_well_formed_markup(
            blocks in proptest::collection::vec(
                (prop::sample::select(vec!["p", "h2", "li", "blockquote"]), "[a-zA-Z0-9 ]{1,20}"),
                1..8
            )
        ) {
            let html: String = blocks
                .iter()
                .map(|(tag, text)| format!("<{tag}>{text}</{tag}>"))
                .collect();
            let a = fast(&html).expect("well-formed input");
            let b = recovery(&html);
            prop_assert_eq!(outline(&a), outline(&b));
        }
    }
}
