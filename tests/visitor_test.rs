//! Visitor integration tests
//!
//! Each test installs a small visitor and checks how its outcomes reshape
//! the Markdown.

use html_markdown_converter::metadata::{LinkType, MetadataCollector};
use html_markdown_converter::parser::parse;
use html_markdown_converter::{
    ConversionError, ConversionOptions, HtmlVisitor, MarkdownConverter, MetadataConfig, NodeContext, NodeType,
    ParserStrategy, VisitOutcome, convert_with_visitor,
};

fn run(html: &str, visitor: &mut dyn HtmlVisitor) -> Result<String, ConversionError> {
    convert_with_visitor(html, &ConversionOptions::default(), visitor)
}

/// Records every element it is shown
#[derive(Default)]
struct Recorder {
    starts: Vec<(NodeType, String, usize, Option<String>)>,
    texts: Vec<String>,
}

impl HtmlVisitor for Recorder {
    fn visit_element_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        self.starts.push((
            ctx.node_type,
            ctx.tag_name.to_string(),
            ctx.index_in_parent,
            ctx.parent_tag.map(str::to_string),
        ));
        VisitOutcome::Continue
    }

    fn visit_text(&mut self, _ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        self.texts.push(text.to_string());
        VisitOutcome::Continue
    }
}

#[test]
fn test_continue_changes_nothing() {
    let html = "<h1>Title</h1><p>Some <em>text</em></p>";
    let mut recorder = Recorder::default();
    let markdown = run(html, &mut recorder).unwrap();
    assert_eq!(markdown, "# Title\n\nSome *text*\n");

    let tags: Vec<&str> = recorder.starts.iter().map(|s| s.1.as_str()).collect();
    assert_eq!(tags, vec!["h1", "p", "em"]);
    assert_eq!(recorder.starts[0].0, NodeType::Heading);
    assert_eq!(recorder.starts[2].0, NodeType::Em);
    assert_eq!(recorder.starts[2].3.as_deref(), Some("p"));
    assert_eq!(recorder.texts, vec!["Title", "Some ", "text"]);
}

struct SkipLinks;

impl HtmlVisitor for SkipLinks {
    fn visit_link(&mut self, _ctx: &NodeContext<'_>, _href: &str, _text: &str, _title: Option<&str>) -> VisitOutcome {
        VisitOutcome::Skip
    }
}

#[test]
fn test_skip_removes_construct() {
    let markdown = run(r#"<p>See <a href="/x">this</a> now</p>"#, &mut SkipLinks).unwrap();
    assert_eq!(markdown, "See now\n");
}

#[test]
fn test_skip_keeps_metadata() {
    let html = r#"<p>See <a href="mailto:a@b.com">mail</a></p>"#;
    let tree = parse(html, ParserStrategy::Auto).unwrap();
    let options = ConversionOptions::default();
    let mut skip = SkipLinks;
    let visitor: &mut dyn HtmlVisitor = &mut skip;
    let mut collector = MetadataCollector::new(MetadataConfig::default());

    let markdown = MarkdownConverter::new(&options, Some(visitor), &mut collector)
        .convert(&tree)
        .unwrap();
    let record = collector.finish();

    assert_eq!(markdown, "See\n");
    assert_eq!(record.links.len(), 1);
    assert_eq!(record.links[0].href, "mailto:a@b.com");
    assert_eq!(record.links[0].link_type, LinkType::Email);
}

struct BracketHeadings;

impl HtmlVisitor for BracketHeadings {
    fn visit_heading(&mut self, _ctx: &NodeContext<'_>, level: u8, text: &str, _id: Option<&str>) -> VisitOutcome {
        VisitOutcome::Custom(format!("[{level}] {text}"))
    }
}

#[test]
fn test_custom_replaces_output() {
    let markdown = run("<h2>Install</h2><p>Body</p>", &mut BracketHeadings).unwrap();
    assert_eq!(markdown, "[2] Install\n\nBody\n");
}

struct PreserveEmphasis;

impl HtmlVisitor for PreserveEmphasis {
    fn visit_element_start(&mut self, ctx: &NodeContext<'_>) -> VisitOutcome {
        if ctx.tag_name == "em" {
            VisitOutcome::PreserveSource
        } else {
            VisitOutcome::Continue
        }
    }
}

#[test]
fn test_preserve_source_emits_html() {
    let markdown = run("<p>Keep <em>this</em> <strong>bold</strong></p>", &mut PreserveEmphasis).unwrap();
    assert_eq!(markdown, "Keep <em>this</em> **bold**\n");
}

struct FailOn(&'static str);

impl HtmlVisitor for FailOn {
    fn visit_text(&mut self, _ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        if text.contains(self.0) {
            VisitOutcome::Error(format!("refusing {text}"))
        } else {
            VisitOutcome::Continue
        }
    }
}

#[test]
fn test_error_aborts_without_output() {
    let result = run("<p>fine</p><p>secret</p><p>after</p>", &mut FailOn("secret"));
    let err = result.unwrap_err();
    assert!(matches!(err, ConversionError::VisitorAborted(_)));
    assert_eq!(err.code(), 6);
    assert_eq!(err.to_string(), "refusing secret");
}

struct CountListItems {
    items: Vec<(bool, String, String)>,
    rows: Vec<(Vec<String>, bool)>,
}

impl HtmlVisitor for CountListItems {
    fn visit_list_item(&mut self, _ctx: &NodeContext<'_>, ordered: bool, marker: &str, text: &str) -> VisitOutcome {
        self.items.push((ordered, marker.to_string(), text.to_string()));
        VisitOutcome::Continue
    }

    fn visit_table_row(&mut self, _ctx: &NodeContext<'_>, cells: &[String], is_header: bool) -> VisitOutcome {
        self.rows.push((cells.to_vec(), is_header));
        VisitOutcome::Continue
    }
}

#[test]
fn test_construct_hooks_see_structure() {
    let mut visitor = CountListItems {
        items: Vec::new(),
        rows: Vec::new(),
    };
    let html = r#"<ol start="3"><li>c</li><li>d</li></ol><table><tr><th>h</th></tr><tr><td>v</td></tr></table>"#;
    let markdown = run(html, &mut visitor).unwrap();

    assert_eq!(markdown, "3. c\n4. d\n\n| h |\n| --- |\n| v |\n");
    assert_eq!(
        visitor.items,
        vec![
            (true, "3.".to_string(), "c".to_string()),
            (true, "4.".to_string(), "d".to_string()),
        ]
    );
    assert_eq!(
        visitor.rows,
        vec![(vec!["h".to_string()], true), (vec!["v".to_string()], false)]
    );
}

struct UppercaseText;

impl HtmlVisitor for UppercaseText {
    fn visit_text(&mut self, _ctx: &NodeContext<'_>, text: &str) -> VisitOutcome {
        VisitOutcome::Custom(text.to_uppercase())
    }
}

#[test]
fn test_text_hook_rewrites_inline_content() {
    let markdown = run(r#"<p>go <a href="/h">home</a></p>"#, &mut UppercaseText).unwrap();
    assert_eq!(markdown, "GO [HOME](/h)\n");
}
