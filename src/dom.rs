//! Owned node tree shared by both parser strategies
//!
//! The tree is produced fresh for each conversion and owned by the caller of
//! the parser. The converter only borrows it. Element names are stored
//! lower-case for HTML elements and as written for foreign (SVG/MathML)
//! elements, mirroring what html5ever reports.

/// A single attribute, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Element namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
    MathMl,
}

/// Node payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Tree root; never has a parent
    Document,
    Element {
        tag: String,
        namespace: Namespace,
        attrs: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
}

/// A node and its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

/// Elements that never have content or an end tag
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

impl Node {
    pub fn document(children: Vec<Node>) -> Self {
        Self {
            kind: NodeKind::Document,
            children,
        }
    }

    /// Build an element; duplicate attribute names keep the first occurrence
    pub fn element(tag: impl Into<String>, namespace: Namespace, attrs: Vec<Attribute>) -> Self {
        let mut unique: Vec<Attribute> = Vec::with_capacity(attrs.len());
        for attr in attrs {
            if !unique.iter().any(|a| a.name == attr.name) {
                unique.push(attr);
            }
        }

        Self {
            kind: NodeKind::Element {
                tag: tag.into(),
                namespace,
                attrs: unique,
            },
            children: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text(text.into()),
            children: Vec::new(),
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Comment(text.into()),
            children: Vec::new(),
        }
    }

    /// Tag name for elements, `None` otherwise
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn is_element(&self, name: &str) -> bool {
        self.tag() == Some(name)
    }

    pub fn attrs(&self) -> &[Attribute] {
        match &self.kind {
            NodeKind::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs()
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match &self.kind {
            NodeKind::Element { namespace, .. } => Some(*namespace),
            _ => None,
        }
    }

    /// Appends a text child, merging with a preceding text sibling
    pub fn push_text(&mut self, text: &str) {
        if let Some(Node {
            kind: NodeKind::Text(existing),
            ..
        }) = self.children.last_mut()
        {
            existing.push_str(text);
        } else {
            self.children.push(Node::text(text));
        }
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            NodeKind::Document | NodeKind::Element { .. } => {
                for child in &self.children {
                    child.collect_text(out);
                }
            }
        }
    }

    /// Maximum depth of the subtree, counting this node as depth 0
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack: Vec<(&Node, usize)> = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(node.children.iter().map(|child| (child, depth + 1)));
        }
        max
    }

    /// Serialize the subtree back to HTML
    ///
    /// Text is escaped, attribute values are double-quoted, void elements have
    /// no end tag. Raw text elements keep their content unescaped.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out, false);
        out
    }

    fn write_html(&self, out: &mut String, raw_text: bool) {
        match &self.kind {
            NodeKind::Document => {
                for child in &self.children {
                    child.write_html(out, false);
                }
            }
            NodeKind::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_into(out, text, false);
                }
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Element {
                tag,
                namespace,
                attrs,
            } => {
                out.push('<');
                out.push_str(tag);
                for attr in attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    escape_into(out, &attr.value, true);
                    out.push('"');
                }
                out.push('>');

                if *namespace == Namespace::Html && VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }

                let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());
                for child in &self.children {
                    child.write_html(out, raw);
                }

                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        let mut p = Node::element(
            "p",
            Namespace::Html,
            vec![Attribute::new("class", "lead"), Attribute::new("class", "ignored")],
        );
        p.push_text("a < b ");
        p.push_text("& c");
        let mut em = Node::element("em", Namespace::Html, Vec::new());
        em.push_text("x");
        p.children.push(em);
        p.children
            .push(Node::element("br", Namespace::Html, Vec::new()));
        Node::document(vec![p])
    }

    #[test]
    fn test_duplicate_attributes_keep_first() {
        let doc = sample();
        let p = &doc.children[0];
        assert_eq!(p.attrs().len(), 1);
        assert_eq!(p.attr("class"), Some("lead"));
    }

    #[test]
    fn test_push_text_merges_siblings() {
        let doc = sample();
        let p = &doc.children[0];
        assert_eq!(p.children[0].kind, NodeKind::Text("a < b & c".to_string()));
    }

    #[test]
    fn test_text_content() {
        assert_eq!(sample().text_content(), "a < b & cx");
    }

    #[test]
    fn test_serialize_round_trip_shape() {
        assert_eq!(
            sample().to_html(),
            "<p class=\"lead\">a &lt; b &amp; c<em>x</em><br></p>"
        );
    }

    #[test]
    fn test_serialize_raw_text() {
        let mut script = Node::element("script", Namespace::Html, Vec::new());
        script.push_text("if (a < b) {}");
        assert_eq!(script.to_html(), "<script>if (a < b) {}</script>");
    }

    #[test]
    fn test_depth() {
        assert_eq!(sample().depth(), 3);
        assert_eq!(Node::text("x").depth(), 0);
    }
}
