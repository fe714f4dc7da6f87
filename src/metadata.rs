//! Metadata collection alongside conversion
//!
//! The converter reports every construct that carries metadata to a
//! [`MetadataObserver`] as it walks the tree, so metadata never needs a
//! second pass. Without a collector the converter is handed a
//! [`NoopCollector`] and the calls cost nothing.
//!
//! [`MetadataCollector`] is the real observer. It gathers:
//!
//! - **Document fields** from `<html lang dir>`, `<title>`, `<meta>`,
//!   `<link rel="canonical">` and `<base>`, with Open Graph (`og:*`) and
//!   Twitter Card (`twitter:*`) keys split into their own maps
//! - **Headings** with a hierarchy depth computed as they arrive
//! - **Links** classified as anchor, email, phone, external, internal or other
//! - **Images** classified as data URI, external or relative
//! - **Structured data** from JSON-LD scripts, Microdata item scopes and RDFa
//!   `typeof` scopes, capped at a configurable size per block
//!
//! Each category can be switched off in [`MetadataConfig`]; a disabled
//! category stays empty.
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::metadata::{LinkType, MetadataConfig};
//! use html_markdown_converter::{convert_with_metadata, ConversionOptions};
//!
//! let html = r#"<title>Docs</title><h1>Intro</h1><a href="mailto:a@b.com">mail</a>"#;
//! let (markdown, metadata) =
//!     convert_with_metadata(html, &ConversionOptions::default(), &MetadataConfig::default()).unwrap();
//!
//! assert_eq!(markdown, "# Intro\n\n[mail](mailto:a@b.com)\n");
//! assert_eq!(metadata.document.title.as_deref(), Some("Docs"));
//! assert_eq!(metadata.links[0].link_type, LinkType::Email);
//! assert!(!metadata.links[0].is_external);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::dom::{Attribute, Node, NodeKind};
use crate::error::ConversionError;

/// Default cap on a single structured data payload (1 MiB)
pub const DEFAULT_MAX_STRUCTURED_DATA_SIZE: usize = 1024 * 1024;

/// Which metadata to collect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    pub extract_document: bool,
    pub extract_headers: bool,
    pub extract_links: bool,
    pub extract_images: bool,
    pub extract_structured_data: bool,
    /// Bytes kept per structured data block
    pub max_structured_data_size: usize,
    /// Fail with `ResourceLimitExceeded` instead of truncating oversized blocks
    pub fail_on_oversized_structured_data: bool,
    /// Page URL; absolute links sharing its origin classify as internal
    pub base_url: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            extract_document: true,
            extract_headers: true,
            extract_links: true,
            extract_images: true,
            extract_structured_data: true,
            max_structured_data_size: DEFAULT_MAX_STRUCTURED_DATA_SIZE,
            fail_on_oversized_structured_data: false,
            base_url: None,
        }
    }
}

impl MetadataConfig {
    /// A configuration with every category switched off
    pub fn disabled() -> Self {
        Self {
            extract_document: false,
            extract_headers: false,
            extract_links: false,
            extract_images: false,
            extract_structured_data: false,
            ..Self::default()
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.extract_document
            || self.extract_headers
            || self.extract_links
            || self.extract_images
            || self.extract_structured_data
    }
}

/// Value of the `dir` attribute on the root element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    Ltr,
    Rtl,
    Auto,
}

/// Document-level fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub charset: Option<String>,
    pub canonical_url: Option<String>,
    pub base_href: Option<String>,
    pub viewport: Option<String>,
    pub text_direction: Option<TextDirection>,
    /// `og:*` properties, keyed without the prefix
    pub open_graph: BTreeMap<String, String>,
    /// `twitter:*` names, keyed without the prefix
    pub twitter_card: BTreeMap<String, String>,
    /// Remaining named meta tags
    pub meta_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderRecord {
    /// 1 to 6
    pub level: u8,
    pub text: String,
    pub id: Option<String>,
    /// Hierarchy depth relative to the preceding headings, starting at 0
    pub depth: usize,
    /// Pre-order index of the heading element in the tree
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Anchor,
    Internal,
    External,
    Email,
    Phone,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub href: String,
    pub text: String,
    pub title: Option<String>,
    pub link_type: LinkType,
    /// `rel` tokens, lower-cased
    pub rel: Vec<String>,
    /// Attributes other than `href`, `title` and `rel`
    pub attributes: BTreeMap<String, String>,
    pub is_external: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    DataUri,
    External,
    Relative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub src: String,
    pub alt: Option<String>,
    pub title: Option<String>,
    pub image_type: ImageType,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Attributes other than `src`, `alt`, `title`, `width` and `height`
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredDataType {
    JsonLd,
    Microdata,
    Rdfa,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredDataRecord {
    pub data_type: StructuredDataType,
    /// Payload text; JSON for all three types
    pub raw: String,
    /// `@type` / `itemtype` / `typeof`, when present
    pub schema_type: Option<String>,
    /// The payload was cut at `max_structured_data_size`
    pub truncated: bool,
}

/// Everything collected during one conversion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    pub document: DocumentMetadata,
    pub headers: Vec<HeaderRecord>,
    pub links: Vec<LinkRecord>,
    pub images: Vec<ImageRecord>,
    pub structured_data: Vec<StructuredDataRecord>,
}

/// Ingestion hooks the converter calls as it walks the tree
///
/// All hooks default to doing nothing.
#[allow(unused_variables)]
pub trait MetadataObserver {
    /// Whether anything is being collected; lets the converter skip work for skipped subtrees
    fn is_active(&self) -> bool {
        true
    }

    /// Attributes of the `<html>` element
    fn observe_root(&mut self, attrs: &[Attribute]) {}

    fn observe_title(&mut self, title: &str) {}

    fn observe_meta(&mut self, attrs: &[Attribute]) {}

    /// A `<link>` element (not an anchor)
    fn observe_head_link(&mut self, attrs: &[Attribute]) {}

    fn observe_base(&mut self, href: &str) {}

    fn observe_heading(&mut self, level: u8, text: &str, id: Option<&str>, position: usize) {}

    fn observe_link(&mut self, href: &str, text: &str, title: Option<&str>, attrs: &[Attribute]) {}

    fn observe_image(&mut self, src: &str, alt: Option<&str>, title: Option<&str>, attrs: &[Attribute]) {}

    /// Body of a `<script type="application/ld+json">`
    fn observe_json_ld(&mut self, payload: &str) -> Result<(), ConversionError> {
        Ok(())
    }

    /// An element carrying `itemscope` or `typeof`
    fn observe_item_scope(&mut self, node: &Node) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// Observer used when no metadata is requested
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollector;

impl MetadataObserver for NoopCollector {
    fn is_active(&self) -> bool {
        false
    }
}

/// Collects a [`MetadataRecord`]; consumed by [`MetadataCollector::finish`]
#[derive(Debug)]
pub struct MetadataCollector {
    config: MetadataConfig,
    base_origin: Option<String>,
    record: MetadataRecord,
    /// Levels of the headings that are still open, outermost first
    heading_levels: Vec<u8>,
}

impl MetadataCollector {
    pub fn new(config: MetadataConfig) -> Self {
        let base_origin = config.base_url.as_deref().and_then(origin_of);
        Self {
            config,
            base_origin,
            record: MetadataRecord::default(),
            heading_levels: Vec::new(),
        }
    }

    /// Hand over the collected record
    pub fn finish(self) -> MetadataRecord {
        self.record
    }

    fn push_structured(
        &mut self,
        data_type: StructuredDataType,
        mut raw: String,
        schema_type: Option<String>,
    ) -> Result<(), ConversionError> {
        let limit = self.config.max_structured_data_size;
        let mut truncated = false;

        if raw.len() > limit {
            if self.config.fail_on_oversized_structured_data {
                return Err(ConversionError::ResourceLimitExceeded(format!(
                    "structured data block of {} bytes exceeds limit of {limit} bytes",
                    raw.len()
                )));
            }
            log::warn!(
                "truncating structured data block of {} bytes to {limit} bytes",
                raw.len()
            );
            let mut cut = limit;
            while !raw.is_char_boundary(cut) {
                cut -= 1;
            }
            raw.truncate(cut);
            truncated = true;
        }

        self.record.structured_data.push(StructuredDataRecord {
            data_type,
            raw,
            schema_type,
            truncated,
        });
        Ok(())
    }
}

impl MetadataObserver for MetadataCollector {
    fn is_active(&self) -> bool {
        self.config.any_enabled()
    }

    fn observe_root(&mut self, attrs: &[Attribute]) {
        if !self.config.extract_document {
            return;
        }
        let document = &mut self.record.document;
        if document.language.is_none()
            && let Some(lang) = attr_value(attrs, "lang").filter(|v| !v.is_empty())
        {
            document.language = Some(lang.to_string());
        }
        if document.text_direction.is_none() {
            document.text_direction = match attr_value(attrs, "dir").map(str::to_ascii_lowercase) {
                Some(dir) if dir == "ltr" => Some(TextDirection::Ltr),
                Some(dir) if dir == "rtl" => Some(TextDirection::Rtl),
                Some(dir) if dir == "auto" => Some(TextDirection::Auto),
                _ => None,
            };
        }
    }

    fn observe_title(&mut self, title: &str) {
        if !self.config.extract_document || self.record.document.title.is_some() {
            return;
        }
        let title = collapse(title);
        if !title.is_empty() {
            self.record.document.title = Some(title);
        }
    }

    fn observe_meta(&mut self, attrs: &[Attribute]) {
        if !self.config.extract_document {
            return;
        }
        let document = &mut self.record.document;

        if let Some(charset) = attr_value(attrs, "charset") {
            document.charset.get_or_insert_with(|| charset.trim().to_string());
            return;
        }

        let Some(content) = attr_value(attrs, "content") else {
            return;
        };
        let content = content.trim().to_string();

        let key = attr_value(attrs, "property")
            .or_else(|| attr_value(attrs, "name"))
            .or_else(|| attr_value(attrs, "http-equiv"))
            .map(|k| k.trim().to_ascii_lowercase());
        let Some(key) = key else {
            return;
        };

        if let Some(og) = key.strip_prefix("og:") {
            document.open_graph.entry(og.to_string()).or_insert(content);
            return;
        }
        if let Some(twitter) = key.strip_prefix("twitter:") {
            document
                .twitter_card
                .entry(twitter.to_string())
                .or_insert(content);
            return;
        }

        match key.as_str() {
            "description" => {
                document.description.get_or_insert(content);
            }
            "author" => {
                document.author.get_or_insert(content);
            }
            "viewport" => {
                document.viewport.get_or_insert(content);
            }
            "keywords" => {
                if document.keywords.is_empty() {
                    document.keywords = content
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect();
                }
            }
            "content-type" => {
                if document.charset.is_none()
                    && let Some(charset) = crate::charset::charset_from_content_type(&content)
                {
                    document.charset = Some(charset);
                }
            }
            _ => {
                document.meta_tags.entry(key).or_insert(content);
            }
        }
    }

    fn observe_head_link(&mut self, attrs: &[Attribute]) {
        if !self.config.extract_document || self.record.document.canonical_url.is_some() {
            return;
        }
        let is_canonical = attr_value(attrs, "rel")
            .is_some_and(|rel| rel.split_ascii_whitespace().any(|t| t.eq_ignore_ascii_case("canonical")));
        if is_canonical && let Some(href) = attr_value(attrs, "href") {
            self.record.document.canonical_url = Some(href.trim().to_string());
        }
    }

    fn observe_base(&mut self, href: &str) {
        if self.config.extract_document && self.record.document.base_href.is_none() {
            self.record.document.base_href = Some(href.trim().to_string());
        }
    }

    fn observe_heading(&mut self, level: u8, text: &str, id: Option<&str>, position: usize) {
        if !self.config.extract_headers {
            return;
        }

        while self.heading_levels.last().is_some_and(|&open| open >= level) {
            self.heading_levels.pop();
        }
        let depth = self.heading_levels.len();
        self.heading_levels.push(level);

        self.record.headers.push(HeaderRecord {
            level,
            text: text.to_string(),
            id: id.map(str::to_string),
            depth,
            position,
        });
    }

    fn observe_link(&mut self, href: &str, text: &str, title: Option<&str>, attrs: &[Attribute]) {
        if !self.config.extract_links {
            return;
        }

        let link_type = classify_link(href, self.base_origin.as_deref());
        let rel = attr_value(attrs, "rel")
            .map(|rel| {
                rel.split_ascii_whitespace()
                    .map(str::to_ascii_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        self.record.links.push(LinkRecord {
            href: href.to_string(),
            text: text.to_string(),
            title: title.map(str::to_string),
            link_type,
            rel,
            attributes: other_attributes(attrs, &["href", "title", "rel"]),
            is_external: link_type == LinkType::External,
        });
    }

    fn observe_image(&mut self, src: &str, alt: Option<&str>, title: Option<&str>, attrs: &[Attribute]) {
        if !self.config.extract_images {
            return;
        }

        self.record.images.push(ImageRecord {
            src: src.to_string(),
            alt: alt.map(str::to_string),
            title: title.map(str::to_string),
            image_type: classify_image(src),
            width: attr_value(attrs, "width").and_then(parse_dimension),
            height: attr_value(attrs, "height").and_then(parse_dimension),
            attributes: other_attributes(attrs, &["src", "alt", "title", "width", "height"]),
        });
    }

    fn observe_json_ld(&mut self, payload: &str) -> Result<(), ConversionError> {
        if !self.config.extract_structured_data {
            return Ok(());
        }
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(());
        }

        let schema_type = serde_json::from_str::<Value>(payload)
            .ok()
            .as_ref()
            .and_then(json_ld_type);
        self.push_structured(StructuredDataType::JsonLd, payload.to_string(), schema_type)
    }

    fn observe_item_scope(&mut self, node: &Node) -> Result<(), ConversionError> {
        if !self.config.extract_structured_data {
            return Ok(());
        }

        if node.has_attr("itemscope") {
            // Scopes that are themselves a property belong to their parent item
            if node.has_attr("itemprop") {
                return Ok(());
            }
            let item = microdata_item(node);
            let schema_type = node.attr("itemtype").map(str::to_string);
            return self.push_structured(
                StructuredDataType::Microdata,
                Value::Object(item).to_string(),
                schema_type,
            );
        }

        if node.has_attr("typeof") && !node.has_attr("property") {
            let item = rdfa_item(node);
            let schema_type = node.attr("typeof").map(str::to_string);
            return self.push_structured(
                StructuredDataType::Rdfa,
                Value::Object(item).to_string(),
                schema_type,
            );
        }

        Ok(())
    }
}

/// Classify a link target; scheme rules are checked before path shape
///
/// `base_origin` (`scheme://host[:port]`) turns same-origin absolute links into internal ones.
pub fn classify_link(href: &str, base_origin: Option<&str>) -> LinkType {
    let href = href.trim();

    if href.starts_with('#') {
        return LinkType::Anchor;
    }

    match url_scheme(href).map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("mailto") => LinkType::Email,
        Some("tel") => LinkType::Phone,
        Some("http") | Some("https") => {
            if same_origin(base_origin, href) {
                LinkType::Internal
            } else {
                LinkType::External
            }
        }
        Some(_) => LinkType::Other,
        None if href.starts_with("//") => {
            // Protocol-relative: takes the base's scheme
            let resolved = base_origin
                .and_then(|base| base.split_once("://"))
                .map(|(scheme, _)| format!("{scheme}:{href}"));
            match resolved {
                Some(url) if same_origin(base_origin, &url) => LinkType::Internal,
                _ => LinkType::External,
            }
        }
        None if href.is_empty() => LinkType::Other,
        None => LinkType::Internal,
    }
}

/// Classify an image source
pub fn classify_image(src: &str) -> ImageType {
    let src = src.trim();
    match url_scheme(src) {
        Some(scheme) if scheme.eq_ignore_ascii_case("data") => ImageType::DataUri,
        Some(_) => ImageType::External,
        None if src.starts_with("//") => ImageType::External,
        None => ImageType::Relative,
    }
}

/// The scheme of an absolute URL, if it has one
fn url_scheme(url: &str) -> Option<&str> {
    let colon = url.find(':')?;
    let scheme = &url[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

fn same_origin(base_origin: Option<&str>, url: &str) -> bool {
    matches!((base_origin, origin_of(url)), (Some(base), Some(origin)) if base == origin)
}

/// `scheme://host[:port]` of an http(s) URL, lower-cased
fn origin_of(url: &str) -> Option<String> {
    let url = url.trim();
    let scheme = url_scheme(url)?.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let rest = url[scheme.len() + 1..].strip_prefix("//")?;
    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..host_end];
    if host.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{}", host.to_ascii_lowercase()))
}

fn json_ld_type(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => match map.get("@type") {
            Some(Value::String(t)) => Some(t.clone()),
            Some(Value::Array(types)) => types.iter().find_map(|t| t.as_str().map(str::to_string)),
            _ => map
                .get("@graph")
                .and_then(Value::as_array)
                .and_then(|graph| graph.iter().find_map(json_ld_type)),
        },
        Value::Array(items) => items.iter().find_map(json_ld_type),
        _ => None,
    }
}

fn microdata_item(scope: &Node) -> Map<String, Value> {
    let mut item = Map::new();
    if let Some(itemtype) = scope.attr("itemtype") {
        item.insert("@type".to_string(), Value::String(itemtype.to_string()));
    }
    for child in &scope.children {
        collect_properties(child, "itemprop", "itemscope", &mut item, microdata_item);
    }
    item
}

fn rdfa_item(scope: &Node) -> Map<String, Value> {
    let mut item = Map::new();
    if let Some(vocab) = scope.attr("vocab") {
        item.insert("@vocab".to_string(), Value::String(vocab.to_string()));
    }
    if let Some(kind) = scope.attr("typeof") {
        item.insert("@type".to_string(), Value::String(kind.to_string()));
    }
    for child in &scope.children {
        collect_properties(child, "property", "typeof", &mut item, rdfa_item);
    }
    item
}

/// Gather `prop_attr` values below a scope, stopping at nested scopes
fn collect_properties(
    node: &Node,
    prop_attr: &str,
    scope_attr: &str,
    item: &mut Map<String, Value>,
    nested: fn(&Node) -> Map<String, Value>,
) {
    if !matches!(node.kind, NodeKind::Element { .. }) {
        return;
    }

    let opens_scope = node.has_attr(scope_attr);

    if let Some(names) = node.attr(prop_attr) {
        let value = if opens_scope {
            Value::Object(nested(node))
        } else {
            Value::String(property_value(node))
        };
        for name in names.split_ascii_whitespace() {
            insert_property(item, name, value.clone());
        }
    }

    if opens_scope {
        return;
    }
    for child in &node.children {
        collect_properties(child, prop_attr, scope_attr, item, nested);
    }
}

fn insert_property(item: &mut Map<String, Value>, name: &str, value: Value) {
    match item.get_mut(name) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            item.insert(name.to_string(), value);
        }
    }
}

fn property_value(node: &Node) -> String {
    if let Some(content) = node.attr("content") {
        return content.to_string();
    }
    let url_attr = match node.tag() {
        Some("a" | "link" | "area") => node.attr("href"),
        Some("img" | "audio" | "video" | "source" | "iframe" | "embed" | "track") => node.attr("src"),
        Some("object") => node.attr("data"),
        Some("time") => node.attr("datetime"),
        Some("data" | "meter") => node.attr("value"),
        _ => None,
    };
    url_attr
        .map(str::to_string)
        .unwrap_or_else(|| collapse(&node.text_content()))
}

fn attr_value<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .map(|a| a.value.as_str())
}

fn other_attributes(attrs: &[Attribute], excluded: &[&str]) -> BTreeMap<String, String> {
    attrs
        .iter()
        .filter(|a| !excluded.iter().any(|e| a.name.eq_ignore_ascii_case(e)))
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect()
}

fn parse_dimension(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value.strip_suffix("px").unwrap_or(value).trim();
    digits.parse().ok()
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
