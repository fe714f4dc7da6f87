//! Charset resolution and decoding for byte input
//!
//! Byte input goes through a three step cascade before it reaches the
//! classifier's text checks and the parser:
//!
//! 1. **Content-Type**: the `charset` parameter of a caller-supplied header value
//! 2. **Meta tags**: `<meta charset>` or `<meta http-equiv="Content-Type">` in the
//!    first kilobyte
//! 3. **Default**: UTF-8
//!
//! The resolved label is then handed to `encoding_rs` for transcoding.
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::charset::{resolve_charset, CharsetSource};
//!
//! let resolved = resolve_charset(Some("text/html; charset=ISO-8859-1"), b"<p>x</p>");
//! assert_eq!(resolved.label, "ISO-8859-1");
//! assert_eq!(resolved.source, CharsetSource::ContentType);
//!
//! let resolved = resolve_charset(None, b"<meta charset=\"utf-8\"><p>x</p>");
//! assert_eq!(resolved.label, "UTF-8");
//! assert_eq!(resolved.source, CharsetSource::MetaTag);
//! ```

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

use crate::error::ConversionError;

/// Charset used when neither the header nor the document declares one
const DEFAULT_CHARSET: &str = "UTF-8";

/// Meta declarations beyond this many bytes are ignored
const META_SCAN_LIMIT: usize = 1024;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Where a resolved charset label came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSource {
    /// `charset` parameter of the Content-Type value
    ContentType,
    /// A meta declaration inside the document
    MetaTag,
    /// Nothing declared
    Default,
}

/// A resolved charset label, upper-cased
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCharset {
    pub label: String,
    pub source: CharsetSource,
}

/// Resolve the charset of byte input using the cascade described in the module docs
pub fn resolve_charset(content_type: Option<&str>, html: &[u8]) -> ResolvedCharset {
    if let Some(ct) = content_type
        && let Some(label) = charset_from_content_type(ct)
    {
        return ResolvedCharset {
            label: label.to_uppercase(),
            source: CharsetSource::ContentType,
        };
    }

    if let Some(label) = charset_from_meta(html) {
        return ResolvedCharset {
            label: label.to_uppercase(),
            source: CharsetSource::MetaTag,
        };
    }

    ResolvedCharset {
        label: DEFAULT_CHARSET.to_string(),
        source: CharsetSource::Default,
    }
}

/// Extract the `charset` parameter from a Content-Type value
///
/// Accepts quoted and unquoted values and any parameter position:
///
/// ```rust
/// use html_markdown_converter::charset::charset_from_content_type;
///
/// assert_eq!(charset_from_content_type("text/html;charset=\"utf-8\""), Some("utf-8".to_string()));
/// assert_eq!(charset_from_content_type("text/html"), None);
/// ```
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    static CHARSET_PARAM: OnceLock<Option<Regex>> = OnceLock::new();
    let regex =
        CHARSET_PARAM.get_or_init(|| Regex::new(r#"(?i)charset\s*=\s*"?([^";,\s]+)"?"#).ok());

    regex
        .as_ref()?
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract a charset declared by a meta tag within the first kilobyte
pub fn charset_from_meta(html: &[u8]) -> Option<String> {
    let prefix = String::from_utf8_lossy(&html[..html.len().min(META_SCAN_LIMIT)]);

    static META_CHARSET: OnceLock<Option<Regex>> = OnceLock::new();
    let meta_charset = META_CHARSET
        .get_or_init(|| Regex::new(r#"(?i)<meta\s+charset\s*=\s*["']?([^"';>\s/]+)"#).ok());

    if let Some(regex) = meta_charset.as_ref()
        && let Some(m) = regex.captures(&prefix).and_then(|caps| caps.get(1))
    {
        return Some(m.as_str().to_string());
    }

    static HTTP_EQUIV: OnceLock<Option<Regex>> = OnceLock::new();
    let http_equiv = HTTP_EQUIV.get_or_init(|| {
        Regex::new(
            r#"(?i)<meta\s+http-equiv\s*=\s*["']?content-type["']?\s+content\s*=\s*["']?[^"'>]*charset\s*=\s*([^"';>\s]+)"#,
        )
        .ok()
    });

    http_equiv
        .as_ref()?
        .captures(&prefix)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Decode byte input to UTF-8 with the given charset label
///
/// UTF-8 input is borrowed when valid; a leading UTF-8 byte order mark is
/// dropped. Other labels are transcoded with `encoding_rs`, which rejects
/// malformed sequences instead of substituting replacement characters.
///
/// # Errors
///
/// Returns `ConversionError::EncodingError` for unknown labels and for
/// bytes that are invalid in the resolved encoding.
pub fn decode_to_utf8<'a>(html: &'a [u8], label: &str) -> Result<Cow<'a, str>, ConversionError> {
    if label.eq_ignore_ascii_case("UTF-8") || label.eq_ignore_ascii_case("UTF8") {
        let body = html.strip_prefix(UTF8_BOM).unwrap_or(html);
        return std::str::from_utf8(body).map(Cow::Borrowed).map_err(|e| {
            ConversionError::EncodingError(format!(
                "invalid UTF-8 at byte {}: {}",
                e.valid_up_to(),
                e
            ))
        });
    }

    let encoding = encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
        ConversionError::EncodingError(format!("unsupported charset '{label}'"))
    })?;

    encoding
        .decode_without_bom_handling_and_without_replacement(html)
        .ok_or_else(|| {
            ConversionError::EncodingError(format!("invalid byte sequence for charset '{label}'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_content_type_variants() {
        assert_eq!(
            charset_from_content_type("text/html; charset=UTF-8"),
            Some("UTF-8".to_string())
        );
        assert_eq!(
            charset_from_content_type("text/html;charset=windows-1252; boundary=x"),
            Some("windows-1252".to_string())
        );
        assert_eq!(
            charset_from_content_type("text/html; CHARSET=\"iso-8859-1\""),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(charset_from_content_type(""), None);
    }

    #[test]
    fn test_meta_charset_html5_and_html4() {
        assert_eq!(
            charset_from_meta(b"<head><META CHARSET='Shift_JIS'></head>"),
            Some("Shift_JIS".to_string())
        );
        assert_eq!(
            charset_from_meta(
                b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=ISO-8859-1\">"
            ),
            Some("ISO-8859-1".to_string())
        );
        assert_eq!(charset_from_meta(b"<title>none</title>"), None);
    }

    #[test]
    fn test_meta_beyond_scan_limit_is_ignored() {
        let mut html = vec![b' '; META_SCAN_LIMIT + 10];
        html.extend_from_slice(b"<meta charset=\"latin1\">");
        assert_eq!(charset_from_meta(&html), None);
    }

    #[test]
    fn test_cascade_priority() {
        let html = b"<meta charset=\"ISO-8859-1\"><p>x</p>";
        let resolved = resolve_charset(Some("text/html; charset=utf-8"), html);
        assert_eq!(resolved.label, "UTF-8");
        assert_eq!(resolved.source, CharsetSource::ContentType);

        let resolved = resolve_charset(Some("text/html"), html);
        assert_eq!(resolved.label, "ISO-8859-1");
        assert_eq!(resolved.source, CharsetSource::MetaTag);

        let resolved = resolve_charset(None, b"<p>x</p>");
        assert_eq!(resolved.label, "UTF-8");
        assert_eq!(resolved.source, CharsetSource::Default);
    }

    #[test]
    fn test_decode_utf8_borrows_and_strips_bom() {
        let decoded = decode_to_utf8(b"\xef\xbb\xbf<p>caf\xc3\xa9</p>", "UTF-8").unwrap();
        assert_eq!(decoded, "<p>café</p>");
        assert!(matches!(decode_to_utf8(b"<p>x</p>", "utf-8").unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode_latin1() {
        let decoded = decode_to_utf8(b"<p>caf\xe9</p>", "ISO-8859-1").unwrap();
        assert_eq!(decoded, "<p>café</p>");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_to_utf8(b"<p>\xff</p>", "UTF-8"),
            Err(ConversionError::EncodingError(_))
        ));
        assert!(matches!(
            decode_to_utf8(b"<p>x</p>", "x-not-a-charset"),
            Err(ConversionError::EncodingError(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_header_charset_wins_over_meta(
            header in prop::sample::select(vec!["utf-8", "iso-8859-1", "windows-1252", "shift_jis"]),
            meta in prop::sample::select(vec!["gb2312", "big5", "euc-kr"]),
        ) {
            let html = format!(r#"<html><head><meta charset="{meta}"></head></html>"#);
            let resolved = resolve_charset(Some(&format!("text/html; charset={header}")), html.as_bytes());
            prop_assert_eq!(resolved.label, header.to_uppercase());
            prop_assert_eq!(resolved.source, CharsetSource::ContentType);
        }
    }
}
