//! Input classification before parsing
//!
//! Every conversion starts here. The classifier is a pure function of the
//! input bytes and decides whether the input is rejected outright, can take
//! the zero-parse plain text path, or needs a parser. Markup is graded by
//! risk so that the parser layer can go straight to the recovery strategy
//! for content the fast strategy is known not to handle.
//!
//! # Examples
//!
//! ```rust
//! use html_markdown_converter::classifier::{classify, InputClass, Risk};
//!
//! assert_eq!(classify(b"just words"), InputClass::PlainText);
//! assert_eq!(classify(b"<p>hi</p>"), InputClass::Markup(Risk::Ordinary));
//! assert_eq!(classify(b"<svg></svg>"), InputClass::Markup(Risk::Elevated));
//! assert!(matches!(classify(b"%PDF-1.7"), InputClass::Rejected(_)));
//! ```

/// Control characters may make up at most this share of the input (in percent)
const CONTROL_CHAR_PERCENT_LIMIT: usize = 10;

/// Recognized binary container signatures
const BINARY_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "PDF document"),
    (b"PK\x03\x04", "ZIP archive"),
    (b"\x1f\x8b", "gzip stream"),
    (b"\x89PNG\r\n\x1a\n", "PNG image"),
    (b"\xff\xd8\xff", "JPEG image"),
    (b"GIF87a", "GIF image"),
    (b"GIF89a", "GIF image"),
    (b"7z\xbc\xaf\x27\x1c", "7-Zip archive"),
    (b"Rar!\x1a\x07", "RAR archive"),
    (b"\x7fELF", "ELF executable"),
    (b"\x00asm", "WebAssembly module"),
];

/// Block magic following the bzip2 stream header
const BZIP2_BLOCK_MAGIC: &[u8] = b"\x31\x41\x59\x26\x53\x59";

/// Markers that send markup to the recovery parser
const ELEVATED_MARKERS: &[&[u8]] = &[
    b"<svg",
    b"<math",
    b"<template",
    b"<![cdata[",
    b"<frameset",
    b"<plaintext",
    b"<xmp",
];

/// How risky a markup input is for the fast parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Risk {
    /// Regular authoring patterns
    Ordinary,
    /// Foreign content, NUL bytes, or legacy raw-text constructs
    Elevated,
}

/// Outcome of classifying raw input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputClass {
    /// No markup delimiter at all
    PlainText,
    /// Needs parsing
    Markup(Risk),
    /// Not convertible; carries the reason
    Rejected(String),
}

/// Classify raw input bytes
///
/// Checks run in this order: UTF-16 byte order marks, binary signatures,
/// control character density, then the markup delimiter scan.
pub fn classify(input: &[u8]) -> InputClass {
    if input.starts_with(b"\xff\xfe") || input.starts_with(b"\xfe\xff") {
        return InputClass::Rejected("UTF-16 byte order mark detected".to_string());
    }

    if let Some(kind) = binary_signature(input) {
        return InputClass::Rejected(format!("binary content detected ({kind})"));
    }

    if is_webp(input) {
        return InputClass::Rejected("binary content detected (WebP image)".to_string());
    }

    let controls = input.iter().filter(|&&b| is_disallowed_control(b)).count();
    if controls > 0 && controls * 100 > input.len() * CONTROL_CHAR_PERCENT_LIMIT {
        return InputClass::Rejected(format!(
            "control characters make up {controls} of {} bytes",
            input.len()
        ));
    }

    if !input.contains(&b'<') {
        return InputClass::PlainText;
    }

    InputClass::Markup(assess_risk(input))
}

fn binary_signature(input: &[u8]) -> Option<&'static str> {
    if is_bzip2(input) {
        return Some("bzip2 stream");
    }
    BINARY_SIGNATURES
        .iter()
        .find(|(magic, _)| input.starts_with(magic))
        .map(|(_, kind)| *kind)
}

/// "BZh", a block size digit 1-9, then the block magic
fn is_bzip2(input: &[u8]) -> bool {
    input.len() >= 10
        && input.starts_with(b"BZh")
        && (b'1'..=b'9').contains(&input[3])
        && &input[4..10] == BZIP2_BLOCK_MAGIC
}

fn is_webp(input: &[u8]) -> bool {
    input.len() >= 12 && input.starts_with(b"RIFF") && &input[8..12] == b"WEBP"
}

fn is_disallowed_control(byte: u8) -> bool {
    matches!(byte, 0x00..=0x08 | 0x0b | 0x0e..=0x1f | 0x7f)
}

fn assess_risk(input: &[u8]) -> Risk {
    if input.contains(&0) {
        return Risk::Elevated;
    }

    let elevated = input
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] == b'<' && (pair[1].is_ascii_alphabetic() || pair[1] == b'!'))
        .any(|(start, _)| {
            ELEVATED_MARKERS
                .iter()
                .any(|marker| starts_with_ignore_case(&input[start..], marker))
        });

    if elevated {
        Risk::Elevated
    } else {
        Risk::Ordinary
    }
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}
