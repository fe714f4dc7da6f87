//! FFI integration tests
//!
//! These tests exercise the C entry points the way a binding layer would:
//! raw pointers in, `MarkdownResult` out, and every result released with
//! `markdown_result_free`.

use html_markdown_converter::ffi::*;
use proptest::prelude::*;
use std::ffi::c_void;
use std::ptr;
use std::slice;

fn ffi_convert(html: &[u8], options: &MarkdownOptions) -> MarkdownResult {
    let mut result = MarkdownResult::default();
    unsafe { markdown_convert(html.as_ptr(), html.len(), options, &mut result) };
    result
}

fn ffi_convert_with_metadata(html: &[u8], options: &MarkdownOptions) -> MarkdownResult {
    let mut result = MarkdownResult::default();
    unsafe { markdown_convert_with_metadata(html.as_ptr(), html.len(), options, &mut result) };
    result
}

fn ffi_convert_with_visitor(id: u64, html: &[u8], options: &MarkdownOptions) -> MarkdownResult {
    let mut result = MarkdownResult::default();
    unsafe { markdown_convert_with_visitor(id, html.as_ptr(), html.len(), options, &mut result) };
    result
}

fn ffi_result_free(result: &mut MarkdownResult) {
    unsafe { markdown_result_free(result) }
}

fn ffi_default_options() -> MarkdownOptions {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut options = MarkdownOptions::default();
    unsafe { markdown_options_default(&mut options) };
    options
}

fn read_bytes(ptr: *const u8, len: usize) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let bytes = unsafe { slice::from_raw_parts(ptr, len) };
    String::from_utf8(bytes.to_vec()).expect("FFI strings are UTF-8")
}

fn markdown_of(result: &MarkdownResult) -> String {
    read_bytes(result.markdown, result.markdown_len)
}

fn error_of(result: &MarkdownResult) -> String {
    read_bytes(result.error_message, result.error_len)
}

#[test]
fn test_basic_conversion() {
    let options = ffi_default_options();
    let mut result = ffi_convert(b"<h1>Title</h1><p>Hello   world</p>", &options);

    assert_eq!(result.error_code, ERROR_SUCCESS);
    assert!(result.error_message.is_null());
    assert!(result.metadata_json.is_null());
    assert_eq!(markdown_of(&result), "# Title\n\nHello world\n");

    ffi_result_free(&mut result);
    assert!(result.markdown.is_null());
    assert_eq!(result.markdown_len, 0);
}

#[test]
fn test_free_is_idempotent() {
    let options = ffi_default_options();
    let mut result = ffi_convert(b"<p>x</p>", &options);
    ffi_result_free(&mut result);
    ffi_result_free(&mut result);
    unsafe { markdown_result_free(ptr::null_mut()) };
}

#[test]
fn test_empty_input() {
    let options = ffi_default_options();
    let mut result = MarkdownResult::default();
    unsafe { markdown_convert(ptr::null(), 0, &options, &mut result) };

    assert_eq!(result.error_code, ERROR_SUCCESS);
    assert!(result.markdown.is_null());
    assert_eq!(result.markdown_len, 0);
    ffi_result_free(&mut result);
}

#[test]
fn test_null_html_with_length() {
    let options = ffi_default_options();
    let mut result = MarkdownResult::default();
    unsafe { markdown_convert(ptr::null(), 10, &options, &mut result) };

    assert_eq!(result.error_code, ERROR_INVALID_INPUT);
    assert!(error_of(&result).contains("HTML pointer is NULL"));
    ffi_result_free(&mut result);
}

#[test]
fn test_null_result_is_noop() {
    let options = ffi_default_options();
    let html = b"<p>x</p>";
    unsafe { markdown_convert(html.as_ptr(), html.len(), &options, ptr::null_mut()) };
}

#[test]
fn test_option_codes() {
    let options = MarkdownOptions {
        whitespace_mode: 1,
        ..ffi_default_options()
    };
    let mut result = ffi_convert(b"<p>a   b</p>", &options);
    assert_eq!(markdown_of(&result), "a   b\n");
    ffi_result_free(&mut result);

    let options = MarkdownOptions {
        preprocessing_preset: 7,
        ..ffi_default_options()
    };
    let mut result = ffi_convert(b"<p>x</p>", &options);
    assert_eq!(result.error_code, ERROR_INVALID_INPUT);
    assert!(error_of(&result).contains("preprocessing_preset"));
    ffi_result_free(&mut result);
}

#[test]
fn test_formatting_fields() {
    let bullets = "*+";
    let language = "text";
    let options = MarkdownOptions {
        heading_style: 2,
        bullets: bullets.as_ptr(),
        bullets_len: bullets.len(),
        list_indent_tabs: 1,
        code_block_style: 1,
        default_code_language: language.as_ptr(),
        default_code_language_len: language.len(),
        ..ffi_default_options()
    };
    let html = b"<h1>Top</h1><ul><li>a<ul><li>b</li></ul></li></ul><pre>a\nb</pre>";
    let mut result = ffi_convert(html, &options);
    assert_eq!(result.error_code, ERROR_SUCCESS);
    assert_eq!(markdown_of(&result), "Top\n===\n\n* a\n\t+ b\n\n~~~text\na\nb\n~~~\n");
    ffi_result_free(&mut result);

    let options = MarkdownOptions {
        code_block_style: 3,
        ..ffi_default_options()
    };
    let mut result = ffi_convert(b"<p>x</p>", &options);
    assert_eq!(result.error_code, ERROR_INVALID_INPUT);
    assert!(error_of(&result).contains("code_block_style"));
    ffi_result_free(&mut result);
}

#[test]
fn test_tag_lists_and_image_skipping() {
    let strip = "a";
    let preserve = " TABLE ,";
    let options = MarkdownOptions {
        strip_tags: strip.as_ptr(),
        strip_tags_len: strip.len(),
        preserve_tags: preserve.as_ptr(),
        preserve_tags_len: preserve.len(),
        ..ffi_default_options()
    };
    let html = br#"<p><a href="/x">link</a></p><table><tr><td>c</td></tr></table>"#;
    let mut result = ffi_convert(html, &options);
    assert_eq!(markdown_of(&result), "link\n\n<table><tr><td>c</td></tr></table>\n");
    ffi_result_free(&mut result);

    let options = MarkdownOptions {
        skip_images: 1,
        ..ffi_default_options()
    };
    let mut result = ffi_convert(br#"<p>x <img src="a.png"></p>"#, &options);
    assert_eq!(markdown_of(&result), "x\n");
    ffi_result_free(&mut result);
}

#[test]
fn test_preprocessing_overrides_preset() {
    let html = br#"<nav><a href="/">Home</a></nav><p>Body</p>"#;
    let options = MarkdownOptions {
        preprocessing_override_mask: PREPROCESS_REMOVE_NAVIGATION,
        preprocessing_override_values: PREPROCESS_REMOVE_NAVIGATION,
        ..ffi_default_options()
    };
    let mut result = ffi_convert(html, &options);
    assert_eq!(markdown_of(&result), "Body\n");
    ffi_result_free(&mut result);

    // Values outside the mask are ignored
    let options = MarkdownOptions {
        preprocessing_override_values: PREPROCESS_REMOVE_NAVIGATION,
        ..ffi_default_options()
    };
    let mut result = ffi_convert(html, &options);
    assert_eq!(markdown_of(&result), "[Home](/)\n\nBody\n");
    ffi_result_free(&mut result);
}

#[test]
fn test_oversized_structured_data_can_fail() {
    let html = br#"<script type="application/ld+json">{"@type":"Thing","name":"a long enough name"}</script><p>x</p>"#;
    let options = MarkdownOptions {
        max_structured_data_size: 16,
        fail_on_oversized_structured_data: 1,
        ..ffi_default_options()
    };
    let mut result = ffi_convert_with_metadata(html, &options);
    assert_eq!(result.error_code, ERROR_RESOURCE_LIMIT);
    assert!(result.metadata_json.is_null());
    ffi_result_free(&mut result);

    let options = MarkdownOptions {
        max_structured_data_size: 16,
        ..ffi_default_options()
    };
    let mut result = ffi_convert_with_metadata(html, &options);
    assert_eq!(result.error_code, ERROR_SUCCESS);
    let json = read_bytes(result.metadata_json, result.metadata_json_len);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["structured_data"][0]["truncated"], true);
    ffi_result_free(&mut result);
}

#[test]
fn test_rejected_input_error_code() {
    let options = ffi_default_options();
    let mut result = ffi_convert(b"\x89PNG\r\n\x1a\n\x00\x00", &options);
    assert_eq!(result.error_code, ERROR_INVALID_INPUT);
    assert!(result.markdown.is_null());
    assert!(!result.error_message.is_null());
    ffi_result_free(&mut result);
}

#[test]
fn test_invalid_content_type_utf8() {
    let content_type = b"text/html; charset=\xff";
    let options = MarkdownOptions {
        content_type: content_type.as_ptr(),
        content_type_len: content_type.len(),
        ..ffi_default_options()
    };
    let mut result = ffi_convert(b"<p>x</p>", &options);
    assert_eq!(result.error_code, ERROR_INVALID_INPUT);
    assert!(error_of(&result).contains("content_type"));
    ffi_result_free(&mut result);
}

#[test]
fn test_metadata_json() {
    let base_url = "https://docs.test/start";
    let options = MarkdownOptions {
        base_url: base_url.as_ptr(),
        base_url_len: base_url.len(),
        ..ffi_default_options()
    };
    let html = br#"<title>Docs</title><h1>Intro</h1><p><a href="https://docs.test/next">next</a></p>"#;
    let mut result = ffi_convert_with_metadata(html, &options);

    assert_eq!(result.error_code, ERROR_SUCCESS);
    assert_eq!(markdown_of(&result), "# Intro\n\n[next](https://docs.test/next)\n");

    let json = read_bytes(result.metadata_json, result.metadata_json_len);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["document"]["title"], "Docs");
    assert_eq!(value["headers"][0]["text"], "Intro");
    assert_eq!(value["links"][0]["link_type"], "internal");

    ffi_result_free(&mut result);
    assert!(result.metadata_json.is_null());
}

#[test]
fn test_metadata_flags_select_categories() {
    let options = MarkdownOptions {
        metadata_flags: METADATA_HEADERS,
        ..ffi_default_options()
    };
    let html = br#"<title>Docs</title><h1>Intro</h1><p><a href="/x">x</a></p>"#;
    let mut result = ffi_convert_with_metadata(html, &options);

    let json = read_bytes(result.metadata_json, result.metadata_json_len);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["headers"].as_array().map(Vec::len), Some(1));
    assert_eq!(value["links"].as_array().map(Vec::len), Some(0));
    assert!(value["document"]["title"].is_null());
    ffi_result_free(&mut result);
}

// ----------------------------------------------------------------------------
// Visitor callbacks
// ----------------------------------------------------------------------------

/// Collects events into the `Vec` behind `user_data`
unsafe extern "C" fn record_events(
    user_data: *mut c_void,
    event: VisitEvent,
    ctx: *const FfiNodeContext,
    _payload: *const FfiVisitPayload,
    _out: *mut FfiVisitResult,
) {
    let events = unsafe { &mut *(user_data as *mut Vec<(VisitEvent, FfiNodeType)>) };
    let ctx = unsafe { &*ctx };
    events.push((event, ctx.node_type));
}

type PayloadRecord = (VisitEvent, Option<String>, Option<String>, Option<String>);

fn optional_text(ptr: *const u8, len: usize) -> Option<String> {
    (!ptr.is_null()).then(|| read_bytes(ptr, len))
}

/// Records the string slots of link, image and input events
unsafe extern "C" fn record_payloads(
    user_data: *mut c_void,
    event: VisitEvent,
    _ctx: *const FfiNodeContext,
    payload: *const FfiVisitPayload,
    _out: *mut FfiVisitResult,
) {
    if !matches!(event, VisitEvent::Link | VisitEvent::Image | VisitEvent::Input) {
        return;
    }
    let records = unsafe { &mut *(user_data as *mut Vec<PayloadRecord>) };
    let payload = unsafe { &*payload };
    records.push((
        event,
        optional_text(payload.text, payload.text_len),
        optional_text(payload.detail, payload.detail_len),
        optional_text(payload.extra, payload.extra_len),
    ));
}

/// Replaces link output with `<href>`, fails on text containing "boom"
unsafe extern "C" fn rewrite_links(
    _user_data: *mut c_void,
    event: VisitEvent,
    _ctx: *const FfiNodeContext,
    payload: *const FfiVisitPayload,
    out: *mut FfiVisitResult,
) {
    let payload = unsafe { &*payload };
    let text = if payload.text.is_null() {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(payload.text, payload.text_len) }
    };

    match event {
        VisitEvent::Link => {
            let replacement = format!("<{}>", String::from_utf8_lossy(text));
            unsafe {
                (*out).result_type = VisitResultType::Custom as u32;
                markdown_visit_result_set_output(out, replacement.as_ptr(), replacement.len());
            }
        }
        VisitEvent::Text if text.windows(4).any(|w| w == b"boom") => {
            let message = b"text rejected";
            unsafe {
                (*out).result_type = VisitResultType::Error as u32;
                markdown_visit_result_set_output(out, message.as_ptr(), message.len());
            }
        }
        VisitEvent::Image => unsafe { (*out).result_type = VisitResultType::Skip as u32 },
        _ => {}
    }
}

#[test]
fn test_register_rejects_bad_callbacks() {
    assert_eq!(unsafe { markdown_visitor_register(0xbad0, ptr::null()) }, ERROR_INVALID_INPUT);

    let callbacks = FfiVisitorCallbacks {
        user_data: ptr::null_mut(),
        dispatch: None,
    };
    assert_eq!(unsafe { markdown_visitor_register(0xbad1, &callbacks) }, ERROR_INVALID_INPUT);
}

#[test]
fn test_visitor_events_reach_callback() {
    let id = 0xf00d_0001;
    let mut events: Vec<(VisitEvent, FfiNodeType)> = Vec::new();
    let callbacks = FfiVisitorCallbacks {
        user_data: &mut events as *mut _ as *mut c_void,
        dispatch: Some(record_events),
    };
    assert_eq!(unsafe { markdown_visitor_register(id, &callbacks) }, ERROR_SUCCESS);

    let mut result = ffi_convert_with_visitor(id, b"<h2>Hi</h2>", &ffi_default_options());
    assert_eq!(result.error_code, ERROR_SUCCESS);
    assert_eq!(markdown_of(&result), "## Hi\n");
    ffi_result_free(&mut result);
    assert_eq!(markdown_visitor_unregister(id), 1);

    assert_eq!(
        events,
        vec![
            (VisitEvent::ElementStart, FfiNodeType::Heading),
            (VisitEvent::Text, FfiNodeType::Text),
            (VisitEvent::Heading, FfiNodeType::Heading),
            (VisitEvent::ElementEnd, FfiNodeType::Heading),
        ]
    );
}

#[test]
fn test_visitor_payload_carries_titles_and_values() {
    let id = 0xf00d_0003;
    let mut records: Vec<PayloadRecord> = Vec::new();
    let callbacks = FfiVisitorCallbacks {
        user_data: &mut records as *mut _ as *mut c_void,
        dispatch: Some(record_payloads),
    };
    assert_eq!(unsafe { markdown_visitor_register(id, &callbacks) }, ERROR_SUCCESS);

    let html = br#"<p><a href="/x" title="Next page">go</a> <a href="/y">plain</a> <img src="i.png" alt="pic" title="Photo"> <input type="text" name="q" value="rust"></p>"#;
    let mut result = ffi_convert_with_visitor(id, html, &ffi_default_options());
    assert_eq!(result.error_code, ERROR_SUCCESS);
    ffi_result_free(&mut result);
    assert_eq!(markdown_visitor_unregister(id), 1);

    let some = |s: &str| Some(s.to_string());
    assert_eq!(
        records,
        vec![
            (VisitEvent::Link, some("/x"), some("go"), some("Next page")),
            (VisitEvent::Link, some("/y"), some("plain"), None),
            (VisitEvent::Image, some("i.png"), some("pic"), some("Photo")),
            (VisitEvent::Input, some("text"), some("q"), some("rust")),
        ]
    );
}

#[test]
fn test_visitor_results_shape_output() {
    let id = 0xf00d_0002;
    let callbacks = FfiVisitorCallbacks {
        user_data: ptr::null_mut(),
        dispatch: Some(rewrite_links),
    };
    assert_eq!(unsafe { markdown_visitor_register(id, &callbacks) }, ERROR_SUCCESS);
    assert_eq!(unsafe { markdown_visitor_register(id, &callbacks) }, ERROR_INVALID_INPUT);

    let options = ffi_default_options();
    let mut result = ffi_convert_with_visitor(id, br#"<p>Go <a href="/x">there</a> <img src="i.png"></p>"#, &options);
    assert_eq!(result.error_code, ERROR_SUCCESS);
    assert_eq!(markdown_of(&result), "Go </x>\n");
    ffi_result_free(&mut result);

    let mut result = ffi_convert_with_visitor(id, b"<p>fine</p><p>boom</p>", &options);
    assert_eq!(result.error_code, ERROR_VISITOR_ABORTED);
    assert!(result.markdown.is_null());
    assert_eq!(error_of(&result), "text rejected");
    ffi_result_free(&mut result);

    assert_eq!(markdown_visitor_unregister(id), 1);
    assert_eq!(markdown_visitor_unregister(id), 0);
}

#[test]
fn test_unknown_visitor_id() {
    let mut result = ffi_convert_with_visitor(0xdead_beef, b"<p>x</p>", &ffi_default_options());
    assert_eq!(result.error_code, ERROR_INVALID_INPUT);
    assert!(error_of(&result).contains("no visitor registered"));
    ffi_result_free(&mut result);
}

proptest! {
    #[test]
    fn prop_success_and_error_fields_are_exclusive(text in "[a-z<>/ ]{0,40}") {
        let options = ffi_default_options();
        let mut result = ffi_convert(text.as_bytes(), &options);
        if result.error_code == ERROR_SUCCESS {
            prop_assert!(result.error_message.is_null());
        } else {
            prop_assert!(result.markdown.is_null());
            prop_assert!(!result.error_message.is_null());
        }
        ffi_result_free(&mut result);
        prop_assert!(result.markdown.is_null());
        prop_assert!(result.error_message.is_null());
    }
}
