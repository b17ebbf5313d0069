//! Payload classification.
//!
//! Rules are tried in order and the first match wins:
//! empty → text, `{`/`[` document that parses as JSON → json,
//! well-formed XML → xml, valid UTF-8 → text, anything else → binary.

use crate::models::PayloadType;
use serde::de::IgnoredAny;

/// Classify a raw payload. Total and side-effect free.
pub fn classify(payload: &[u8]) -> PayloadType {
    if payload.is_empty() {
        return PayloadType::Text;
    }

    if is_json_document(payload) {
        return PayloadType::Json;
    }

    match std::str::from_utf8(payload) {
        Ok(text) if is_xml_document(text) => PayloadType::Xml,
        Ok(_) => PayloadType::Text,
        Err(_) => PayloadType::Binary,
    }
}

/// Only objects and arrays count; bare scalars such as `42` stay text.
fn is_json_document(payload: &[u8]) -> bool {
    matches!(payload.trim_ascii().first(), Some(b'{') | Some(b'['))
        && serde_json::from_slice::<IgnoredAny>(payload).is_ok()
}

/// DOCTYPE declarations are accepted; entities they declare are expanded by the parser.
fn is_xml_document(text: &str) -> bool {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text, options).is_ok()
}
