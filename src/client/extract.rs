//! Shape-tolerant extraction of Markdown from docling-serve responses.
//!
//! The service has answered conversions in at least three layouts:
//!
//! ```text
//! {"document": {"md_content": "..."}}     current
//! {"document": {"content": "..."}}        intermediate
//! {"content": "..."}                      legacy
//! [ <any of the above> ]                  list-of-one
//! ```
//!
//! Each layout is one entry in [`EXTRACTORS`]; they are tried in order
//! against the response object (or the first list element) and the first
//! non-empty string wins. A new layout is a new entry, nothing else.

use serde_json::{Map, Value};

type Extractor = fn(&Map<String, Value>) -> Option<&str>;

/// Ordered list of `(name, extractor)` pairs.
pub const EXTRACTORS: &[(&str, Extractor)] = &[
    ("document.md_content", document_md_content),
    ("document.content", document_content),
    ("content", top_level_content),
];

fn document_md_content(obj: &Map<String, Value>) -> Option<&str> {
    obj.get("document")?.get("md_content")?.as_str()
}

fn document_content(obj: &Map<String, Value>) -> Option<&str> {
    obj.get("document")?.get("content")?.as_str()
}

fn top_level_content(obj: &Map<String, Value>) -> Option<&str> {
    obj.get("content")?.as_str()
}

/// Result of running the extractors over a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// An object or list. `content` may be empty when no extractor matched.
    Content(String),
    /// A scalar (string, number, bool, null); not a response layout we know.
    Unrecognized,
}

/// The object the extractors look at: the body itself, or its first element.
fn result_object(body: &Value) -> Option<&Map<String, Value>> {
    match body {
        Value::Object(obj) => Some(obj),
        Value::Array(items) => items.first()?.as_object(),
        _ => None,
    }
}

/// Run [`EXTRACTORS`] over `body`.
///
/// Any object or list counts as recognised, even when nothing textual is
/// found in it; an empty document and an unexpected object are
/// indistinguishable here, so both come back as empty content.
pub fn extract_content(body: &Value) -> Extracted {
    if !matches!(body, Value::Object(_) | Value::Array(_)) {
        return Extracted::Unrecognized;
    }
    let content = result_object(body)
        .and_then(|obj| {
            EXTRACTORS
                .iter()
                .filter_map(|(_, extract)| extract(obj))
                .find(|s| !s.is_empty())
        })
        .unwrap_or_default();
    Extracted::Content(content.to_string())
}

/// `format` field of the body (or its first element), if present.
pub fn extract_format(body: &Value) -> Option<String> {
    result_object(body)?
        .get("format")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content_of(body: Value) -> String {
        match extract_content(&body) {
            Extracted::Content(s) => s,
            Extracted::Unrecognized => panic!("unrecognized: {body}"),
        }
    }

    #[test]
    fn all_six_layouts_yield_the_text() {
        let shapes = [
            json!({"document": {"md_content": "X"}}),
            json!({"document": {"content": "X"}}),
            json!({"content": "X"}),
        ];
        for shape in shapes {
            assert_eq!(content_of(shape.clone()), "X", "object: {shape}");
            assert_eq!(content_of(json!([shape.clone()])), "X", "list: {shape}");
        }
    }

    #[test]
    fn md_content_wins_over_content() {
        let body = json!({"document": {"md_content": "primary", "content": "fallback"}});
        assert_eq!(content_of(body), "primary");
    }

    #[test]
    fn empty_primary_falls_through() {
        let body = json!({"document": {"md_content": "", "content": "fallback"}});
        assert_eq!(content_of(body), "fallback");

        let body = json!({"document": {"md_content": ""}, "content": "legacy"});
        assert_eq!(content_of(body), "legacy");
    }

    #[test]
    fn non_string_fields_are_ignored() {
        let body = json!({"document": {"md_content": null, "content": 7}, "content": "ok"});
        assert_eq!(content_of(body), "ok");
    }

    #[test]
    fn recognised_but_empty() {
        assert_eq!(content_of(json!({})), "");
        assert_eq!(content_of(json!([])), "");
        assert_eq!(content_of(json!({"status": "success"})), "");
        assert_eq!(content_of(json!(["not an object"])), "");
    }

    #[test]
    fn scalars_are_unrecognized() {
        assert_eq!(extract_content(&json!("text")), Extracted::Unrecognized);
        assert_eq!(extract_content(&json!(42)), Extracted::Unrecognized);
        assert_eq!(extract_content(&Value::Null), Extracted::Unrecognized);
    }

    #[test]
    fn format_from_object_or_first_item() {
        assert_eq!(extract_format(&json!({"format": "html"})).as_deref(), Some("html"));
        assert_eq!(extract_format(&json!([{"format": "json"}])).as_deref(), Some("json"));
        assert_eq!(extract_format(&json!({"content": "x"})), None);
        assert_eq!(extract_format(&json!("md")), None);
    }
}
