//! Tolerant extraction of image/text payloads from arbitrary provider JSON.
//!
//! Providers nest their payloads differently (and the set of providers
//! grows), so the normalizer walks any JSON value depth-first, preferring a
//! fixed set of well-known keys before scanning everything else.

use serde_json::Value;

/// Keys checked, in order, before falling back to a full scan of an object.
const IMAGE_KEYS: &[&str] = &[
    "imageUrl",
    "image_url",
    "url",
    "output_url",
    "output",
    "b64_json",
    "base64",
    "bytesBase64Encoded",
    "inlineData",
    "inline_data",
];

const BASE64_KEYS: &[&str] = &["b64_json", "base64", "bytesBase64Encoded"];

/// Keys whose value is a `{ mimeType, data }` wrapper object rather than a
/// bare payload string.
const INLINE_KEYS: &[&str] = &["inlineData", "inline_data"];

const TEXT_KEYS: &[&str] = &["responseText", "response_text", "content", "text", "output_text"];

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Extracts a single usable image reference from an arbitrary JSON value:
/// an `http(s)` URL, a `data:image/...` URL, or a base64 payload wrapped
/// into a `data:` URL.
pub fn extract_image(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => accept_url(s),
        Value::Array(items) => items.iter().find_map(extract_image),
        Value::Object(map) => {
            for key in IMAGE_KEYS {
                let Some(inner) = map.get(*key) else {
                    continue;
                };
                if BASE64_KEYS.contains(key) {
                    if let Some(data) = inner.as_str().filter(|s| !s.trim().is_empty()) {
                        let mime = declared_mime(map).unwrap_or(DEFAULT_IMAGE_MIME);
                        return Some(format!("data:{mime};base64,{data}"));
                    }
                    continue;
                }
                if INLINE_KEYS.contains(key) {
                    if let Some(wrapper) = inner.as_object() {
                        if let Some(data) = wrapper
                            .get("data")
                            .and_then(Value::as_str)
                            .filter(|s| !s.trim().is_empty())
                        {
                            let mime = declared_mime(wrapper).unwrap_or(DEFAULT_IMAGE_MIME);
                            return Some(format!("data:{mime};base64,{data}"));
                        }
                    }
                    continue;
                }
                if let Some(found) = extract_image(inner) {
                    return Some(found);
                }
            }
            map.iter()
                .filter(|(key, _)| !IMAGE_KEYS.contains(&key.as_str()))
                .find_map(|(_, inner)| extract_image(inner))
        }
        _ => None,
    }
}

/// Extracts the first non-empty text field from a nested response structure.
/// Strings are only accepted under a known text key (or as the whole value);
/// the fallback scan descends into containers without picking up incidental
/// strings such as role markers.
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| s.clone())
        }
        Value::Array(items) => items.iter().find_map(extract_text),
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(found) = map.get(*key).and_then(extract_text) {
                    return Some(found);
                }
            }
            map.iter()
                .filter(|(key, inner)| {
                    !TEXT_KEYS.contains(&key.as_str())
                        && (inner.is_object() || inner.is_array())
                })
                .find_map(|(_, inner)| extract_text(inner))
        }
        _ => None,
    }
}

/// A bare string is only accepted when it already is a usable image
/// reference; raw base64 without a declaring key is ignored.
fn accept_url(s: &str) -> Option<String> {
    let trimmed = s.trim();
    let usable = trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("data:image/");
    usable.then(|| trimmed.to_string())
}

fn declared_mime(map: &serde_json::Map<String, Value>) -> Option<&str> {
    for key in ["mimeType", "mime_type", "contentType", "content_type"] {
        if let Some(mime) = map.get(key).and_then(Value::as_str) {
            let mime = mime.trim();
            if !mime.is_empty() {
                return Some(mime);
            }
        }
    }
    None
}
