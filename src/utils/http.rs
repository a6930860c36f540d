use futures_util::StreamExt;
use serde_json::Value;

use crate::AtelierError;

const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Provider failure messages are compacted before they reach a user: long
/// payloads are capped and whitespace runs are collapsed.
pub(crate) const MAX_PROVIDER_MESSAGE_CHARS: usize = 320;

pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> String {
    let (bytes, truncated) = response_bytes_truncated(response, max_bytes).await;
    let mut body = String::from_utf8_lossy(&bytes).to_string();
    if truncated {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("...(truncated)");
    }
    body
}

async fn response_bytes_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let max_bytes = max_bytes.max(1);
    let mut out = Vec::<u8>::new();
    let mut truncated = false;

    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let Ok(chunk) = next else {
            break;
        };
        let remaining = max_bytes.saturating_sub(out.len());
        if remaining == 0 {
            truncated = true;
            break;
        }
        if chunk.len() <= remaining {
            out.extend_from_slice(chunk.as_ref());
        } else {
            out.extend_from_slice(&chunk.as_ref()[..remaining]);
            truncated = true;
            break;
        }
    }
    (out, truncated)
}

/// Collapses whitespace runs to single spaces and caps the message length.
pub(crate) fn compact_message(raw: &str) -> String {
    let mut out = String::new();
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        if out.chars().count() > MAX_PROVIDER_MESSAGE_CHARS {
            break;
        }
    }
    if out.chars().count() > MAX_PROVIDER_MESSAGE_CHARS {
        out = out.chars().take(MAX_PROVIDER_MESSAGE_CHARS).collect();
        out.push('…');
    }
    out
}

/// Turns a non-success provider response into a `Provider` error: retryable
/// on 5xx/429 or a provider-declared `server_error` type, with the body
/// compacted and the provider request id appended when present.
pub(crate) async fn provider_error(provider: &str, response: reqwest::Response) -> AtelierError {
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
    let declared_server_error = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/type")
                .and_then(Value::as_str)
                .map(|t| t == "server_error")
        })
        .unwrap_or(false);
    let retryable =
        status.as_u16() >= 500 || status.as_u16() == 429 || declared_server_error;

    let mut message = compact_message(&format!("{provider} error ({status}): {body}"));
    if let Some(id) = request_id {
        message.push_str(&format!(" [request-id: {id}]"));
    }
    AtelierError::Provider { message, retryable }
}
