use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use crate::extract::extract_image;
use crate::providers::GenerationBackend;
use crate::types::{GenerationInput, Payload, ProviderOutput};
use crate::utils::http::provider_error;
use crate::{AtelierError, Result};

const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Operator-configured HTTP adapter. Endpoint, method, headers, and body
/// template all come from the organization's `default_params`; the body
/// supports `{{prompt}}`, `{{size}}`, `{{model}}`, and `{{api_key}}`
/// placeholders recursively through nested JSON.
#[derive(Clone)]
pub struct CustomHttp {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    method: reqwest::Method,
    headers: BTreeMap<String, String>,
    body_template: Option<Value>,
}

impl std::fmt::Debug for CustomHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomHttp")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl CustomHttp {
    pub fn from_params(
        api_key: impl Into<String>,
        model: impl Into<String>,
        params: &Value,
    ) -> Result<Self> {
        let endpoint = params
            .get("endpoint")
            .or_else(|| params.get("url"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AtelierError::provider(
                    "Custom provider has no endpoint configured in default_params",
                    false,
                )
            })?
            .to_string();

        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("POST")
            .to_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|_| {
                AtelierError::provider("Custom provider method is not a valid HTTP method", false)
            })?;

        let mut headers = BTreeMap::new();
        if let Some(map) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in map {
                if let Some(value) = value.as_str() {
                    headers.insert(name.clone(), value.to_string());
                }
            }
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            endpoint,
            method,
            headers,
            body_template: params.get("body").cloned(),
        })
    }

    fn substitutions<'a>(&'a self, request: &'a GenerationInput) -> [(&'static str, &'a str); 4] {
        [
            ("{{prompt}}", request.prompt.as_str()),
            ("{{size}}", request.size.as_str()),
            ("{{model}}", self.model.as_str()),
            ("{{api_key}}", self.api_key.as_str()),
        ]
    }

    async fn interpret_response(&self, response: reqwest::Response) -> Result<Payload> {
        if !response.status().is_success() {
            return Err(provider_error("Custom", response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if content_type.starts_with("image/") {
            let mime = content_type
                .split(';')
                .next()
                .unwrap_or("image/png")
                .trim()
                .to_string();
            let bytes = response.bytes().await?;
            let encoded = BASE64.encode(&bytes);
            return Ok(Payload::Image {
                url: format!("data:{mime};base64,{encoded}"),
            });
        }

        let body = response.text().await?;
        if content_type.contains("json") {
            let value = serde_json::from_str::<Value>(&body)?;
            let url = extract_image(&value).ok_or_else(|| {
                AtelierError::provider("Custom provider response contained no image", false)
            })?;
            return Ok(Payload::Image { url });
        }

        // Last resort: scan the raw text body for something image-shaped.
        scan_text_for_url(&body)
            .map(|url| Payload::Image { url })
            .ok_or_else(|| {
                AtelierError::provider("Custom provider response contained no image", false)
            })
    }
}

/// Applies placeholder substitution recursively through strings, arrays,
/// and object values.
fn substitute(value: &Value, vars: &[(&str, &str)]) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for (placeholder, replacement) in vars {
                if out.contains(placeholder) {
                    out = out.replace(placeholder, replacement);
                }
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                out.insert(key.clone(), substitute(inner, vars));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn scan_text_for_url(body: &str) -> Option<String> {
    for token in body.split_whitespace() {
        let token = token.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ')' | '('));
        if token.starts_with("http://")
            || token.starts_with("https://")
            || token.starts_with("data:image/")
        {
            return Some(token.to_string());
        }
    }
    None
}

#[async_trait]
impl GenerationBackend for CustomHttp {
    fn provider(&self) -> &'static str {
        "Custom"
    }

    fn model_id(&self) -> &str {
        self.model.as_str()
    }

    async fn generate_image(&self, request: &GenerationInput) -> Result<ProviderOutput> {
        let vars = self.substitutions(request);

        let mut req = self.http.request(self.method.clone(), &self.endpoint);
        for (name, value) in &self.headers {
            let mut rendered = value.clone();
            for (placeholder, replacement) in &vars {
                rendered = rendered.replace(placeholder, replacement);
            }
            req = req.header(name, rendered);
        }
        if let Some(template) = &self.body_template {
            req = req.json(&substitute(template, &vars));
        }

        let response = req.timeout(GENERATION_TIMEOUT).send().await?;
        let payload = self.interpret_response(response).await?;
        Ok(ProviderOutput {
            payload,
            model_used: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn input(prompt: &str) -> GenerationInput {
        GenerationInput {
            prompt: prompt.to_string(),
            size: "1024x1024".to_string(),
            source_image_url: None,
            context: Vec::new(),
        }
    }

    #[test]
    fn substitution_recurses_through_nested_values() {
        let template = json!({
            "prompt": "{{prompt}}",
            "options": { "size": "{{size}}", "model": "{{model}}" },
            "tags": ["{{prompt}}", "fixed"],
            "steps": 30
        });
        let rendered = substitute(
            &template,
            &[
                ("{{prompt}}", "a red sneaker"),
                ("{{size}}", "1024x1024"),
                ("{{model}}", "my-model"),
            ],
        );
        assert_eq!(
            rendered,
            json!({
                "prompt": "a red sneaker",
                "options": { "size": "1024x1024", "model": "my-model" },
                "tags": ["a red sneaker", "fixed"],
                "steps": 30
            })
        );
    }

    #[test]
    fn debug_output_redacts_the_key() -> Result<()> {
        let params = json!({ "endpoint": "https://images.internal/generate" });
        let adapter = CustomHttp::from_params("sk-secret", "house-model", &params)?;
        let rendered = format!("{adapter:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn missing_endpoint_is_a_configuration_failure() {
        let err = CustomHttp::from_params("key", "model", &json!({ "method": "POST" }))
            .expect_err("endpoint is required");
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn json_response_is_normalized() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/generate")
                    .header("x-api-key", "secret-key")
                    .body_includes("\"prompt\":\"a red sneaker\"")
                    .body_includes("\"size\":\"1024x1024\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "result": { "image_url": "https://cdn.example.com/x.png" } }));
            })
            .await;

        let params = json!({
            "endpoint": server.url("/generate"),
            "headers": { "x-api-key": "{{api_key}}" },
            "body": { "prompt": "{{prompt}}", "size": "{{size}}" }
        });
        let adapter = CustomHttp::from_params("secret-key", "house-model", &params)?;
        let output = adapter.generate_image(&input("a red sneaker")).await?;

        mock.assert_async().await;
        assert_eq!(
            output.payload,
            Payload::Image { url: "https://cdn.example.com/x.png".to_string() }
        );
        assert_eq!(output.model_used, "house-model");
        Ok(())
    }

    #[tokio::test]
    async fn raw_image_bytes_become_a_data_url() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200)
                    .header("content-type", "image/png")
                    .body(vec![1u8, 2, 3, 4]);
            })
            .await;

        let params = json!({ "endpoint": server.url("/generate"), "body": {} });
        let adapter = CustomHttp::from_params("k", "m", &params)?;
        let output = adapter.generate_image(&input("a red sneaker")).await?;
        assert_eq!(
            output.payload,
            Payload::Image { url: "data:image/png;base64,AQIDBA==".to_string() }
        );
        Ok(())
    }

    #[tokio::test]
    async fn plain_text_body_is_scanned_for_a_url() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/generate");
                then.status(200)
                    .header("content-type", "text/plain")
                    .body("done: https://cdn.example.com/scan.png (cached)");
            })
            .await;

        let params = json!({ "endpoint": server.url("/generate"), "body": {} });
        let adapter = CustomHttp::from_params("k", "m", &params)?;
        let output = adapter.generate_image(&input("a red sneaker")).await?;
        assert_eq!(
            output.payload,
            Payload::Image { url: "https://cdn.example.com/scan.png".to_string() }
        );
        Ok(())
    }
}
