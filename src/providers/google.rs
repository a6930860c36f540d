use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::providers::GenerationBackend;
use crate::types::{GenerationInput, Payload, ProviderOutput};
use crate::utils::http::provider_error;
use crate::{AtelierError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini adapter. Single attempt, query-string key auth, and a response
/// modality hint asking for both text and image parts; whichever part comes
/// back first decides the payload.
#[derive(Clone)]
pub struct Gemini {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    default_params: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

impl Gemini {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: String::new(),
            default_params: Value::Object(Map::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_default_params(mut self, params: Value) -> Self {
        self.default_params = params;
        self
    }

    fn resolved_model(&self) -> &str {
        let model = self.model.trim();
        if model.is_empty() { DEFAULT_MODEL } else { model }
    }

    fn generate_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{base}/{path}:generateContent")
    }

    fn payload_from_parts(parts: &[Part]) -> Option<Payload> {
        for part in parts {
            if let Some(inline) = &part.inline_data {
                if !inline.data.trim().is_empty() {
                    let mime = inline
                        .mime_type
                        .as_deref()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or("image/png");
                    return Some(Payload::Image {
                        url: format!("data:{mime};base64,{}", inline.data),
                    });
                }
            }
        }
        for part in parts {
            if let Some(text) = part.text.as_deref().filter(|t| !t.trim().is_empty()) {
                return Some(Payload::Text { body: text.to_string() });
            }
        }
        None
    }
}

#[async_trait]
impl GenerationBackend for Gemini {
    fn provider(&self) -> &'static str {
        "Gemini"
    }

    fn model_id(&self) -> &str {
        self.model.as_str()
    }

    async fn generate_image(&self, request: &GenerationInput) -> Result<ProviderOutput> {
        let model = self.resolved_model().to_string();

        let mut generation_config = Map::new();
        generation_config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
        if let Some(params) = self.default_params.as_object() {
            for (key, value) in params {
                if key == "base_url" || generation_config.contains_key(key) {
                    continue;
                }
                generation_config.insert(key.clone(), value.clone());
            }
        }

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": Value::Object(generation_config),
        });

        let response = self
            .http
            .post(self.generate_url(&model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .timeout(GENERATION_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("Gemini", response).await);
        }

        let parsed = response.json::<GenerateContentResponse>().await?;
        let parts = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default();
        let payload = Self::payload_from_parts(parts).ok_or_else(|| {
            AtelierError::provider("Gemini response contained no image or text part", false)
        })?;

        Ok(ProviderOutput {
            payload,
            model_used: model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn input(prompt: &str) -> GenerationInput {
        GenerationInput {
            prompt: prompt.to_string(),
            size: "1024x1024".to_string(),
            source_image_url: None,
            context: Vec::new(),
        }
    }

    #[tokio::test]
    async fn inline_image_part_becomes_data_url() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash-exp:generateContent")
                    .query_param("key", "g-key")
                    .body_includes("responseModalities");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "candidates": [{
                            "content": {
                                "parts": [
                                    { "text": "" },
                                    { "inlineData": { "mimeType": "image/png", "data": "AQID" } }
                                ]
                            }
                        }]
                    }));
            })
            .await;

        let adapter = Gemini::new("g-key").with_base_url(server.url("/v1beta"));
        let output = adapter.generate_image(&input("a red sneaker")).await?;
        mock.assert_async().await;
        assert_eq!(
            output.payload,
            Payload::Image { url: "data:image/png;base64,AQID".to_string() }
        );
        assert_eq!(output.model_used, "gemini-2.0-flash-exp");
        Ok(())
    }

    #[tokio::test]
    async fn text_only_reply_is_returned_as_text() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_includes(":generateContent");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "candidates": [{
                            "content": { "parts": [{ "text": "try a walnut finish" }] }
                        }]
                    }));
            })
            .await;

        let adapter = Gemini::new("g-key").with_base_url(server.url("/v1beta"));
        let output = adapter.generate_image(&input("what finish suits this chair")).await?;
        assert_eq!(
            output.payload,
            Payload::Text { body: "try a walnut finish".to_string() }
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_candidates_fail_without_retry_flag() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_includes(":generateContent");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({ "candidates": [] }));
            })
            .await;

        let adapter = Gemini::new("g-key").with_base_url(server.url("/v1beta"));
        let err = adapter
            .generate_image(&input("a red sneaker"))
            .await
            .expect_err("no parts should be a provider failure");
        assert!(!err.retryable());
    }
}
