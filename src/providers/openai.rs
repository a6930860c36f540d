use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use crate::extract::{extract_image, extract_text};
use crate::intent::{ClassifySkip, Intent};
use crate::providers::GenerationBackend;
use crate::retry::RetryPolicy;
use crate::types::{ContextMessage, ContextRole, GenerationInput, Payload, ProviderOutput};
use crate::utils::http::provider_error;
use crate::{AtelierError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";

const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
const CHAT_TIMEOUT: Duration = Duration::from_secs(30);
const SOURCE_FETCH_TIMEOUT: Duration = Duration::from_secs(45);
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(20);

/// Prepended to edit prompts unless the prompt itself asks for a full
/// redesign; keeps the source image's framing intact for small changes.
const EDIT_PRESERVE_PREFIX: &str = "Preserve the original composition, background, and lighting \
of the source image; apply only the requested change:";

const REDESIGN_SIGNALS: &[&str] = &["redesign", "from scratch", "reimagine", "start over"];

const TEXT_SYSTEM_PROMPT: &str = "You are a design advisor inside a product review workspace. \
Structure every answer with short headed sections and bullet or numbered lists.";

const CLASSIFY_SYSTEM_PROMPT: &str = "Decide whether the user's latest message asks for an \
image to be generated or for a text answer. Respond with exactly one word: IMAGE or TEXT.";

/// OpenAI adapter. Covers three calls against the same API surface: image
/// generation (JSON), image edits (multipart with the source image binary),
/// and chat completions for text answers and intent classification.
#[derive(Clone)]
pub struct OpenAi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    default_params: Value,
    retry: RetryPolicy,
}

impl OpenAi {
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
            retry: RetryPolicy::standard(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
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

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn bearer(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.api_key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn looks_image_capable(model: &str) -> bool {
        let model = model.to_lowercase();
        model.contains("image") || model.contains("dall-e")
    }

    /// The configured model when it is image-capable, otherwise the stock
    /// image model.
    fn image_model(&self) -> &str {
        let model = self.model.trim();
        if model.is_empty() || !Self::looks_image_capable(model) {
            DEFAULT_IMAGE_MODEL
        } else {
            model
        }
    }

    /// The configured model unless it is image-only, in which case the
    /// stock text model is substituted.
    fn text_model(&self) -> &str {
        let model = self.model.trim();
        if model.is_empty() || Self::looks_image_capable(model) {
            DEFAULT_TEXT_MODEL
        } else {
            model
        }
    }

    fn merge_default_params(&self, body: &mut Map<String, Value>) {
        let Some(params) = self.default_params.as_object() else {
            return;
        };
        for (key, value) in params {
            if key == "base_url" || body.contains_key(key) {
                continue;
            }
            body.insert(key.clone(), value.clone());
        }
    }

    async fn read_image_response(&self, response: reqwest::Response) -> Result<Payload> {
        if !response.status().is_success() {
            return Err(provider_error("OpenAI", response).await);
        }
        let value = response.json::<Value>().await?;
        let url = extract_image(&value).ok_or_else(|| {
            AtelierError::provider("OpenAI response contained no image", false)
        })?;
        Ok(Payload::Image { url })
    }

    /// Resolves the source image to raw bytes plus a MIME type: inline
    /// `data:` URLs are decoded, http(s) URLs are fetched.
    async fn fetch_source_image(&self, source: &str) -> Result<(Vec<u8>, String)> {
        if let Some(rest) = source.strip_prefix("data:") {
            let (meta, payload) = rest.split_once(',').ok_or_else(|| {
                AtelierError::InvalidRequest("malformed data URL in sourceImageUrl".into())
            })?;
            if !meta.contains("base64") {
                return Err(AtelierError::InvalidRequest(
                    "sourceImageUrl data URL must be base64-encoded".into(),
                ));
            }
            let mime = meta.split(';').next().unwrap_or("").trim();
            let mime = if mime.is_empty() { "image/png" } else { mime };
            let bytes = BASE64.decode(payload.trim()).map_err(|err| {
                AtelierError::InvalidRequest(format!("undecodable source image data URL: {err}"))
            })?;
            return Ok((bytes, mime.to_string()));
        }

        if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .http
                .get(source)
                .timeout(SOURCE_FETCH_TIMEOUT)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AtelierError::provider(
                    format!("failed to fetch source image ({status})"),
                    status.as_u16() >= 500,
                ));
            }
            let mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("image/png")
                .to_string();
            let bytes = response.bytes().await?.to_vec();
            return Ok((bytes, mime));
        }

        Err(AtelierError::InvalidRequest(
            "sourceImageUrl must be an http(s) URL or a data URL".into(),
        ))
    }

    async fn edit_image(
        &self,
        request: &GenerationInput,
        source: &str,
        model: &str,
    ) -> Result<Payload> {
        let (bytes, mime) = self.fetch_source_image(source).await?;
        let prompt = edit_prompt(&request.prompt);
        let url = self.endpoint("images/edits");

        self.retry
            .run(|| async {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name("source.png")
                    .mime_str(&mime)?;
                let form = reqwest::multipart::Form::new()
                    .text("model", model.to_string())
                    .text("prompt", prompt.clone())
                    .text("size", request.size.clone())
                    .part("image", part);
                let response = self
                    .bearer(self.http.post(&url))
                    .multipart(form)
                    .timeout(GENERATION_TIMEOUT)
                    .send()
                    .await?;
                self.read_image_response(response).await
            })
            .await
    }

    async fn create_image(&self, request: &GenerationInput, model: &str) -> Result<Payload> {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        body.insert("size".to_string(), Value::String(request.size.clone()));
        self.merge_default_params(&mut body);

        let url = self.endpoint("images/generations");
        self.retry
            .run(|| async {
                let response = self
                    .bearer(self.http.post(&url))
                    .json(&body)
                    .timeout(GENERATION_TIMEOUT)
                    .send()
                    .await?;
                self.read_image_response(response).await
            })
            .await
    }

    /// Low-cost remote intent check. Best effort by contract: every failure
    /// mode collapses into [`ClassifySkip`] so the caller can fold back to
    /// the heuristic result.
    pub async fn classify_intent(
        &self,
        prompt: &str,
        context: &[ContextMessage],
    ) -> std::result::Result<Intent, ClassifySkip> {
        let mut body = Map::new();
        body.insert(
            "model".to_string(),
            Value::String(self.text_model().to_string()),
        );
        body.insert(
            "messages".to_string(),
            chat_messages(CLASSIFY_SYSTEM_PROMPT, context, prompt),
        );
        body.insert("max_tokens".to_string(), json!(4));
        body.insert("temperature".to_string(), json!(0));

        let url = self.endpoint("chat/completions");
        let response = self
            .bearer(self.http.post(&url))
            .json(&body)
            .timeout(CLASSIFY_TIMEOUT)
            .send()
            .await
            .map_err(|_| ClassifySkip)?;
        if !response.status().is_success() {
            return Err(ClassifySkip);
        }
        let value = response.json::<Value>().await.map_err(|_| ClassifySkip)?;
        let reply = extract_text(&value).ok_or(ClassifySkip)?.to_lowercase();
        if reply.contains("image") {
            Ok(Intent::Image)
        } else if reply.contains("text") {
            Ok(Intent::Text)
        } else {
            Err(ClassifySkip)
        }
    }
}

fn edit_prompt(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    if REDESIGN_SIGNALS.iter().any(|s| lower.contains(s)) {
        prompt.to_string()
    } else {
        format!("{EDIT_PRESERVE_PREFIX} {prompt}")
    }
}

fn chat_messages(system: &str, context: &[ContextMessage], prompt: &str) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": system })];
    for message in context {
        let role = match message.role {
            ContextRole::User => "user",
            ContextRole::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": message.content }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    Value::Array(messages)
}

#[async_trait]
impl GenerationBackend for OpenAi {
    fn provider(&self) -> &'static str {
        "OpenAI"
    }

    fn model_id(&self) -> &str {
        self.model.as_str()
    }

    async fn generate_image(&self, request: &GenerationInput) -> Result<ProviderOutput> {
        let model = self.image_model().to_string();
        let payload = match request.source_image_url.as_deref() {
            Some(source) => self.edit_image(request, source, &model).await?,
            None => self.create_image(request, &model).await?,
        };
        Ok(ProviderOutput {
            payload,
            model_used: model,
        })
    }

    async fn generate_text(&self, request: &GenerationInput) -> Result<ProviderOutput> {
        let model = self.text_model().to_string();
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(model.clone()));
        body.insert(
            "messages".to_string(),
            chat_messages(TEXT_SYSTEM_PROMPT, &request.context, &request.prompt),
        );
        self.merge_default_params(&mut body);

        let url = self.endpoint("chat/completions");
        let payload = self
            .retry
            .run(|| async {
                let response = self
                    .bearer(self.http.post(&url))
                    .json(&body)
                    .timeout(CHAT_TIMEOUT)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(provider_error("OpenAI", response).await);
                }
                let value = response.json::<Value>().await?;
                let text = extract_text(&value).ok_or_else(|| {
                    AtelierError::provider("OpenAI response contained no text content", false)
                })?;
                Ok(Payload::Text { body: text })
            })
            .await?;

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

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn input(prompt: &str) -> GenerationInput {
        GenerationInput {
            prompt: prompt.to_string(),
            size: "1024x1024".to_string(),
            source_image_url: None,
            context: Vec::new(),
        }
    }

    #[test]
    fn model_resolution_substitutes_sane_defaults() {
        let adapter = OpenAi::new("sk-test").with_model("gpt-4o");
        assert_eq!(adapter.image_model(), "gpt-image-1");
        assert_eq!(adapter.text_model(), "gpt-4o");

        let adapter = OpenAi::new("sk-test").with_model("dall-e-3");
        assert_eq!(adapter.image_model(), "dall-e-3");
        assert_eq!(adapter.text_model(), "gpt-4o-mini");

        let adapter = OpenAi::new("sk-test");
        assert_eq!(adapter.image_model(), "gpt-image-1");
        assert_eq!(adapter.text_model(), "gpt-4o-mini");
    }

    #[test]
    fn edit_prompt_preserves_unless_redesign_is_asked() {
        assert!(edit_prompt("change the color to blue").starts_with(EDIT_PRESERVE_PREFIX));
        assert_eq!(
            edit_prompt("reimagine the chair from scratch"),
            "reimagine the chair from scratch"
        );
    }

    #[tokio::test]
    async fn generation_posts_json_and_extracts_url() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images/generations")
                    .header("authorization", "Bearer sk-test")
                    .body_includes("\"model\":\"gpt-image-1\"")
                    .body_includes("\"size\":\"1024x1024\"")
                    .body_includes("\"quality\":\"hd\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "data": [{ "url": "https://cdn.example.com/out.png" }]
                    }));
            })
            .await;

        let adapter = OpenAi::new("sk-test")
            .with_base_url(server.url("/v1"))
            .with_model("gpt-4o")
            .with_default_params(serde_json::json!({ "quality": "hd" }));

        let output = adapter.generate_image(&input("a red sneaker")).await?;
        mock.assert_async().await;
        assert_eq!(output.model_used, "gpt-image-1");
        assert_eq!(
            output.payload,
            Payload::Image { url: "https://cdn.example.com/out.png".to_string() }
        );
        Ok(())
    }

    #[tokio::test]
    async fn server_error_is_retried_exactly_once() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(500)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({ "error": { "message": "overloaded" } }));
            })
            .await;

        let adapter = OpenAi::new("sk-test")
            .with_base_url(server.url("/v1"))
            .with_retry_policy(fast_retry(2));

        let err = adapter
            .generate_image(&input("a red sneaker"))
            .await
            .expect_err("exhausted retries should surface the last error");
        assert_eq!(mock.calls_async().await, 2);
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn client_error_is_not_retried_and_carries_request_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(400)
                    .header("content-type", "application/json")
                    .header("x-request-id", "req_abc123")
                    .json_body(serde_json::json!({
                        "error": { "message": "invalid size", "type": "invalid_request_error" }
                    }));
            })
            .await;

        let adapter = OpenAi::new("sk-test")
            .with_base_url(server.url("/v1"))
            .with_retry_policy(fast_retry(2));

        let err = adapter
            .generate_image(&input("a red sneaker"))
            .await
            .expect_err("4xx should fail immediately");
        assert_eq!(mock.calls_async().await, 1);
        assert!(!err.retryable());
        assert!(err.to_string().contains("invalid size"));
        assert!(err.to_string().contains("req_abc123"));
    }

    #[tokio::test]
    async fn source_image_routes_to_edit_call_with_preservation_prefix() -> Result<()> {
        let server = MockServer::start_async().await;
        let edits = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images/edits")
                    .body_includes("Preserve the original composition")
                    .body_includes("change the color to blue");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({ "data": [{ "b64_json": "AQID" }] }));
            })
            .await;
        let generations = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images/generations");
                then.status(200);
            })
            .await;

        let adapter = OpenAi::new("sk-test").with_base_url(server.url("/v1"));
        let mut request = input("change the color to blue");
        request.source_image_url = Some("data:image/png;base64,AQIDBA==".to_string());

        let output = adapter.generate_image(&request).await?;
        edits.assert_async().await;
        assert_eq!(generations.calls_async().await, 0);
        assert_eq!(
            output.payload,
            Payload::Image { url: "data:image/png;base64,AQID".to_string() }
        );
        Ok(())
    }

    #[tokio::test]
    async fn redesign_prompt_skips_the_preservation_prefix() -> Result<()> {
        let server = MockServer::start_async().await;
        let edits = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images/edits")
                    .body_includes("reimagine the chair")
                    .body_excludes("Preserve the original composition");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({ "data": [{ "b64_json": "AQID" }] }));
            })
            .await;

        let adapter = OpenAi::new("sk-test").with_base_url(server.url("/v1"));
        let mut request = input("reimagine the chair");
        request.source_image_url = Some("data:image/png;base64,AQIDBA==".to_string());

        adapter.generate_image(&request).await?;
        edits.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn text_generation_sends_structuring_instruction() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes("bullet or numbered lists")
                    .body_includes("what are the tradeoffs");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "choices": [{
                            "message": { "role": "assistant", "content": "## Titanium\n- light" }
                        }]
                    }));
            })
            .await;

        let adapter = OpenAi::new("sk-test").with_base_url(server.url("/v1"));
        let output = adapter
            .generate_text(&input("what are the tradeoffs of titanium vs aluminum?"))
            .await?;
        mock.assert_async().await;
        assert_eq!(output.model_used, "gpt-4o-mini");
        assert_eq!(
            output.payload,
            Payload::Text { body: "## Titanium\n- light".to_string() }
        );
        Ok(())
    }

    #[tokio::test]
    async fn classification_parses_reply_and_never_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes("IMAGE or TEXT");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "choices": [{ "message": { "role": "assistant", "content": "TEXT" } }]
                    }));
            })
            .await;

        let adapter = OpenAi::new("sk-test").with_base_url(server.url("/v1"));
        let decided = adapter.classify_intent("what about the hinge?", &[]).await;
        assert_eq!(decided, Ok(Intent::Text));

        let dead = OpenAi::new("sk-test").with_base_url("http://127.0.0.1:1/v1");
        let skipped = dead.classify_intent("what about the hinge?", &[]).await;
        assert_eq!(skipped, Err(ClassifySkip));
    }
}
