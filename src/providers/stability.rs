use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::providers::GenerationBackend;
use crate::types::{GenerationInput, Payload, ProviderOutput, parse_size};
use crate::utils::http::provider_error;
use crate::{AtelierError, Result};

const DEFAULT_BASE_URL: &str = "https://api.stability.ai/v1";
const DEFAULT_ENGINE: &str = "stable-diffusion-xl-1024-v1-0";

const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Stability adapter: a single text-to-image post against the configured
/// engine, pixel dimensions computed from the request's size string.
#[derive(Clone)]
pub struct Stability {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    default_params: Value,
}

#[derive(Debug, Deserialize)]
struct TextToImageResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    #[serde(default)]
    base64: String,
}

impl Stability {
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

    fn engine(&self) -> &str {
        let model = self.model.trim();
        if model.is_empty() { DEFAULT_ENGINE } else { model }
    }
}

#[async_trait]
impl GenerationBackend for Stability {
    fn provider(&self) -> &'static str {
        "Stability"
    }

    fn model_id(&self) -> &str {
        self.model.as_str()
    }

    async fn generate_image(&self, request: &GenerationInput) -> Result<ProviderOutput> {
        let engine = self.engine().to_string();
        let (width, height) = parse_size(&request.size).unwrap_or((1024, 1024));

        let mut body = Map::new();
        body.insert(
            "text_prompts".to_string(),
            json!([{ "text": request.prompt }]),
        );
        body.insert("width".to_string(), json!(width));
        body.insert("height".to_string(), json!(height));
        if let Some(params) = self.default_params.as_object() {
            for (key, value) in params {
                if key == "base_url" || body.contains_key(key) {
                    continue;
                }
                body.insert(key.clone(), value.clone());
            }
        }

        let url = format!(
            "{}/generation/{engine}/text-to-image",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(GENERATION_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("Stability", response).await);
        }

        let parsed = response.json::<TextToImageResponse>().await?;
        let artifact = parsed
            .artifacts
            .iter()
            .find(|a| !a.base64.trim().is_empty())
            .ok_or_else(|| {
                AtelierError::provider("Stability response contained no image artifact", false)
            })?;

        Ok(ProviderOutput {
            payload: Payload::Image {
                url: format!("data:image/png;base64,{}", artifact.base64),
            },
            model_used: engine,
        })
    }
}
