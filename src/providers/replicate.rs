use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::extract::extract_image;
use crate::providers::GenerationBackend;
use crate::types::{GenerationInput, Payload, ProviderOutput, parse_size};
use crate::utils::http::provider_error;
use crate::{AtelierError, Result};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_TIMEOUT: Duration = Duration::from_secs(12);
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
const MAX_POLLS: u32 = 20;

/// Replicate adapter: create a prediction with a synchronous-wait hint, then
/// poll the status URL until a terminal state or the attempt budget runs out.
#[derive(Clone)]
pub struct Replicate {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    default_params: Value,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

impl Replicate {
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
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
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

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("authorization", format!("Token {}", self.api_key))
    }

    fn build_input(&self, request: &GenerationInput) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        if let Ok((width, height)) = parse_size(&request.size) {
            input.insert("width".to_string(), json!(width));
            input.insert("height".to_string(), json!(height));
        }
        if let Some(extra) = self
            .default_params
            .get("input")
            .and_then(Value::as_object)
        {
            for (key, value) in extra {
                if input.contains_key(key) {
                    continue;
                }
                input.insert(key.clone(), value.clone());
            }
        }
        input
    }

    fn payload_from(&self, prediction: &Prediction) -> Result<Payload> {
        match prediction.status.as_str() {
            "succeeded" => {
                let output = prediction.output.as_ref().ok_or_else(|| {
                    AtelierError::provider("Replicate prediction succeeded without output", false)
                })?;
                let url = extract_image(output).ok_or_else(|| {
                    AtelierError::provider("Replicate output contained no image URL", false)
                })?;
                Ok(Payload::Image { url })
            }
            "failed" | "canceled" => {
                let detail = prediction
                    .error
                    .as_ref()
                    .map(|e| match e {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| prediction.status.clone());
                Err(AtelierError::provider(
                    format!("Replicate prediction {}: {detail}", prediction.status),
                    false,
                ))
            }
            other => Err(AtelierError::provider(
                format!("Replicate prediction still {other} after polling budget"),
                true,
            )),
        }
    }
}

#[async_trait]
impl GenerationBackend for Replicate {
    fn provider(&self) -> &'static str {
        "Replicate"
    }

    fn model_id(&self) -> &str {
        self.model.as_str()
    }

    async fn generate_image(&self, request: &GenerationInput) -> Result<ProviderOutput> {
        let model = self.model.trim().to_string();
        if model.is_empty() {
            return Err(AtelierError::provider(
                "Replicate model/version is not configured",
                false,
            ));
        }

        let body = json!({
            "version": model,
            "input": Value::Object(self.build_input(request)),
        });

        let url = format!("{}/predictions", self.base_url.trim_end_matches('/'));
        let response = self
            .auth(self.http.post(&url))
            .header("prefer", "wait")
            .json(&body)
            .timeout(CREATE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error("Replicate", response).await);
        }
        let mut prediction = response.json::<Prediction>().await?;

        let mut polls = 0u32;
        while !prediction.is_terminal() && polls < self.max_polls {
            let Some(poll_url) = prediction.urls.get.clone() else {
                break;
            };
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            let response = self
                .auth(self.http.get(&poll_url))
                .timeout(POLL_TIMEOUT)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(provider_error("Replicate", response).await);
            }
            prediction = response.json::<Prediction>().await?;
        }

        let payload = self.payload_from(&prediction)?;
        Ok(ProviderOutput {
            payload,
            model_used: model,
        })
    }
}
