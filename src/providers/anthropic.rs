use async_trait::async_trait;

use crate::providers::GenerationBackend;
use crate::types::{GenerationInput, ProviderOutput};
use crate::{AtelierError, Result};

/// Anthropic has no image generation API, so routing an image request here
/// is a configuration mistake the user can fix; the error names the
/// providers that do work. Text requests get the shared "not configured"
/// notice until a text-assistant role lands.
#[derive(Debug, Clone)]
pub struct Anthropic {
    model: String,
}

impl Anthropic {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[async_trait]
impl GenerationBackend for Anthropic {
    fn provider(&self) -> &'static str {
        "Anthropic"
    }

    fn model_id(&self) -> &str {
        self.model.as_str()
    }

    async fn generate_image(&self, _request: &GenerationInput) -> Result<ProviderOutput> {
        Err(AtelierError::provider(
            "Anthropic does not support image generation; configure OpenAI, Gemini, \
             Replicate, or Stability for image output",
            false,
        ))
    }
}
