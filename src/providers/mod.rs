//! Provider adapters. Each backend has a materially different wire contract
//! (JSON vs multipart vs query-string auth vs create-and-poll), so each one
//! lives in its own module behind the uniform [`GenerationBackend`] trait;
//! the dispatcher only ever sees a normalized [`ProviderOutput`].

pub mod anthropic;
pub mod custom;
pub mod google;
pub mod openai;
pub mod replicate;
pub mod stability;

pub use anthropic::Anthropic;
pub use custom::CustomHttp;
pub use google::Gemini;
pub use openai::OpenAi;
pub use replicate::Replicate;
pub use stability::Stability;

use async_trait::async_trait;

use crate::Result;
use crate::types::{GenerationInput, Payload, ProviderOutput};

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn provider(&self) -> &'static str;
    fn model_id(&self) -> &str;

    async fn generate_image(&self, request: &GenerationInput) -> Result<ProviderOutput>;

    /// Text output is only wired up for providers with a text adapter;
    /// everything else answers with a notice instead of erroring.
    async fn generate_text(&self, _request: &GenerationInput) -> Result<ProviderOutput> {
        Ok(ProviderOutput {
            payload: Payload::Text {
                body: format!(
                    "Text responses are not configured for the {} provider.",
                    self.provider()
                ),
            },
            model_used: self.model_id().to_string(),
        })
    }
}
