mod error;
mod extract;
mod placeholder;
mod retry;
mod router;
pub mod utils;

pub mod intent;
pub mod providers;
pub mod secrets;
pub mod settings;
pub mod types;
pub mod usage;

#[cfg(feature = "http")]
pub mod config;
#[cfg(feature = "http")]
pub mod http;

pub use error::{AtelierError, Result};
pub use extract::{extract_image, extract_text};
pub use intent::{ClassifySkip, Intent, IntentClassifier};
pub use placeholder::{PLACEHOLDER_PROVIDER, placeholder_image_url};
pub use retry::RetryPolicy;
pub use router::{GenerationRouter, RouteFailure};
pub use secrets::{LocalSecretStore, SecretStore};
pub use settings::{InMemorySettings, SettingsStore};
pub use types::{
    ContextMessage, ContextRole, GenerationInput, GenerationRequest, GenerationResult,
    MAX_CONTEXT_CONTENT_CHARS, MAX_CONTEXT_MESSAGES, Mode, OutputKind, Payload, ProviderKind,
    ProviderOutput, ProviderSettings, parse_size,
};
pub use usage::{InMemoryMeter, MonthlyUsage, NoopMeter, UsageMeter};

pub use providers::{
    Anthropic, CustomHttp, Gemini, GenerationBackend, OpenAi, Replicate, Stability,
};

#[cfg(feature = "http")]
pub use config::{OrgConfig, ServerConfig};
