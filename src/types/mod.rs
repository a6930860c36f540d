use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AtelierError, Result};

/// Conversation history is clipped to the most recent entries before it is
/// forwarded to a provider.
pub const MAX_CONTEXT_MESSAGES: usize = 16;
pub const MAX_CONTEXT_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Auto,
    Image,
    Text,
    ForceImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
}

impl ContextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ContextRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ContextRole::Assistant,
            content: content.into(),
        }
    }
}

/// One inbound generation call. Construct it, run it through [`validated`],
/// and treat it as immutable afterwards; the router never mutates it.
///
/// [`validated`]: GenerationRequest::validated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_url: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextMessage>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: size.into(),
            source_image_url: None,
            mode: Mode::Auto,
            context: Vec::new(),
        }
    }

    /// Validates the prompt and size and clips the conversation context to
    /// the [`MAX_CONTEXT_MESSAGES`] most recent entries, each truncated to
    /// [`MAX_CONTEXT_CONTENT_CHARS`] characters.
    pub fn validated(mut self) -> Result<Self> {
        self.prompt = self.prompt.trim().to_string();
        if self.prompt.is_empty() {
            return Err(AtelierError::InvalidRequest("prompt must not be empty".into()));
        }
        parse_size(&self.size)?;

        if self.context.len() > MAX_CONTEXT_MESSAGES {
            let skip = self.context.len() - MAX_CONTEXT_MESSAGES;
            self.context.drain(..skip);
        }
        for message in &mut self.context {
            if message.content.chars().count() > MAX_CONTEXT_CONTENT_CHARS {
                message.content = message
                    .content
                    .chars()
                    .take(MAX_CONTEXT_CONTENT_CHARS)
                    .collect();
            }
        }
        Ok(self)
    }

    pub fn dimensions(&self) -> Result<(u32, u32)> {
        parse_size(&self.size)
    }

    /// The adapter-facing view of this request.
    pub fn input(&self) -> GenerationInput {
        GenerationInput {
            prompt: self.prompt.clone(),
            size: self.size.clone(),
            source_image_url: self.source_image_url.clone(),
            context: self.context.clone(),
        }
    }
}

/// Parses a `<width>x<height>` size string.
pub fn parse_size(size: &str) -> Result<(u32, u32)> {
    let malformed = || AtelierError::InvalidRequest(format!("malformed size: {size:?}"));
    let (width, height) = size.trim().split_once('x').ok_or_else(malformed)?;
    let width = width.trim().parse::<u32>().map_err(|_| malformed())?;
    let height = height.trim().parse::<u32>().map_err(|_| malformed())?;
    if width == 0 || height == 0 {
        return Err(malformed());
    }
    Ok((width, height))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "OpenAI", alias = "openai")]
    OpenAi,
    #[serde(rename = "Gemini", alias = "gemini", alias = "google")]
    Gemini,
    #[serde(rename = "Replicate", alias = "replicate")]
    Replicate,
    #[serde(rename = "Stability", alias = "stability")]
    Stability,
    #[serde(rename = "Custom", alias = "custom")]
    Custom,
    #[serde(rename = "Anthropic", alias = "anthropic")]
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Gemini",
            Self::Replicate => "Replicate",
            Self::Stability => "Stability",
            Self::Custom => "Custom",
            Self::Anthropic => "Anthropic",
        }
    }
}

/// Per-organization provider selection. Loaded fresh on every request so a
/// rotated key is never served from a stale copy.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub encrypted_api_key: String,
    #[serde(default = "empty_object")]
    pub default_params: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("encrypted_api_key", &"<redacted>")
            .field("default_params", &self.default_params)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Image,
    Text,
}

/// The single payload of a successful generation. The enum makes the
/// "exactly one of image/text" invariant unrepresentable to violate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Image { url: String },
    Text { body: String },
}

impl Payload {
    pub fn kind(&self) -> OutputKind {
        match self {
            Self::Image { .. } => OutputKind::Image,
            Self::Text { .. } => OutputKind::Text,
        }
    }
}

/// What a provider adapter receives: the validated request minus everything
/// the adapter was already constructed with (key, model, default params).
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub prompt: String,
    pub size: String,
    pub source_image_url: Option<String>,
    pub context: Vec<ContextMessage>,
}

#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub payload: Payload,
    pub model_used: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub output_type: OutputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    pub provider_used: String,
    pub model_used: String,
    pub configured: bool,
}

impl GenerationResult {
    pub fn from_payload(
        payload: Payload,
        provider_used: impl Into<String>,
        model_used: impl Into<String>,
        configured: bool,
    ) -> Self {
        let (output_type, image_url, response_text) = match payload {
            Payload::Image { url } => (OutputKind::Image, Some(url), None),
            Payload::Text { body } => (OutputKind::Text, None, Some(body)),
        };
        Self {
            output_type,
            image_url,
            response_text,
            provider_used: provider_used.into(),
            model_used: model_used.into(),
            configured,
        }
    }
}
