//! The generation request router: classify intent, load per-organization
//! provider settings, decrypt the key, dispatch to the adapter, meter usage.
//! Every collaborator is injected at construction so the router can be
//! exercised without a live backend service.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::AtelierError;
use crate::intent::{Intent, IntentClassifier};
use crate::placeholder::{PLACEHOLDER_PROVIDER, placeholder_image_url};
use crate::providers::{
    Anthropic, CustomHttp, Gemini, GenerationBackend, OpenAi, Replicate, Stability,
};
use crate::secrets::SecretStore;
use crate::settings::SettingsStore;
use crate::types::{
    GenerationRequest, GenerationResult, Mode, OutputKind, Payload, ProviderKind,
    ProviderSettings,
};
use crate::usage::UsageMeter;

/// A failed route, carrying the context the HTTP surface reports alongside
/// the error (which provider was attempted, whether one was configured).
#[derive(Debug)]
pub struct RouteFailure {
    pub error: AtelierError,
    pub provider_used: String,
    pub model_used: String,
    pub configured: bool,
}

impl RouteFailure {
    fn validation(error: AtelierError) -> Self {
        Self {
            error,
            provider_used: String::new(),
            model_used: String::new(),
            configured: false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.error, AtelierError::InvalidRequest(_))
    }
}

pub struct GenerationRouter {
    settings: Arc<dyn SettingsStore>,
    secrets: Arc<dyn SecretStore>,
    meter: Arc<dyn UsageMeter>,
    classifier: IntentClassifier,
    remote_classification: bool,
}

impl GenerationRouter {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        secrets: Arc<dyn SecretStore>,
        meter: Arc<dyn UsageMeter>,
    ) -> Self {
        Self {
            settings,
            secrets,
            meter,
            classifier: IntentClassifier::default(),
            remote_classification: false,
        }
    }

    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Allow the extra remote classification pass for ambiguous
    /// OpenAI-routed prompts. Off by default; it costs a model call.
    pub fn with_remote_classification(mut self, enabled: bool) -> Self {
        self.remote_classification = enabled;
        self
    }

    /// Runs one generation request to completion. Steps are sequential by
    /// design: settings load, classification, decryption, the provider call,
    /// then metering. Configuration absence is not an error; it falls back
    /// to a deterministic placeholder image.
    pub async fn handle(
        &self,
        organization_id: Option<&str>,
        request: GenerationRequest,
    ) -> Result<GenerationResult, RouteFailure> {
        let request = request.validated().map_err(RouteFailure::validation)?;

        // Settings are loaded fresh per request; a stale key after rotation
        // is worse than the extra read.
        let settings = match organization_id {
            Some(org) => match self.settings.provider_settings(org).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(organization = org, error = %err, "settings lookup failed; treating as unconfigured");
                    None
                }
            },
            None => None,
        };

        let Some(settings) = settings else {
            debug!("no provider configured; serving placeholder");
            return Ok(self.finish_placeholder(organization_id, &request, None).await);
        };

        let api_key = match self.secrets.decrypt(&settings.encrypted_api_key).await {
            Ok(key) if !key.trim().is_empty() => key,
            Ok(_) => {
                warn!(provider = settings.provider.as_str(), "decrypted key is empty; serving placeholder");
                return Ok(self
                    .finish_placeholder(organization_id, &request, Some(&settings))
                    .await);
            }
            Err(err) => {
                warn!(provider = settings.provider.as_str(), error = %err, "key decryption failed; serving placeholder");
                return Ok(self
                    .finish_placeholder(organization_id, &request, Some(&settings))
                    .await);
            }
        };

        let heuristic = self.classifier.classify(&request.prompt, request.mode);
        let provider_name = settings.provider.as_str().to_string();

        let (backend, intent): (Box<dyn GenerationBackend>, Intent) = match settings.provider {
            ProviderKind::OpenAi => {
                let adapter = openai_adapter(&settings, api_key);
                let intent = if self.remote_classification
                    && heuristic == Intent::Image
                    && request.mode == Mode::Auto
                {
                    match adapter.classify_intent(&request.prompt, &request.context).await {
                        Ok(decided) => {
                            debug!(?decided, "remote classification overrode heuristic");
                            decided
                        }
                        Err(_) => heuristic,
                    }
                } else {
                    heuristic
                };
                (Box::new(adapter), intent)
            }
            other => (
                build_backend(other, &settings, api_key).map_err(|error| RouteFailure {
                    error,
                    provider_used: provider_name.clone(),
                    model_used: settings.model.clone(),
                    configured: true,
                })?,
                heuristic,
            ),
        };

        debug!(provider = %provider_name, ?intent, "dispatching generation");
        let input = request.input();
        let outcome = match intent {
            Intent::Image => backend.generate_image(&input).await,
            Intent::Text => backend.generate_text(&input).await,
        };
        let output = outcome.map_err(|error| RouteFailure {
            error,
            provider_used: provider_name.clone(),
            model_used: settings.model.clone(),
            configured: true,
        })?;

        let image_generated = output.payload.kind() == OutputKind::Image;
        self.meter_usage(organization_id, image_generated).await;

        Ok(GenerationResult::from_payload(
            output.payload,
            provider_name,
            output.model_used,
            true,
        ))
    }

    async fn finish_placeholder(
        &self,
        organization_id: Option<&str>,
        request: &GenerationRequest,
        settings: Option<&ProviderSettings>,
    ) -> GenerationResult {
        let provider = settings.map(|s| s.provider.as_str()).unwrap_or("");
        let model = settings.map(|s| s.model.as_str()).unwrap_or("");
        let url = placeholder_image_url(&request.prompt, &request.size, provider, model);

        self.meter_usage(organization_id, true).await;
        GenerationResult::from_payload(
            Payload::Image { url },
            PLACEHOLDER_PROVIDER,
            model,
            false,
        )
    }

    /// Metering is a side effect, never a failure mode.
    async fn meter_usage(&self, organization_id: Option<&str>, image_generated: bool) {
        let Some(org) = organization_id else {
            return;
        };
        if let Err(err) = self.meter.increment_usage(org, image_generated).await {
            warn!(organization = org, error = %err, "usage metering failed");
        }
    }
}

fn base_url_override(settings: &ProviderSettings) -> Option<&str> {
    settings
        .default_params
        .get("base_url")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn openai_adapter(settings: &ProviderSettings, api_key: String) -> OpenAi {
    let mut adapter = OpenAi::new(api_key)
        .with_model(&settings.model)
        .with_default_params(settings.default_params.clone());
    if let Some(base_url) = base_url_override(settings) {
        adapter = adapter.with_base_url(base_url);
    }
    adapter
}

fn build_backend(
    provider: ProviderKind,
    settings: &ProviderSettings,
    api_key: String,
) -> crate::Result<Box<dyn GenerationBackend>> {
    Ok(match provider {
        ProviderKind::OpenAi => Box::new(openai_adapter(settings, api_key)),
        ProviderKind::Gemini => {
            let mut adapter = Gemini::new(api_key)
                .with_model(&settings.model)
                .with_default_params(settings.default_params.clone());
            if let Some(base_url) = base_url_override(settings) {
                adapter = adapter.with_base_url(base_url);
            }
            Box::new(adapter)
        }
        ProviderKind::Replicate => {
            let mut adapter = Replicate::new(api_key)
                .with_model(&settings.model)
                .with_default_params(settings.default_params.clone());
            if let Some(base_url) = base_url_override(settings) {
                adapter = adapter.with_base_url(base_url);
            }
            Box::new(adapter)
        }
        ProviderKind::Stability => {
            let mut adapter = Stability::new(api_key)
                .with_model(&settings.model)
                .with_default_params(settings.default_params.clone());
            if let Some(base_url) = base_url_override(settings) {
                adapter = adapter.with_base_url(base_url);
            }
            Box::new(adapter)
        }
        ProviderKind::Custom => Box::new(CustomHttp::from_params(
            api_key,
            settings.model.clone(),
            &settings.default_params,
        )?),
        ProviderKind::Anthropic => Box::new(Anthropic::new(&settings.model)),
    })
}
