//! TOML configuration for the standalone server binary. Organizations are
//! declared inline; a plaintext `api_key` is wrapped into a `plain:` blob so
//! the rest of the pipeline always goes through the secret store.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::settings::InMemorySettings;
use crate::types::{ProviderKind, ProviderSettings};
use crate::{AtelierError, Result};

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub remote_classification: bool,
    #[serde(default)]
    pub organizations: BTreeMap<String, OrgConfig>,
}

#[derive(Clone, Deserialize)]
pub struct OrgConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub encrypted_api_key: Option<String>,
    #[serde(default)]
    pub default_params: Option<toml::Value>,
}

impl std::fmt::Debug for OrgConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "encrypted_api_key",
                &self.encrypted_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("remote_classification", &self.remote_classification)
            .field("organizations", &self.organizations)
            .finish()
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| AtelierError::InvalidResponse(format!("invalid config: {err}")))
    }

    /// Materializes the `[organizations.*]` tables into a settings store.
    pub fn settings_store(&self) -> Result<InMemorySettings> {
        let mut store = InMemorySettings::new();
        for (organization_id, org) in &self.organizations {
            store.insert(organization_id, org.provider_settings()?);
        }
        Ok(store)
    }
}

impl OrgConfig {
    fn provider_settings(&self) -> Result<ProviderSettings> {
        let encrypted_api_key = match (&self.encrypted_api_key, &self.api_key) {
            (Some(blob), _) => blob.clone(),
            (None, Some(key)) => format!("plain:{key}"),
            (None, None) => String::new(),
        };
        let default_params = match &self.default_params {
            Some(value) => serde_json::to_value(value)?,
            None => Value::Object(serde_json::Map::new()),
        };
        Ok(ProviderSettings {
            provider: self.provider,
            model: self.model.clone(),
            encrypted_api_key,
            default_params,
        })
    }
}
