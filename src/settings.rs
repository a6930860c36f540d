//! Read-only provider settings lookup, keyed by organization. The backing
//! store is a collaborator; the router re-reads it on every request so key
//! rotation takes effect immediately.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;
use crate::types::ProviderSettings;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` means the organization has no provider configured, which
    /// routes to placeholder mode rather than failing the request.
    async fn provider_settings(&self, organization_id: &str) -> Result<Option<ProviderSettings>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySettings {
    organizations: HashMap<String, ProviderSettings>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, organization_id: impl Into<String>, settings: ProviderSettings) {
        self.organizations.insert(organization_id.into(), settings);
    }

    pub fn with_organization(
        mut self,
        organization_id: impl Into<String>,
        settings: ProviderSettings,
    ) -> Self {
        self.insert(organization_id, settings);
        self
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn provider_settings(&self, organization_id: &str) -> Result<Option<ProviderSettings>> {
        Ok(self.organizations.get(organization_id).cloned())
    }
}
