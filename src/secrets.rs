//! Secret store seam. The managed backend owns key encryption; the router
//! only ever consumes `decrypt`, and a decryption failure is treated as
//! "not configured" upstream, never surfaced as a hard error.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{AtelierError, Result};

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn decrypt(&self, blob: &str) -> Result<String>;
}

/// Decrypts blobs written by operator tooling rather than the managed
/// secret service. Supported schemes, selected by prefix:
///
/// - `plain:<key>` — the key verbatim
/// - `base64:<encoded>` — base64 of the key
///
/// Anything else is rejected, which the router folds into placeholder mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSecretStore;

#[async_trait]
impl SecretStore for LocalSecretStore {
    async fn decrypt(&self, blob: &str) -> Result<String> {
        let blob = blob.trim();
        if let Some(key) = blob.strip_prefix("plain:") {
            return Ok(key.to_string());
        }
        if let Some(encoded) = blob.strip_prefix("base64:") {
            let bytes = BASE64.decode(encoded.trim()).map_err(|err| {
                AtelierError::InvalidResponse(format!("undecodable key blob: {err}"))
            })?;
            return String::from_utf8(bytes).map_err(|_| {
                AtelierError::InvalidResponse("key blob is not valid utf-8".into())
            });
        }
        Err(AtelierError::InvalidResponse(
            "unknown key blob scheme (expected plain: or base64:)".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_and_base64_schemes_decrypt() -> Result<()> {
        let store = LocalSecretStore;
        assert_eq!(store.decrypt("plain:sk-123").await?, "sk-123");
        assert_eq!(store.decrypt("base64:c2stMTIz").await?, "sk-123");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_scheme_fails() {
        let store = LocalSecretStore;
        assert!(store.decrypt("vault:whatever").await.is_err());
        assert!(store.decrypt("base64:!!!not-base64!!!").await.is_err());
    }
}
