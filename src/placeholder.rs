//! Deterministic stand-in images for organizations without a configured
//! provider. Keeps the review UI functional during onboarding; this is a
//! degraded mode, not an error.

use sha2::{Digest, Sha256};

use crate::types::parse_size;

pub const PLACEHOLDER_PROVIDER: &str = "Placeholder";

const SEED_SALT: &str = "atelier-placeholder-v1";
const DEFAULT_DIMENSIONS: (u32, u32) = (1024, 1024);

/// Builds a `picsum.photos` URL whose seed is a stable hash of the request
/// shape. Identical inputs yield identical URLs; changing any single input
/// changes the seed.
pub fn placeholder_image_url(prompt: &str, size: &str, provider: &str, model: &str) -> String {
    let seed = placeholder_seed(prompt, size, provider, model);
    let (width, height) = parse_size(size).unwrap_or(DEFAULT_DIMENSIONS);
    format!("https://picsum.photos/seed/{seed}/{width}/{height}")
}

fn placeholder_seed(prompt: &str, size: &str, provider: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [prompt, size, provider, model, SEED_SALT] {
        hasher.update(part.as_bytes());
        // Separator so ("ab","c") and ("a","bc") hash differently.
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
