//! JSON HTTP surface over the router: `POST /api/generate` plus a health
//! probe. The organization is identified by the `x-organization-id` header;
//! requests without one are served anonymously in placeholder mode.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use crate::router::GenerationRouter;
use crate::types::{GenerationRequest, GenerationResult};
use crate::utils::http::compact_message;

const ORGANIZATION_HEADER: &str = "x-organization-id";

#[derive(Clone)]
struct AppState {
    router: Arc<GenerationRouter>,
}

pub fn app(router: Arc<GenerationRouter>) -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/health", get(health))
        .with_state(AppState { router })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn organization_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ORGANIZATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResult>, (StatusCode, Json<serde_json::Value>)> {
    let organization = organization_id(&headers);
    match state.router.handle(organization.as_deref(), request).await {
        Ok(result) => {
            info!(
                provider = %result.provider_used,
                output = ?result.output_type,
                configured = result.configured,
                "generation served"
            );
            Ok(Json(result))
        }
        Err(failure) if failure.is_validation() => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": failure.error.to_string() })),
        )),
        Err(failure) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": compact_message(&failure.error.to_string()),
                "configured": failure.configured,
                "providerUsed": failure.provider_used,
                "modelUsed": failure.model_used,
            })),
        )),
    }
}
