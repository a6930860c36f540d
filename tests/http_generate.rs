#![cfg(feature = "http")]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use httpmock::{Method::POST, MockServer};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use atelier_gen::secrets::LocalSecretStore;
use atelier_gen::settings::InMemorySettings;
use atelier_gen::types::{ProviderKind, ProviderSettings};
use atelier_gen::usage::NoopMeter;
use atelier_gen::{GenerationRouter, http};

fn app_with(settings: InMemorySettings) -> Router {
    let router = GenerationRouter::new(
        Arc::new(settings),
        Arc::new(LocalSecretStore),
        Arc::new(NoopMeter),
    );
    http::app(Arc::new(router))
}

fn generate_request(organization: Option<&str>, payload: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(org) = organization {
        builder = builder.header("x-organization-id", org);
    }
    builder
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("body is json")
}

fn openai_settings(base_url: &str) -> ProviderSettings {
    ProviderSettings {
        provider: ProviderKind::OpenAi,
        model: "gpt-4o".to_string(),
        encrypted_api_key: "plain:sk-test".to_string(),
        default_params: json!({ "base_url": base_url }),
    }
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = app_with(InMemorySettings::new());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("handler runs");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn unconfigured_organization_receives_placeholder_image() {
    let app = app_with(InMemorySettings::new());
    let payload = json!({ "prompt": "generate a red sneaker concept", "size": "1024x1024" });

    let response = app
        .oneshot(generate_request(Some("org-1"), &payload))
        .await
        .expect("handler runs");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["outputType"], "image");
    assert_eq!(body["providerUsed"], "Placeholder");
    assert_eq!(body["configured"], false);
    let url = body["imageUrl"].as_str().expect("placeholder url");
    assert!(url.starts_with("https://picsum.photos/seed/"));
    assert!(url.ends_with("/1024/1024"));
}

#[tokio::test]
async fn configured_text_request_flows_through_openai() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": "## Material options\n- Titanium\n- Aluminum"
                        }
                    }]
                }));
        })
        .await;

    let settings =
        InMemorySettings::new().with_organization("org-1", openai_settings(&server.url("/v1")));
    let app = app_with(settings);
    let payload = json!({
        "prompt": "what are the pros and cons of titanium for the frame?",
        "size": "1024x1024"
    });

    let response = app
        .oneshot(generate_request(Some("org-1"), &payload))
        .await
        .expect("handler runs");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["outputType"], "text");
    assert_eq!(body["providerUsed"], "OpenAI");
    assert_eq!(body["configured"], true);
    assert!(
        body["responseText"]
            .as_str()
            .is_some_and(|text| text.contains("Titanium"))
    );
    assert!(body.get("imageUrl").is_none());
}

#[tokio::test]
async fn blank_prompt_is_a_bad_request() {
    let app = app_with(InMemorySettings::new());
    let payload = json!({ "prompt": "   ", "size": "1024x1024" });

    let response = app
        .oneshot(generate_request(Some("org-1"), &payload))
        .await
        .expect("handler runs");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn persistent_provider_failure_is_a_bad_gateway() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/images/generations");
            then.status(500)
                .header("content-type", "application/json")
                .json_body(json!({ "error": { "message": "upstream exploded" } }));
        })
        .await;

    let settings =
        InMemorySettings::new().with_organization("org-1", openai_settings(&server.url("/v1")));
    let app = app_with(settings);
    let payload = json!({ "prompt": "generate a red sneaker concept", "size": "1024x1024" });

    let response = app
        .oneshot(generate_request(Some("org-1"), &payload))
        .await
        .expect("handler runs");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // Both attempts of the retry envelope were spent.
    assert_eq!(mock.calls_async().await, 2);

    let body = body_json(response).await;
    assert_eq!(body["configured"], true);
    assert_eq!(body["providerUsed"], "OpenAI");
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("upstream exploded"))
    );
}
