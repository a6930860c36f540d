use std::sync::Arc;

use atelier_gen::config::ServerConfig;
use atelier_gen::secrets::LocalSecretStore;
use atelier_gen::usage::InMemoryMeter;
use atelier_gen::{GenerationRouter, http};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or(
        "usage: atelier-router <config.toml> [--listen HOST:PORT] [--remote-classification]",
    )?;

    let mut listen_override: Option<String> = None;
    let mut remote_classification_override = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen_override = Some(args.next().ok_or("missing value for --listen/--addr")?);
            }
            "--remote-classification" => {
                remote_classification_override = true;
            }
            other => return Err(format!("unknown arg: {other}").into()),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load(&path)?;
    let listen = listen_override.unwrap_or_else(|| config.listen.clone());
    let remote_classification = config.remote_classification || remote_classification_override;

    let settings = config.settings_store()?;
    let router = GenerationRouter::new(
        Arc::new(settings),
        Arc::new(LocalSecretStore),
        Arc::new(InMemoryMeter::new()),
    )
    .with_remote_classification(remote_classification);

    let app = http::app(Arc::new(router));
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    println!("atelier-router listening on {listen}");
    axum::serve(listener, app).await?;
    Ok(())
}
