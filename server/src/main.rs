mod config;
mod console;
mod renderer;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, RelayConfig};
use crate::renderer::TracingRenderer;

#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {what} port {port}: {source}")]
    Bind {
        what: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ServeError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env()?;
    let state = state::AppState::new(config);
    let config = state.config.clone();

    let lan_room = state
        .rooms
        .open_hosted(&config.lan_room, &config.host_name, Box::new(TracingRenderer::new(&config.lan_room)))
        .await;

    if config.lan_enabled {
        let listener = services::lan::bind(config.lan_port)
            .await
            .map_err(|source| ServeError::Bind { what: "LAN", port: config.lan_port, source })?;
        tokio::spawn(services::lan::run(state.clone(), listener, lan_room.clone()));
    }

    if config.host_console {
        tokio::spawn(console::run(tokio::io::stdin(), lan_room, config.host_name.clone()));
    }

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.port)))
        .await
        .map_err(|source| ServeError::Bind { what: "HTTP", port: config.port, source })?;

    tracing::info!(port = config.port, lan_port = config.lan_port, lan = config.lan_enabled, "relay listening");
    axum::serve(listener, app).await.map_err(ServeError::Serve)
}
