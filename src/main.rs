use std::net::SocketAddr;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use printforge_api::config::{init_tracing, load_config};
use printforge_api::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        provider_mode = ?config.payments.provider_mode,
        "starting printforge-api"
    );

    let cors = build_cors_layer(&config);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = AppState::with_in_memory(config);
    let router = app(state).layer(cors).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

fn build_cors_layer(config: &printforge_api::config::AppConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];
    let headers = [header::AUTHORIZATION, header::CONTENT_TYPE];

    if let Some(origins) = config
        .cors_allowed_origins
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        let parsed: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();
        if !parsed.is_empty() {
            return CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(methods)
                .allow_headers(headers);
        }
        warn!("no valid CORS origins parsed; falling back");
    }

    if config.should_allow_permissive_cors() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        warn!("production without configured CORS origins; denying cross-origin requests");
        CorsLayer::new()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
