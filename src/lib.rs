pub mod auth;
pub mod config;
pub mod errors;
pub mod gateways;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, ProviderMode};
use crate::gateways::{MockGateway, PaymentGateway, StripeGateway, YookassaGateway};
use crate::store::{
    EntitlementStore, InMemoryEntitlementStore, InMemoryOrderStore, OrderStore,
};

/// Shared application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn OrderStore>,
    pub entitlements: Arc<dyn EntitlementStore>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn OrderStore>,
        entitlements: Arc<dyn EntitlementStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            entitlements,
            gateway,
        }
    }

    /// Wires in-memory stores and the gateway the configured mode selects.
    pub fn with_in_memory(config: AppConfig) -> Self {
        let gateway = build_gateway(&config);
        Self::new(
            config,
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryEntitlementStore::new()),
            gateway,
        )
    }
}

fn build_gateway(config: &AppConfig) -> Arc<dyn PaymentGateway> {
    match config.payments.provider_mode {
        ProviderMode::Stripe => Arc::new(StripeGateway::new(
            config.payments.stripe_secret_key.clone().unwrap_or_default(),
        )),
        ProviderMode::Yookassa => Arc::new(YookassaGateway::new(
            config.payments.yookassa_shop_id.clone().unwrap_or_default(),
            config
                .payments
                .yookassa_secret_key
                .clone()
                .unwrap_or_default(),
            config.payments.return_url.clone(),
        )),
        ProviderMode::Off | ProviderMode::Mock => Arc::new(MockGateway::new()),
    }
}

/// Standard success envelope for API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

async fn status_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// All v1 API routes.
pub fn api_v1_routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route(
            "/payments/create-intent",
            post(handlers::payments::create_intent),
        )
        .route("/payments/confirm", post(handlers::payments::confirm))
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::receive),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel))
        .route(
            "/orders/:id/payment-audit",
            get(handlers::orders::payment_audit),
        )
        .with_state(state)
}

/// The full application router: versioned API plus the OpenAPI UI.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::api_doc()),
        )
}
