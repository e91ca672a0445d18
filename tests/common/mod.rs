//! Shared test harness: a full router wired to in-memory stores and the
//! in-process gateway, exercised through `tower::ServiceExt::oneshot`.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tower::ServiceExt;

use printforge_api::auth::issue_token;
use printforge_api::config::{AppConfig, ProviderMode};
use printforge_api::gateways::MockGateway;
use printforge_api::models::{
    Customer, EntityRef, ItemFormat, Order, OrderItem, OrderStatus, PaymentProvider,
    PaymentStatus,
};
use printforge_api::store::{InMemoryEntitlementStore, InMemoryOrderStore};
use printforge_api::{app, AppState};

pub const JWT_SECRET: &str =
    "integration-test-jwt-secret-that-is-at-least-64-characters-long-0123456789";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const INTERNAL_WEBHOOK_TOKEN: &str = "internal-shared-token";
pub const YOOKASSA_SHOP_ID: &str = "test-shop";
pub const YOOKASSA_SECRET_KEY: &str = "test-shop-secret";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryOrderStore>,
    pub entitlements: Arc<InMemoryEntitlementStore>,
    pub gateway: Arc<MockGateway>,
}

impl TestApp {
    pub fn new(mode: ProviderMode) -> Self {
        let mut config = AppConfig::new(
            JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        config.payments.provider_mode = mode;
        config.payments.stripe_secret_key = Some("sk_test_123".to_string());
        config.payments.stripe_webhook_secret = Some(STRIPE_WEBHOOK_SECRET.to_string());
        config.payments.internal_webhook_token = Some(INTERNAL_WEBHOOK_TOKEN.to_string());
        config.payments.yookassa_shop_id = Some(YOOKASSA_SHOP_ID.to_string());
        config.payments.yookassa_secret_key = Some(YOOKASSA_SECRET_KEY.to_string());

        let store = Arc::new(InMemoryOrderStore::new());
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        let gateway = Arc::new(MockGateway::new());
        let state = AppState::new(
            config,
            store.clone(),
            entitlements.clone(),
            gateway.clone(),
        );

        Self {
            router: app(state),
            store,
            entitlements,
            gateway,
        }
    }

    pub fn token_for(&self, user_id: &str, email: &str) -> String {
        issue_token(user_id, email, JWT_SECRET, 3600).expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
        extra_headers: &[(&str, String)],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, value);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Raw-body POST, used for webhook deliveries where the exact bytes
    /// are what the signature covers.
    pub async fn post_raw(
        &self,
        path: &str,
        body: Vec<u8>,
        extra_headers: &[(&str, String)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in extra_headers {
            builder = builder.header(*name, value);
        }
        let request = builder.body(Body::from(body)).expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn assert_status(response: Response<Body>, expected: StatusCode) -> Value {
    let status = response.status();
    let body = response_json(response).await;
    assert_eq!(status, expected, "unexpected status, body: {}", body);
    body
}

pub fn digital_item(product: i64, unit_price: Decimal) -> OrderItem {
    OrderItem {
        product: EntityRef::Numeric(product),
        format: ItemFormat::Digital,
        quantity: 1,
        unit_price,
    }
}

pub fn physical_item(product: i64, unit_price: Decimal) -> OrderItem {
    OrderItem {
        product: EntityRef::Numeric(product),
        format: ItemFormat::Physical,
        quantity: 1,
        unit_price,
    }
}

pub fn order_created_at(id: &str, items: Vec<OrderItem>, created_at: DateTime<Utc>) -> Order {
    let total = items.iter().map(|i| i.line_total()).sum();
    Order {
        id: id.into(),
        status: OrderStatus::Accepted,
        payment_status: PaymentStatus::Pending,
        payment_provider: PaymentProvider::Unknown,
        payment_intent_id: None,
        items,
        shipping: None,
        total,
        created_at,
        paid_at: None,
        user_id: Some("user-1".into()),
        customer: Customer {
            name: "Ada".into(),
            email: "ada@example.com".into(),
        },
        version: 0,
    }
}

pub fn fresh_order(id: &str, items: Vec<OrderItem>) -> Order {
    order_created_at(id, items, Utc::now())
}

pub fn aged_order(id: &str, items: Vec<OrderItem>, age_minutes: i64) -> Order {
    order_created_at(id, items, Utc::now() - Duration::minutes(age_minutes))
}

pub fn default_digital_order(id: &str) -> Order {
    fresh_order(id, vec![digital_item(1, dec!(500))])
}
