//! OpenAPI documentation for the payment API.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::errors::ErrorResponse;
use crate::handlers::orders::CancelBody;
use crate::handlers::payments::{ConfirmBody, CreateIntentBody};
use crate::models::{
    Customer, ItemFormat, Order, OrderItem, OrderStatus, PaymentProvider, PaymentStatus,
    ShippingInfo,
};
use crate::services::audit::{AuditEvent, AuditReport};
use crate::services::cancellation::{CancelMode, CancelResponse};
use crate::services::confirmation::ConfirmResponse;
use crate::services::intents::IssueIntentResponse;
use crate::services::refunds::RefundOutcome;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PrintForge Payment API",
        description = "Order payment intents, confirmation, webhook reconciliation, cancellation and audit.",
    ),
    paths(
        crate::handlers::payments::create_intent,
        crate::handlers::payments::confirm,
        crate::handlers::payment_webhooks::receive,
        crate::handlers::orders::cancel,
        crate::handlers::orders::payment_audit,
    ),
    components(schemas(
        CreateIntentBody,
        ConfirmBody,
        CancelBody,
        IssueIntentResponse,
        ConfirmResponse,
        CancelResponse,
        CancelMode,
        RefundOutcome,
        AuditReport,
        AuditEvent,
        Order,
        OrderItem,
        OrderStatus,
        PaymentStatus,
        PaymentProvider,
        ItemFormat,
        ShippingInfo,
        Customer,
        ErrorResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "payments", description = "Payment intents, confirmation and provider webhooks"),
        (name = "orders", description = "Cancellation and payment audit"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn api_doc() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
