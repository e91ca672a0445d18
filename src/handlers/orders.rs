//! Order cancellation and payment audit endpoints.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::models::EntityRef;
use crate::services::audit::AuditTrailBuilder;
use crate::services::cancellation::{CancelRequest, CancellationEngine};
use crate::services::refunds::RefundExecutor;
use crate::{ApiResponse, AppState};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelBody {
    /// Cancel only the line holding this product
    #[schema(value_type = Object)]
    pub item_id: Option<Value>,
    /// Cancel only the line at this position
    pub item_index: Option<usize>,
}

/// Cancel an order, or one item of it.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = String, Path, description = "Order id")),
    request_body(content = CancelBody, description = "Optional single-item selector"),
    responses(
        (status = 200, description = "Order cancelled or reduced, with the refund outcome"),
        (status = 400, description = "Window passed or a digital item was already downloaded"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Caller does not own the order"),
        (status = 404, description = "Order or item not found"),
        (status = 409, description = "Order is ready, completed or already cancelled"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn cancel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<impl IntoResponse, ServiceError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let engine = CancellationEngine::new(
        state.store.clone(),
        state.entitlements.clone(),
        RefundExecutor::new(state.gateway.clone(), state.config.payments.clone()),
    );
    let response = engine
        .cancel(
            &user.id,
            &user.email,
            CancelRequest {
                order_ref: EntityRef::parse_str(&id),
                item: body.item_id.as_ref().map(EntityRef::parse),
                item_index: body.item_index,
            },
        )
        .await?;
    Ok(ApiResponse::success(response))
}

/// Read the monetary history of an order.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/payment-audit",
    params(("id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Audit timeline, newest first"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Caller does not own the order"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn payment_audit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let builder = AuditTrailBuilder::new(
        state.store.clone(),
        state.gateway.clone(),
        state.config.payments.clone(),
    );
    let report = builder
        .build(&user.id, &user.email, &EntityRef::parse_str(&id))
        .await?;
    Ok(ApiResponse::success(report))
}
