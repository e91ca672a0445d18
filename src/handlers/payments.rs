//! Payment intent and confirmation endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::models::EntityRef;
use crate::services::confirmation::{ConfirmRequest, PaymentConfirmer};
use crate::services::intents::IntentIssuer;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentBody {
    /// Order reference; accepts a number, a string, or an `{ "id": … }`
    /// object.
    #[schema(value_type = Object)]
    pub order_id: Value,
}

/// Create (or reuse) a payment intent for an order.
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-intent",
    request_body = CreateIntentBody,
    responses(
        (status = 200, description = "Intent issued or reused"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order already paid or refunded"),
        (status = 422, description = "Order resolves to an invalid amount"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(body): Json<CreateIntentBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let issuer = IntentIssuer::new(
        state.store.clone(),
        state.gateway.clone(),
        state.config.payments.clone(),
    );
    let response = issuer.issue(&EntityRef::parse(&body.order_id)).await?;
    Ok(ApiResponse::success(response))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    #[schema(value_type = Object)]
    pub order_id: Value,
    pub payment_intent_id: Option<String>,
    /// Client-asserted outcome; only honored in mock/off provider modes
    pub status: Option<String>,
}

/// Confirm a payment after provider-side authorization.
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmBody,
    responses(
        (status = 200, description = "Payment state after confirmation"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Caller does not own the order"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is cancelled or completed"),
        (status = 422, description = "Intent not succeeded, or amount/currency mismatch"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn confirm(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ConfirmBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let confirmer = PaymentConfirmer::new(
        state.store.clone(),
        state.gateway.clone(),
        state.config.payments.clone(),
    );
    let response = confirmer
        .confirm(
            &user.id,
            &user.email,
            ConfirmRequest {
                order_ref: EntityRef::parse(&body.order_id),
                payment_intent_id: body.payment_intent_id,
                asserted_status: body.status,
            },
        )
        .await?;
    Ok(ApiResponse::success(response))
}
