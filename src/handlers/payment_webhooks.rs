//! Provider notification endpoint.
//!
//! One route serves three channels, told apart by their authenticity
//! markers: the card network signs the raw body (`Stripe-Signature`), the
//! regional gateway authenticates with shop credentials, and internal
//! senders present a shared token. Authenticity is established before any
//! payload field is read.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde_json::Value;
use tracing::warn;

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;
use crate::gateways::{constant_time_eq, stripe, yookassa};
use crate::services::webhooks::{WebhookEvent, WebhookReconciler};
use crate::{ApiResponse, AppState};

/// Receive a payment provider notification.
///
/// The body arrives as an unparsed `String`: the signature covers the
/// exact bytes on the wire, so nothing may deserialize the payload
/// before authenticity is established.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body(content = String, description = "Raw provider event payload"),
    responses(
        (status = 200, description = "Event applied or acknowledged as irrelevant"),
        (status = 401, description = "Authenticity check failed"),
        (status = 422, description = "Paid amount does not cover the order"),
    ),
    tag = "payments"
)]
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ServiceError> {
    let event = authenticate_and_parse(&state.config.payments, &headers, body.as_bytes())?;
    let reconciler = WebhookReconciler::new(state.store.clone(), state.config.payments.clone());
    let outcome = reconciler.reconcile(event).await?;
    Ok(ApiResponse::success(outcome))
}

fn authenticate_and_parse(
    config: &PaymentsConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookEvent, ServiceError> {
    if let Some(signature) = header_str(headers, "Stripe-Signature") {
        let secret = config.stripe_webhook_secret.as_deref().ok_or_else(|| {
            warn!("stripe webhook received but no signing secret configured");
            ServiceError::Unauthorized("webhook channel not configured".into())
        })?;
        if !stripe::verify_webhook_signature(
            secret,
            body,
            signature,
            config.webhook_tolerance_secs,
        ) {
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".into(),
            ));
        }
        return Ok(WebhookEvent::from_stripe(&parse_body(body)?));
    }

    if let Some(token) = header_str(headers, "X-Webhook-Token") {
        let expected = config.internal_webhook_token.as_deref().ok_or_else(|| {
            warn!("internal webhook received but no shared token configured");
            ServiceError::Unauthorized("webhook channel not configured".into())
        })?;
        if !constant_time_eq(token, expected) {
            return Err(ServiceError::Unauthorized("invalid webhook token".into()));
        }
        return Ok(WebhookEvent::from_internal(&parse_body(body)?));
    }

    // The regional gateway's envelope carries `event` + `object` and the
    // request authenticates with the shop credentials.
    let payload = parse_body(body)?;
    if payload.get("event").is_some() && payload.get("object").is_some() {
        let (Some(shop_id), Some(secret_key)) = (
            config.yookassa_shop_id.as_deref(),
            config.yookassa_secret_key.as_deref(),
        ) else {
            warn!("yookassa webhook received but no shop credentials configured");
            return Err(ServiceError::Unauthorized(
                "webhook channel not configured".into(),
            ));
        };
        let authorized = header_str(headers, "Authorization")
            .map(|h| yookassa::verify_basic_auth(h, shop_id, secret_key))
            .unwrap_or(false);
        if !authorized {
            return Err(ServiceError::Unauthorized(
                "invalid webhook credentials".into(),
            ));
        }
        return Ok(WebhookEvent::from_yookassa(&payload));
    }

    Err(ServiceError::Unauthorized(
        "unrecognized webhook channel".into(),
    ))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_body(body: &[u8]) -> Result<Value, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))
}
