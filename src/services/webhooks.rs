//! Webhook Reconciler.
//!
//! Normalizes provider notification payloads into a single event shape,
//! classifies them, and applies the resulting payment transition to the
//! order. Retries, duplicates and unknown event types are acknowledged
//! without a write so providers never build up retry queues.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;
use crate::models::{EntityRef, Order, PaymentProvider, PaymentStatus};
use crate::services::amount::order_amount_minor;
use crate::store::OrderStore;

/// What a notification asks the order state to become.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookAction {
    Paid,
    Failed,
    Refunded,
    Ignored,
}

impl WebhookAction {
    fn target_status(self) -> Option<PaymentStatus> {
        match self {
            WebhookAction::Paid => Some(PaymentStatus::Paid),
            WebhookAction::Failed => Some(PaymentStatus::Failed),
            WebhookAction::Refunded => Some(PaymentStatus::Refunded),
            WebhookAction::Ignored => None,
        }
    }
}

/// Provider-neutral notification, produced by the per-channel parsers
/// after authenticity has already been established.
#[derive(Clone, Debug)]
pub struct WebhookEvent {
    pub action: WebhookAction,
    pub provider: PaymentProvider,
    pub event_type: String,
    pub intent_id: Option<String>,
    pub order_ref: Option<EntityRef>,
    /// Amount the provider reports as captured, when the payload carries one.
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
}

impl WebhookEvent {
    /// Parses a card-network event envelope (`type` + `data.object`).
    pub fn from_stripe(payload: &Value) -> Self {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let object = payload
            .get("data")
            .and_then(|d| d.get("object"))
            .cloned()
            .unwrap_or(Value::Null);

        let action = match event_type.as_str() {
            "payment_intent.succeeded" => WebhookAction::Paid,
            "payment_intent.payment_failed" | "payment_intent.canceled" => WebhookAction::Failed,
            "charge.refunded" | "refund.created" => WebhookAction::Refunded,
            _ => WebhookAction::Ignored,
        };

        // On charge events the intent reference lives in `payment_intent`,
        // on intent events it is the object id itself.
        let intent_id = object
            .get("payment_intent")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| {
                object
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| id.starts_with("pi_"))
                    .map(String::from)
            });

        let amount_minor = match action {
            WebhookAction::Paid => object
                .get("amount_received")
                .and_then(Value::as_i64)
                .or_else(|| object.get("amount").and_then(Value::as_i64)),
            _ => None,
        };

        Self {
            action,
            provider: PaymentProvider::Stripe,
            event_type,
            intent_id,
            order_ref: object
                .get("metadata")
                .and_then(|m| m.get("order_id"))
                .map(EntityRef::parse),
            amount_minor,
            currency: object
                .get("currency")
                .and_then(Value::as_str)
                .map(str::to_uppercase),
        }
    }

    /// Parses a regional-gateway notification (`event` + `object`).
    pub fn from_yookassa(payload: &Value) -> Self {
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let object = payload.get("object").cloned().unwrap_or(Value::Null);

        let action = match event_type.as_str() {
            "payment.succeeded" => WebhookAction::Paid,
            "payment.canceled" => WebhookAction::Failed,
            "refund.succeeded" => WebhookAction::Refunded,
            _ => WebhookAction::Ignored,
        };

        // Refund objects reference the payment via `payment_id`.
        let intent_id = object
            .get("payment_id")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| object.get("id").and_then(Value::as_str).map(String::from));

        let amount_minor = match action {
            WebhookAction::Paid => object
                .get("amount")
                .and_then(|a| a.get("value"))
                .and_then(Value::as_str)
                .and_then(parse_major_units),
            _ => None,
        };

        Self {
            action,
            provider: PaymentProvider::Yookassa,
            event_type,
            intent_id,
            order_ref: object
                .get("metadata")
                .and_then(|m| m.get("order_id"))
                .map(EntityRef::parse),
            amount_minor,
            currency: object
                .get("amount")
                .and_then(|a| a.get("currency"))
                .and_then(Value::as_str)
                .map(str::to_uppercase),
        }
    }

    /// Parses an internal shared-token notification. The sender is already
    /// trusted, so no amount verification fields are expected.
    pub fn from_internal(payload: &Value) -> Self {
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let action = match event_type.as_str() {
            "paid" => WebhookAction::Paid,
            "failed" => WebhookAction::Failed,
            "refunded" => WebhookAction::Refunded,
            _ => WebhookAction::Ignored,
        };

        Self {
            action,
            provider: PaymentProvider::Internal,
            event_type,
            intent_id: payload
                .get("paymentIntentId")
                .and_then(Value::as_str)
                .map(String::from),
            order_ref: payload.get("orderId").map(EntityRef::parse),
            amount_minor: None,
            currency: None,
        }
    }
}

fn parse_major_units(value: &str) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;
    let major: Decimal = value.parse().ok()?;
    (major * Decimal::from(100)).round().to_i64()
}

/// True when the incoming event would not change the order: the target
/// payment status, provider and intent reference already match what is
/// stored. Duplicates are acknowledged without a write.
pub fn is_duplicate(order: &Order, event: &WebhookEvent) -> bool {
    let Some(target) = event.action.target_status() else {
        return false;
    };
    if order.payment_status != target {
        return false;
    }
    if order.payment_provider != event.provider {
        return false;
    }
    match (&event.intent_id, &order.payment_intent_id) {
        (Some(incoming), Some(stored)) if incoming != stored => false,
        _ => target != PaymentStatus::Paid || order.paid_at.is_some(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl ReconcileOutcome {
    fn ignored(reason: &'static str, order_id: Option<String>) -> Self {
        Self {
            applied: false,
            reason: Some(reason),
            order_id,
        }
    }
}

pub struct WebhookReconciler {
    store: Arc<dyn OrderStore>,
    config: PaymentsConfig,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn OrderStore>, config: PaymentsConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type, provider = %event.provider))]
    pub async fn reconcile(&self, event: WebhookEvent) -> Result<ReconcileOutcome, ServiceError> {
        let Some(target) = event.action.target_status() else {
            info!("unhandled event type acknowledged");
            return Ok(ReconcileOutcome::ignored("unhandled_event_type", None));
        };

        let Some(mut order) = self.resolve_order(&event).await? else {
            info!("event does not resolve to a known order");
            return Ok(ReconcileOutcome::ignored("order_not_resolved", None));
        };

        if is_duplicate(&order, &event) {
            info!(order_id = %order.id, "duplicate event acknowledged");
            return Ok(ReconcileOutcome::ignored("duplicate_event", Some(order.id)));
        }

        if event.action == WebhookAction::Paid && order.status.is_terminal() {
            warn!(order_id = %order.id, status = %order.status, "paid event for terminal order ignored");
            return Ok(ReconcileOutcome::ignored(
                "order_terminal_status",
                Some(order.id),
            ));
        }

        if !order.payment_status.can_transition_to(target) {
            info!(
                order_id = %order.id,
                from = %order.payment_status,
                to = %target,
                "event would make an illegal payment transition; acknowledged"
            );
            return Ok(ReconcileOutcome::ignored(
                "illegal_transition",
                Some(order.id),
            ));
        }

        if event.action == WebhookAction::Paid {
            self.verify_paid_amount(&order, &event)?;
        }

        match event.action {
            WebhookAction::Paid => {
                order.mark_paid(event.provider, event.intent_id.clone(), Utc::now());
            }
            WebhookAction::Failed => {
                order.payment_status = PaymentStatus::Failed;
                order.payment_provider = event.provider;
                if order.payment_intent_id.is_none() {
                    order.payment_intent_id = event.intent_id.clone();
                }
            }
            WebhookAction::Refunded => {
                order.payment_status = PaymentStatus::Refunded;
            }
            WebhookAction::Ignored => unreachable!("filtered above"),
        }

        let order = self.store.update(order).await?;
        info!(order_id = %order.id, status = %order.payment_status, "webhook applied");
        Ok(ReconcileOutcome {
            applied: true,
            reason: None,
            order_id: Some(order.id),
        })
    }

    /// Metadata order id first, then lookup by the stored intent reference.
    async fn resolve_order(&self, event: &WebhookEvent) -> Result<Option<Order>, ServiceError> {
        if let Some(key) = event.order_ref.as_ref().and_then(EntityRef::key) {
            if let Some(order) = self.store.get(&key).await? {
                return Ok(Some(order));
            }
        }
        if let Some(intent_id) = &event.intent_id {
            return self.store.find_by_intent(intent_id).await;
        }
        Ok(None)
    }

    /// Signature-verified payloads carry the captured amount; it still has
    /// to cover the locally resolved total in the settlement currency.
    fn verify_paid_amount(&self, order: &Order, event: &WebhookEvent) -> Result<(), ServiceError> {
        let (Some(paid_minor), Some(currency)) = (event.amount_minor, event.currency.as_deref())
        else {
            // Internal channel events carry no amount; the sender is trusted.
            return Ok(());
        };

        let expected_minor = order_amount_minor(order);
        if !currency.eq_ignore_ascii_case(&self.config.currency) || paid_minor < expected_minor {
            warn!(
                order_id = %order.id,
                paid = paid_minor,
                expected = expected_minor,
                currency = %currency,
                "webhook paid amount does not cover the order"
            );
            return Err(ServiceError::AmountMismatch {
                paid_amount: paid_minor,
                expected_amount: expected_minor,
                paid_currency: currency.to_string(),
                expected_currency: self.config.currency.clone(),
            });
        }
        Ok(())
    }
}
