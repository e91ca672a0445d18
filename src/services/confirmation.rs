//! Payment Confirmer.
//!
//! Client-driven confirmation after provider-side authorization. For
//! gateway modes the provider's record is authoritative: the intent is
//! re-fetched and its status, currency and amount verified; the
//! client-supplied status is only trusted in mock/off modes where no
//! external gateway exists.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::{PaymentsConfig, ProviderMode};
use crate::errors::ServiceError;
use crate::gateways::PaymentGateway;
use crate::models::{EntityRef, Order, OrderStatus, PaymentProvider, PaymentStatus};
use crate::services::amount::order_amount_minor;
use crate::store::OrderStore;

#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub order_ref: EntityRef,
    pub payment_intent_id: Option<String>,
    /// Client-asserted outcome, honored only in mock/off modes.
    pub asserted_status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub order_id: String,
    pub payment_status: PaymentStatus,
}

pub struct PaymentConfirmer {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentsConfig,
}

impl PaymentConfirmer {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_ref))]
    pub async fn confirm(
        &self,
        caller_id: &str,
        caller_email: &str,
        request: ConfirmRequest,
    ) -> Result<ConfirmResponse, ServiceError> {
        let order_key = request
            .order_ref
            .key()
            .ok_or_else(|| ServiceError::ValidationError("invalid order id".into()))?;
        let order = self
            .store
            .get(&order_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_key)))?;

        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Completed) {
            return Err(ServiceError::Conflict(format!(
                "Order {} is already {}",
                order.id, order.status
            )));
        }

        if !order.is_owned_by(caller_id, caller_email) {
            return Err(ServiceError::Forbidden(
                "caller does not own this order".into(),
            ));
        }

        // Confirmation retries are idempotent: an order that already
        // reached paid reports success without another write.
        if order.payment_status == PaymentStatus::Paid {
            return Ok(ConfirmResponse {
                order_id: order.id,
                payment_status: PaymentStatus::Paid,
            });
        }

        // Only a pending payment can still become paid; a failed or
        // refunded order stays that way no matter what the client asserts.
        if !order.payment_status.can_transition_to(PaymentStatus::Paid) {
            return Err(ServiceError::Conflict(format!(
                "Order {} payment is {} and cannot be confirmed",
                order.id, order.payment_status
            )));
        }

        match self.config.provider_mode {
            ProviderMode::Off | ProviderMode::Mock => self.confirm_trusted(order, request).await,
            ProviderMode::Stripe | ProviderMode::Yookassa => {
                self.confirm_gateway(order, request).await
            }
        }
    }

    /// No external gateway: the client-asserted status is accepted.
    async fn confirm_trusted(
        &self,
        mut order: Order,
        request: ConfirmRequest,
    ) -> Result<ConfirmResponse, ServiceError> {
        let provider = match self.config.provider_mode {
            ProviderMode::Off => PaymentProvider::Internal,
            _ => PaymentProvider::Mock,
        };

        let asserted = request.asserted_status.as_deref().unwrap_or("paid");
        match asserted {
            "paid" => {
                order.mark_paid(provider, request.payment_intent_id.clone(), Utc::now());
            }
            "failed" => {
                if !order
                    .payment_status
                    .can_transition_to(PaymentStatus::Failed)
                {
                    return Err(ServiceError::Conflict(format!(
                        "Order {} cannot move from {} to failed",
                        order.id, order.payment_status
                    )));
                }
                order.payment_status = PaymentStatus::Failed;
                order.payment_provider = provider;
            }
            other => {
                return Err(ServiceError::ValidationError(format!(
                    "unsupported confirmation status: {}",
                    other
                )));
            }
        }

        let order = self.store.update(order).await?;
        info!(order_id = %order.id, status = %order.payment_status, "payment confirmed (trusted mode)");
        Ok(ConfirmResponse {
            payment_status: order.payment_status,
            order_id: order.id,
        })
    }

    /// Gateway mode: never trust the client; re-fetch the authoritative
    /// intent and verify status, currency and amount.
    async fn confirm_gateway(
        &self,
        mut order: Order,
        request: ConfirmRequest,
    ) -> Result<ConfirmResponse, ServiceError> {
        let intent_id = request
            .payment_intent_id
            .clone()
            .or_else(|| order.payment_intent_id.clone())
            .ok_or_else(|| {
                ServiceError::ValidationError("paymentIntentId is required".into())
            })?;

        let snapshot = self.gateway.retrieve_intent(&intent_id).await?;
        if !snapshot.status.is_succeeded() {
            return Err(ServiceError::ValidationError(format!(
                "payment intent {} is not succeeded (status: {:?})",
                intent_id, snapshot.status
            )));
        }

        let expected_minor = order_amount_minor(&order);
        let paid_minor = snapshot.paid_amount_minor();
        if !snapshot.currency.eq_ignore_ascii_case(&self.config.currency)
            || paid_minor < expected_minor
        {
            warn!(
                order_id = %order.id,
                intent_id = %intent_id,
                paid = paid_minor,
                expected = expected_minor,
                currency = %snapshot.currency,
                "confirmation rejected: amount/currency mismatch"
            );
            return Err(ServiceError::AmountMismatch {
                paid_amount: paid_minor,
                expected_amount: expected_minor,
                paid_currency: snapshot.currency,
                expected_currency: self.config.currency.clone(),
            });
        }

        order.mark_paid(self.gateway.provider(), Some(intent_id.clone()), Utc::now());
        let order = self.store.update(order).await?;
        info!(order_id = %order.id, intent_id = %intent_id, "payment confirmed");

        Ok(ConfirmResponse {
            payment_status: order.payment_status,
            order_id: order.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{IntentSnapshot, IntentStatus, MockGateway};
    use crate::models::{Customer, ItemFormat, OrderItem};
    use crate::store::InMemoryOrderStore;
    use rust_decimal_macros::dec;

    fn pending_order(id: &str) -> Order {
        Order {
            id: id.into(),
            status: OrderStatus::Accepted,
            payment_status: PaymentStatus::Pending,
            payment_provider: PaymentProvider::Unknown,
            payment_intent_id: None,
            items: vec![OrderItem {
                product: EntityRef::Numeric(1),
                format: ItemFormat::Digital,
                quantity: 1,
                unit_price: dec!(500),
            }],
            shipping: None,
            total: dec!(500),
            created_at: Utc::now(),
            paid_at: None,
            user_id: Some("user-1".into()),
            customer: Customer {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            },
            version: 0,
        }
    }

    fn snapshot(id: &str, status: IntentStatus, amount: i64, currency: &str) -> IntentSnapshot {
        IntentSnapshot {
            id: id.into(),
            status,
            amount_minor: amount,
            amount_received_minor: Some(amount),
            currency: currency.into(),
            created_at: None,
            client_secret: None,
            confirmation_url: None,
        }
    }

    fn confirmer(
        mode: ProviderMode,
        store: Arc<InMemoryOrderStore>,
        gateway: Arc<MockGateway>,
    ) -> PaymentConfirmer {
        let mut config = PaymentsConfig::default();
        config.provider_mode = mode;
        PaymentConfirmer::new(store, gateway, config)
    }

    fn request(order: &str, intent: Option<&str>, status: Option<&str>) -> ConfirmRequest {
        ConfirmRequest {
            order_ref: EntityRef::Text(order.into()),
            payment_intent_id: intent.map(String::from),
            asserted_status: status.map(String::from),
        }
    }

    #[tokio::test]
    async fn gateway_confirmation_succeeds_and_sets_paid_at() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o1")).await.unwrap();
        gateway.insert_intent(snapshot("pi_1", IntentStatus::Succeeded, 50_000, "USD"));

        // Mode is stripe in spirit; the mock gateway stands in for the wire.
        let confirmer = confirmer(ProviderMode::Stripe, store.clone(), gateway);
        let response = confirmer
            .confirm("user-1", "ada@example.com", request("o1", Some("pi_1"), None))
            .await
            .unwrap();
        assert_eq!(response.payment_status, PaymentStatus::Paid);

        let stored = store.get("o1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert!(stored.paid_at.is_some());
        assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn underpayment_is_rejected_with_diagnostics() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o2")).await.unwrap();
        gateway.insert_intent(snapshot("pi_2", IntentStatus::Succeeded, 45_000, "USD"));

        let err = confirmer(ProviderMode::Stripe, store, gateway)
            .confirm("user-1", "ada@example.com", request("o2", Some("pi_2"), None))
            .await
            .unwrap_err();
        match err {
            ServiceError::AmountMismatch {
                paid_amount,
                expected_amount,
                ..
            } => {
                assert_eq!(paid_amount, 45_000);
                assert_eq!(expected_amount, 50_000);
            }
            other => panic!("expected AmountMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn currency_mismatch_is_rejected() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o3")).await.unwrap();
        gateway.insert_intent(snapshot("pi_3", IntentStatus::Succeeded, 50_000, "EUR"));

        let err = confirmer(ProviderMode::Stripe, store, gateway)
            .confirm("user-1", "ada@example.com", request("o3", Some("pi_3"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AmountMismatch { .. }));
    }

    #[tokio::test]
    async fn non_succeeded_intent_is_rejected() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o4")).await.unwrap();
        gateway.insert_intent(snapshot("pi_4", IntentStatus::Processing, 50_000, "USD"));

        let err = confirmer(ProviderMode::Stripe, store, gateway)
            .confirm("user-1", "ada@example.com", request("o4", Some("pi_4"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn non_owner_is_forbidden() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o5")).await.unwrap();

        let err = confirmer(ProviderMode::Mock, store, gateway)
            .confirm("intruder", "intruder@example.com", request("o5", None, Some("paid")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn email_fallback_matches_case_insensitively() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o6")).await.unwrap();

        let response = confirmer(ProviderMode::Mock, store, gateway)
            .confirm("someone-else", "ADA@example.COM", request("o6", None, Some("paid")))
            .await
            .unwrap();
        assert_eq!(response.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn cancelled_order_conflicts() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mut order = pending_order("o7");
        order.status = OrderStatus::Cancelled;
        store.insert(order).await.unwrap();

        let err = confirmer(ProviderMode::Mock, store, gateway)
            .confirm("user-1", "ada@example.com", request("o7", None, Some("paid")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn repeated_confirmation_is_idempotent() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o8")).await.unwrap();
        let confirmer = confirmer(ProviderMode::Mock, store.clone(), gateway);

        confirmer
            .confirm("user-1", "ada@example.com", request("o8", None, Some("paid")))
            .await
            .unwrap();
        let first_paid_at = store.get("o8").await.unwrap().unwrap().paid_at;

        confirmer
            .confirm("user-1", "ada@example.com", request("o8", None, Some("paid")))
            .await
            .unwrap();
        assert_eq!(store.get("o8").await.unwrap().unwrap().paid_at, first_paid_at);
    }

    #[tokio::test]
    async fn refunded_order_cannot_be_reconfirmed() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        // Refunded via webhook while fulfillment still reads paid, so the
        // terminal-status guard alone would let this through.
        let mut order = pending_order("o10");
        order.status = OrderStatus::Paid;
        order.payment_status = PaymentStatus::Refunded;
        store.insert(order).await.unwrap();

        let err = confirmer(ProviderMode::Mock, store.clone(), gateway)
            .confirm("user-1", "ada@example.com", request("o10", None, Some("paid")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let stored = store.get("o10").await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn failed_order_cannot_be_confirmed_in_trusted_mode() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mut order = pending_order("o11");
        order.payment_status = PaymentStatus::Failed;
        store.insert(order).await.unwrap();

        let err = confirmer(ProviderMode::Mock, store.clone(), gateway)
            .confirm("user-1", "ada@example.com", request("o11", None, Some("paid")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let stored = store.get("o11").await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn gateway_confirmation_rejects_failed_order() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mut order = pending_order("o12");
        order.payment_status = PaymentStatus::Failed;
        store.insert(order).await.unwrap();
        // Even a succeeded intent does not revive a failed payment.
        gateway.insert_intent(snapshot("pi_12", IntentStatus::Succeeded, 50_000, "USD"));

        let err = confirmer(ProviderMode::Stripe, store.clone(), gateway)
            .confirm("user-1", "ada@example.com", request("o12", Some("pi_12"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let stored = store.get("o12").await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn trusted_mode_accepts_failed_assertion() {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        store.insert(pending_order("o9")).await.unwrap();

        let response = confirmer(ProviderMode::Mock, store.clone(), gateway)
            .confirm("user-1", "ada@example.com", request("o9", None, Some("failed")))
            .await
            .unwrap();
        assert_eq!(response.payment_status, PaymentStatus::Failed);
    }
}
