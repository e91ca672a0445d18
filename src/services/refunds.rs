//! Refund Executor.
//!
//! Computes and performs the money movement for a cancellation. The card
//! network gateway is consulted for prior refunds so a retried cancellation
//! can never move more money than was captured; every other provider gets a
//! virtual refund that succeeds locally.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;
use crate::gateways::PaymentGateway;
use crate::models::{Order, PaymentProvider, PaymentStatus};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcome {
    /// Whether a refund was even applicable for this order.
    pub attempted: bool,
    /// Whether money actually moved (or a virtual refund succeeded).
    pub refunded: bool,
    pub provider: PaymentProvider,
    pub amount_minor: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl RefundOutcome {
    fn not_attempted(provider: PaymentProvider, currency: &str, reason: &'static str) -> Self {
        Self {
            attempted: false,
            refunded: false,
            provider,
            amount_minor: 0,
            currency: currency.to_string(),
            refund_id: None,
            reason: Some(reason),
        }
    }
}

pub struct RefundExecutor {
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentsConfig,
}

impl RefundExecutor {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: PaymentsConfig) -> Self {
        Self { gateway, config }
    }

    #[instrument(skip(self, order), fields(order_id = %order.id, requested = requested_minor))]
    pub async fn execute(
        &self,
        order: &Order,
        requested_minor: i64,
    ) -> Result<RefundOutcome, ServiceError> {
        if order.payment_status != PaymentStatus::Paid {
            return Ok(RefundOutcome::not_attempted(
                order.payment_provider,
                &self.config.currency,
                "order_not_paid",
            ));
        }
        if requested_minor <= 0 {
            return Ok(RefundOutcome::not_attempted(
                order.payment_provider,
                &self.config.currency,
                "nothing_to_refund",
            ));
        }

        match (order.payment_provider, order.payment_intent_id.as_deref()) {
            (PaymentProvider::Stripe, Some(intent_id)) => {
                self.execute_stripe(order, intent_id, requested_minor).await
            }
            _ => Ok(self.execute_virtual(order, requested_minor)),
        }
    }

    /// List-and-cap against the provider's own refund ledger, so retried
    /// cancellations converge instead of compounding.
    async fn execute_stripe(
        &self,
        order: &Order,
        intent_id: &str,
        requested_minor: i64,
    ) -> Result<RefundOutcome, ServiceError> {
        let snapshot = self.gateway.retrieve_intent(intent_id).await?;
        if !snapshot.currency.eq_ignore_ascii_case(&self.config.currency) {
            warn!(
                order_id = %order.id,
                intent_currency = %snapshot.currency,
                settlement = %self.config.currency,
                "refund refused: intent settled in a different currency"
            );
            return Err(ServiceError::ProviderError(format!(
                "intent {} settled in {} but settlement currency is {}",
                intent_id, snapshot.currency, self.config.currency
            )));
        }

        let already_refunded: i64 = self
            .gateway
            .list_refunds(intent_id)
            .await?
            .iter()
            .filter(|r| r.status != "failed" && r.status != "canceled")
            .map(|r| r.amount_minor)
            .sum();
        let refundable = (snapshot.paid_amount_minor() - already_refunded).max(0);

        if refundable == 0 {
            info!(order_id = %order.id, "intent fully refunded already");
            return Ok(RefundOutcome {
                attempted: true,
                refunded: false,
                provider: PaymentProvider::Stripe,
                amount_minor: 0,
                currency: snapshot.currency,
                refund_id: None,
                reason: Some("nothing_to_refund"),
            });
        }

        let amount = requested_minor.min(refundable);
        let record = self.gateway.create_refund(intent_id, amount).await?;
        info!(order_id = %order.id, refund_id = %record.id, amount, "refund created");

        Ok(RefundOutcome {
            attempted: true,
            refunded: true,
            provider: PaymentProvider::Stripe,
            amount_minor: record.amount_minor,
            currency: record.currency,
            refund_id: Some(record.id),
            reason: None,
        })
    }

    /// No live charge to reverse; the refund succeeds locally.
    fn execute_virtual(&self, order: &Order, requested_minor: i64) -> RefundOutcome {
        info!(order_id = %order.id, amount = requested_minor, "virtual refund recorded");
        RefundOutcome {
            attempted: true,
            refunded: true,
            provider: order.payment_provider,
            amount_minor: requested_minor,
            currency: self.config.currency.clone(),
            refund_id: None,
            reason: Some("virtual_refund"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::gateways::{IntentSnapshot, IntentStatus, MockGateway};
    use crate::models::{Customer, EntityRef, ItemFormat, OrderItem, OrderStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn paid_order(provider: PaymentProvider, intent: Option<&str>) -> Order {
        Order {
            id: "1001".into(),
            status: OrderStatus::Paid,
            payment_status: PaymentStatus::Paid,
            payment_provider: provider,
            payment_intent_id: intent.map(String::from),
            items: vec![OrderItem {
                product: EntityRef::Numeric(1),
                format: ItemFormat::Digital,
                quantity: 1,
                unit_price: dec!(500),
            }],
            shipping: None,
            total: dec!(500),
            created_at: Utc::now(),
            paid_at: Some(Utc::now()),
            user_id: Some("user-1".into()),
            customer: Customer {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            },
            version: 0,
        }
    }

    fn executor(gateway: Arc<MockGateway>) -> RefundExecutor {
        RefundExecutor::new(gateway, PaymentsConfig::default())
    }

    fn seeded_intent(gateway: &MockGateway, id: &str, amount: i64, currency: &str) {
        gateway.insert_intent(IntentSnapshot {
            id: id.into(),
            status: IntentStatus::Succeeded,
            amount_minor: amount,
            amount_received_minor: Some(amount),
            currency: currency.into(),
            created_at: None,
            client_secret: None,
            confirmation_url: None,
        });
    }

    #[tokio::test]
    async fn unpaid_order_is_a_noop() {
        let gateway = Arc::new(MockGateway::new());
        let mut order = paid_order(PaymentProvider::Stripe, Some("pi_1"));
        order.payment_status = PaymentStatus::Pending;

        let outcome = executor(gateway).execute(&order, 50_000).await.unwrap();
        assert!(!outcome.attempted);
        assert!(!outcome.refunded);
        assert_eq!(outcome.reason, Some("order_not_paid"));
    }

    #[tokio::test]
    async fn stripe_refund_caps_at_remaining_refundable() {
        let gateway = Arc::new(MockGateway::new());
        seeded_intent(&gateway, "pi_1", 50_000, "USD");
        gateway.create_refund("pi_1", 30_000).await.unwrap();

        let order = paid_order(PaymentProvider::Stripe, Some("pi_1"));
        let outcome = executor(gateway.clone())
            .execute(&order, 50_000)
            .await
            .unwrap();
        assert!(outcome.refunded);
        assert_eq!(outcome.amount_minor, 20_000);

        let total: i64 = gateway
            .list_refunds("pi_1")
            .await
            .unwrap()
            .iter()
            .map(|r| r.amount_minor)
            .sum();
        assert_eq!(total, 50_000);
    }

    #[tokio::test]
    async fn fully_refunded_intent_is_a_noop() {
        let gateway = Arc::new(MockGateway::new());
        seeded_intent(&gateway, "pi_1", 50_000, "USD");
        gateway.create_refund("pi_1", 50_000).await.unwrap();

        let order = paid_order(PaymentProvider::Stripe, Some("pi_1"));
        let outcome = executor(gateway.clone())
            .execute(&order, 50_000)
            .await
            .unwrap();
        assert!(outcome.attempted);
        assert!(!outcome.refunded);
        assert_eq!(outcome.reason, Some("nothing_to_refund"));
        assert_eq!(gateway.list_refunds("pi_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn foreign_currency_intent_is_refused() {
        let gateway = Arc::new(MockGateway::new());
        seeded_intent(&gateway, "pi_1", 50_000, "EUR");

        let order = paid_order(PaymentProvider::Stripe, Some("pi_1"));
        let err = executor(gateway).execute(&order, 50_000).await.unwrap_err();
        assert!(matches!(err, ServiceError::ProviderError(_)));
    }

    #[tokio::test]
    async fn non_gateway_provider_gets_virtual_refund() {
        let gateway = Arc::new(MockGateway::new());
        let order = paid_order(PaymentProvider::Internal, None);

        let outcome = executor(gateway).execute(&order, 50_000).await.unwrap();
        assert!(outcome.attempted);
        assert!(outcome.refunded);
        assert_eq!(outcome.amount_minor, 50_000);
        assert_eq!(outcome.reason, Some("virtual_refund"));
        assert!(outcome.refund_id.is_none());
    }

    #[tokio::test]
    async fn zero_request_is_a_noop() {
        let gateway = Arc::new(MockGateway::new());
        let order = paid_order(PaymentProvider::Internal, None);

        let outcome = executor(gateway).execute(&order, 0).await.unwrap();
        assert!(!outcome.attempted);
        assert_eq!(outcome.reason, Some("nothing_to_refund"));
    }
}
