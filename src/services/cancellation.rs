//! Cancellation Engine.
//!
//! User-initiated cancellation of a whole order or one line of it, guarded
//! by ownership, fulfillment state, a time window from order creation, and
//! the digital download gate. Any refund is computed and executed before
//! the order state is persisted, so a failed provider call leaves the
//! order untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::{EntityRef, Order, OrderItem, OrderStatus, PaymentStatus};
use crate::services::amount::{item_amount_minor, order_amount_minor};
use crate::services::refunds::{RefundExecutor, RefundOutcome};
use crate::store::{EntitlementStore, OrderStore};

/// Minutes after creation during which an order with any digital item can
/// be cancelled.
const DIGITAL_WINDOW_MINUTES: i64 = 30;

/// Minutes for physical-only orders, which have no instant-delivery risk.
/// Mixed carts deliberately get the shorter digital window.
const PHYSICAL_WINDOW_MINUTES: i64 = 720;

#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub order_ref: EntityRef,
    /// Cancel a single line identified by product id.
    pub item: Option<EntityRef>,
    /// Cancel a single line identified by position.
    pub item_index: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    Order,
    Item,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub order: Order,
    pub mode: CancelMode,
    pub refund: RefundOutcome,
}

/// Window length applicable to this order's composition.
pub fn cancellation_window(order: &Order) -> Duration {
    if order.is_physical_only() {
        Duration::minutes(PHYSICAL_WINDOW_MINUTES)
    } else {
        Duration::minutes(DIGITAL_WINDOW_MINUTES)
    }
}

/// True while the order is still inside its cancellation window.
pub fn within_window(order: &Order, now: DateTime<Utc>) -> bool {
    now - order.created_at <= cancellation_window(order)
}

pub struct CancellationEngine {
    store: Arc<dyn OrderStore>,
    entitlements: Arc<dyn EntitlementStore>,
    refunds: RefundExecutor,
}

impl CancellationEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        entitlements: Arc<dyn EntitlementStore>,
        refunds: RefundExecutor,
    ) -> Self {
        Self {
            store,
            entitlements,
            refunds,
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_ref))]
    pub async fn cancel(
        &self,
        caller_id: &str,
        caller_email: &str,
        request: CancelRequest,
    ) -> Result<CancelResponse, ServiceError> {
        let order_key = request
            .order_ref
            .key()
            .ok_or_else(|| ServiceError::ValidationError("invalid order id".into()))?;
        let order = self
            .store
            .get(&order_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_key)))?;

        if !order.is_owned_by(caller_id, caller_email) {
            return Err(ServiceError::Forbidden(
                "caller does not own this order".into(),
            ));
        }

        if matches!(
            order.status,
            OrderStatus::Ready | OrderStatus::Completed | OrderStatus::Cancelled
        ) {
            return Err(ServiceError::Conflict(format!(
                "Order {} can no longer be cancelled (status: {})",
                order.id, order.status
            )));
        }

        let now = Utc::now();
        if !within_window(&order, now) {
            return Err(ServiceError::InvalidOperation(format!(
                "cancellation window of {} minutes has passed",
                cancellation_window(&order).num_minutes()
            )));
        }

        match self.select_item(&order, &request)? {
            Some(index) if order.items.len() > 1 => self.cancel_item(order, index).await,
            // A single-item order collapses to a whole-order cancellation.
            _ => self.cancel_order(order).await,
        }
    }

    /// Resolves the requested line, if the request targets one.
    fn select_item(
        &self,
        order: &Order,
        request: &CancelRequest,
    ) -> Result<Option<usize>, ServiceError> {
        if let Some(index) = request.item_index {
            if index >= order.items.len() {
                return Err(ServiceError::ValidationError(format!(
                    "order {} has no item at index {}",
                    order.id, index
                )));
            }
            return Ok(Some(index));
        }
        if let Some(item_ref) = &request.item {
            let wanted = item_ref.key().ok_or_else(|| {
                ServiceError::ValidationError("invalid item id".into())
            })?;
            let index = order
                .items
                .iter()
                .position(|i| i.product.key().as_deref() == Some(wanted.as_str()))
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "order {} has no item {}",
                        order.id, wanted
                    ))
                })?;
            return Ok(Some(index));
        }
        Ok(None)
    }

    /// A paid digital item with a recorded download cannot be returned.
    async fn check_download_gate(
        &self,
        order: &Order,
        items: &[OrderItem],
    ) -> Result<(), ServiceError> {
        if order.payment_status != PaymentStatus::Paid {
            return Ok(());
        }
        for item in items {
            if item.format != crate::models::ItemFormat::Digital {
                continue;
            }
            let downloads = self
                .entitlements
                .download_count(&order.id, &item.product)
                .await?;
            if downloads > 0 {
                return Err(ServiceError::InvalidOperation(format!(
                    "item {} has been downloaded and cannot be refunded",
                    item.product
                )));
            }
        }
        Ok(())
    }

    async fn cancel_order(&self, mut order: Order) -> Result<CancelResponse, ServiceError> {
        self.check_download_gate(&order, &order.items).await?;

        let refund = self
            .refunds
            .execute(&order, order_amount_minor(&order))
            .await?;

        order.status = OrderStatus::Cancelled;
        if refund.refunded
            && order
                .payment_status
                .can_transition_to(PaymentStatus::Refunded)
        {
            order.payment_status = PaymentStatus::Refunded;
        }
        let order = self.store.update(order).await?;
        info!(order_id = %order.id, refunded = refund.refunded, "order cancelled");

        Ok(CancelResponse {
            order,
            mode: CancelMode::Order,
            refund,
        })
    }

    async fn cancel_item(
        &self,
        mut order: Order,
        index: usize,
    ) -> Result<CancelResponse, ServiceError> {
        let item = order.items[index].clone();
        self.check_download_gate(&order, std::slice::from_ref(&item))
            .await?;

        let refund = self
            .refunds
            .execute(&order, item_amount_minor(&order, index))
            .await?;

        let removed = order.items.remove(index);
        order.total = (order.total - removed.line_total()).max(rust_decimal::Decimal::ZERO);
        if refund.refunded
            && order
                .payment_status
                .can_transition_to(PaymentStatus::Refunded)
        {
            order.payment_status = PaymentStatus::Refunded;
        }
        let order = self.store.update(order).await?;
        info!(
            order_id = %order.id,
            item = %removed.product,
            refunded = refund.refunded,
            "order item cancelled"
        );

        Ok(CancelResponse {
            order,
            mode: CancelMode::Item,
            refund,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::gateways::MockGateway;
    use crate::models::{Customer, ItemFormat, PaymentProvider};
    use crate::store::{InMemoryEntitlementStore, InMemoryOrderStore};
    use rust_decimal_macros::dec;

    fn item(product: i64, format: ItemFormat, unit_price: rust_decimal::Decimal) -> OrderItem {
        OrderItem {
            product: EntityRef::Numeric(product),
            format,
            quantity: 1,
            unit_price,
        }
    }

    fn order(id: &str, items: Vec<OrderItem>, age_minutes: i64) -> Order {
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
            created_at: Utc::now() - Duration::minutes(age_minutes),
            paid_at: None,
            user_id: Some("user-1".into()),
            customer: Customer {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            },
            version: 0,
        }
    }

    struct Fixture {
        store: Arc<InMemoryOrderStore>,
        entitlements: Arc<InMemoryEntitlementStore>,
        engine: CancellationEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryOrderStore::new());
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        let refunds = RefundExecutor::new(Arc::new(MockGateway::new()), PaymentsConfig::default());
        let engine = CancellationEngine::new(store.clone(), entitlements.clone(), refunds);
        Fixture {
            store,
            entitlements,
            engine,
        }
    }

    fn whole_order(order: &str) -> CancelRequest {
        CancelRequest {
            order_ref: EntityRef::Text(order.into()),
            item: None,
            item_index: None,
        }
    }

    #[tokio::test]
    async fn pending_digital_order_cancels_without_refund() {
        let f = fixture();
        f.store
            .insert(order("o1", vec![item(1, ItemFormat::Digital, dec!(500))], 5))
            .await
            .unwrap();

        let response = f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o1"))
            .await
            .unwrap();
        assert_eq!(response.mode, CancelMode::Order);
        assert_eq!(response.order.status, OrderStatus::Cancelled);
        assert!(!response.refund.attempted);
        assert_eq!(response.order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn paid_order_cancellation_refunds_and_flips_payment_status() {
        let f = fixture();
        let mut o = order("o2", vec![item(1, ItemFormat::Digital, dec!(500))], 5);
        o.mark_paid(PaymentProvider::Internal, None, Utc::now());
        f.store.insert(o).await.unwrap();

        let response = f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o2"))
            .await
            .unwrap();
        assert!(response.refund.refunded);
        assert_eq!(response.refund.amount_minor, 50_000);
        assert_eq!(response.order.payment_status, PaymentStatus::Refunded);
        assert_eq!(response.order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn digital_window_closes_after_thirty_minutes() {
        let f = fixture();
        f.store
            .insert(order("o3", vec![item(1, ItemFormat::Digital, dec!(500))], 31))
            .await
            .unwrap();

        let err = f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o3"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn digital_order_inside_window_at_twenty_nine_minutes() {
        let f = fixture();
        f.store
            .insert(order("o4", vec![item(1, ItemFormat::Digital, dec!(500))], 29))
            .await
            .unwrap();

        assert!(f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o4"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn physical_only_order_gets_long_window() {
        let f = fixture();
        f.store
            .insert(order(
                "o5",
                vec![item(1, ItemFormat::Physical, dec!(200))],
                600,
            ))
            .await
            .unwrap();

        assert!(f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o5"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn mixed_cart_gets_the_short_window() {
        let f = fixture();
        f.store
            .insert(order(
                "o6",
                vec![
                    item(1, ItemFormat::Digital, dec!(500)),
                    item(2, ItemFormat::Physical, dec!(200)),
                ],
                60,
            ))
            .await
            .unwrap();

        let err = f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o6"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn downloaded_digital_item_blocks_cancellation() {
        let f = fixture();
        let mut o = order("o7", vec![item(1, ItemFormat::Digital, dec!(500))], 5);
        o.mark_paid(PaymentProvider::Internal, None, Utc::now());
        f.store.insert(o).await.unwrap();
        f.entitlements.record_download("o7", &EntityRef::Numeric(1));

        let err = f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o7"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));

        let stored = f.store.get("o7").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn single_item_cancel_on_multi_item_order_reduces_it() {
        let f = fixture();
        let mut o = order(
            "o8",
            vec![
                item(1, ItemFormat::Digital, dec!(500)),
                item(2, ItemFormat::Digital, dec!(300)),
            ],
            5,
        );
        o.mark_paid(PaymentProvider::Internal, None, Utc::now());
        f.store.insert(o).await.unwrap();

        let response = f
            .engine
            .cancel(
                "user-1",
                "ada@example.com",
                CancelRequest {
                    order_ref: EntityRef::Text("o8".into()),
                    item: Some(EntityRef::Numeric(2)),
                    item_index: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.mode, CancelMode::Item);
        assert_eq!(response.refund.amount_minor, 30_000);
        assert_eq!(response.order.items.len(), 1);
        assert_eq!(response.order.total, dec!(500));
        assert_ne!(response.order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn item_cancel_on_single_item_order_cancels_the_order() {
        let f = fixture();
        f.store
            .insert(order("o9", vec![item(1, ItemFormat::Digital, dec!(500))], 5))
            .await
            .unwrap();

        let response = f
            .engine
            .cancel(
                "user-1",
                "ada@example.com",
                CancelRequest {
                    order_ref: EntityRef::Text("o9".into()),
                    item: Some(EntityRef::Numeric(1)),
                    item_index: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.mode, CancelMode::Order);
        assert_eq!(response.order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn ready_order_cannot_be_cancelled() {
        let f = fixture();
        let mut o = order("o10", vec![item(1, ItemFormat::Physical, dec!(200))], 5);
        o.status = OrderStatus::Ready;
        f.store.insert(o).await.unwrap();

        let err = f
            .engine
            .cancel("user-1", "ada@example.com", whole_order("o10"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn non_owner_cannot_cancel() {
        let f = fixture();
        f.store
            .insert(order("o11", vec![item(1, ItemFormat::Digital, dec!(500))], 5))
            .await
            .unwrap();

        let err = f
            .engine
            .cancel("mallory", "mallory@example.com", whole_order("o11"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unknown_item_reference_is_not_found() {
        let f = fixture();
        f.store
            .insert(order(
                "o12",
                vec![
                    item(1, ItemFormat::Digital, dec!(500)),
                    item(2, ItemFormat::Digital, dec!(300)),
                ],
                5,
            ))
            .await
            .unwrap();

        let err = f
            .engine
            .cancel(
                "user-1",
                "ada@example.com",
                CancelRequest {
                    order_ref: EntityRef::Text("o12".into()),
                    item: Some(EntityRef::Numeric(99)),
                    item_index: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
