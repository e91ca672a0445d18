//! Order Store and Entitlement Store boundaries.
//!
//! The document store that persists orders and download entitlements is an
//! external collaborator; this module defines the seams the engine needs
//! (CRUD plus lookup by payment intent, and a download counter for the
//! refund gate) together with in-memory implementations used for the mock
//! wiring and the test harness.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::ServiceError;
use crate::models::{EntityRef, Order};

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Order>, ServiceError>;

    /// Lookup by the provider-issued payment intent reference.
    async fn find_by_intent(&self, intent_id: &str) -> Result<Option<Order>, ServiceError>;

    async fn insert(&self, order: Order) -> Result<(), ServiceError>;

    /// Writes the order back, checking and incrementing the optimistic
    /// version token. A stale `version` yields `Conflict`.
    async fn update(&self, order: Order) -> Result<Order, ServiceError>;
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Number of successful downloads recorded for a digital entitlement
    /// tied to this order/product pair.
    async fn download_count(
        &self,
        order_id: &str,
        product: &EntityRef,
    ) -> Result<u64, ServiceError>;
}

/// DashMap-backed order store.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, id: &str) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(id).map(|entry| entry.clone()))
    }

    async fn find_by_intent(&self, intent_id: &str) -> Result<Option<Order>, ServiceError> {
        Ok(self
            .orders
            .iter()
            .find(|entry| entry.payment_intent_id.as_deref() == Some(intent_id))
            .map(|entry| entry.clone()))
    }

    async fn insert(&self, order: Order) -> Result<(), ServiceError> {
        self.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn update(&self, mut order: Order) -> Result<Order, ServiceError> {
        let mut entry = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        if entry.version != order.version {
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently (version {} != {})",
                order.id, order.version, entry.version
            )));
        }
        order.version += 1;
        *entry = order.clone();
        Ok(order)
    }
}

/// DashMap-backed entitlement store keyed by (order id, product key).
#[derive(Default)]
pub struct InMemoryEntitlementStore {
    downloads: DashMap<(String, String), u64>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful download. Used by the mock wiring and tests.
    pub fn record_download(&self, order_id: &str, product: &EntityRef) {
        if let Some(key) = product.key() {
            *self
                .downloads
                .entry((order_id.to_string(), key))
                .or_insert(0) += 1;
        }
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn download_count(
        &self,
        order_id: &str,
        product: &EntityRef,
    ) -> Result<u64, ServiceError> {
        let Some(key) = product.key() else {
            return Ok(0);
        };
        Ok(self
            .downloads
            .get(&(order_id.to_string(), key))
            .map(|entry| *entry)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, ItemFormat, OrderItem, OrderStatus, PaymentProvider, PaymentStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: &str) -> Order {
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
                unit_price: dec!(10),
            }],
            shipping: None,
            total: dec!(10),
            created_at: Utc::now(),
            paid_at: None,
            user_id: None,
            customer: Customer {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            },
            version: 0,
        }
    }

    #[tokio::test]
    async fn update_increments_version_and_rejects_stale_writes() {
        let store = InMemoryOrderStore::new();
        store.insert(order("o1")).await.unwrap();

        let fresh = store.get("o1").await.unwrap().unwrap();
        let updated = store.update(fresh.clone()).await.unwrap();
        assert_eq!(updated.version, 1);

        // The stale copy still carries version 0.
        let err = store.update(fresh).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_by_intent_matches_stored_reference() {
        let store = InMemoryOrderStore::new();
        let mut o = order("o2");
        o.payment_intent_id = Some("pi_123".into());
        store.insert(o).await.unwrap();

        let found = store.find_by_intent("pi_123").await.unwrap();
        assert_eq!(found.map(|o| o.id), Some("o2".into()));
        assert!(store.find_by_intent("pi_999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_counts_accumulate_per_product() {
        let store = InMemoryEntitlementStore::new();
        let product = EntityRef::Numeric(5);
        assert_eq!(store.download_count("o1", &product).await.unwrap(), 0);

        store.record_download("o1", &product);
        store.record_download("o1", &product);
        assert_eq!(store.download_count("o1", &product).await.unwrap(), 2);
        assert_eq!(
            store
                .download_count("o1", &EntityRef::Numeric(6))
                .await
                .unwrap(),
            0
        );
    }
}
