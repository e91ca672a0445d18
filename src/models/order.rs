use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::EntityRef;

/// Fulfillment state machine for an order.
///
/// Moves forward along accepted → paid → printing → ready → completed;
/// `cancelled` is reachable from any non-terminal state except `completed`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Accepted,
    Paid,
    Printing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    fn rank(self) -> u8 {
        match self {
            OrderStatus::Accepted => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Printing => 2,
            OrderStatus::Ready => 3,
            OrderStatus::Completed => 4,
            OrderStatus::Cancelled => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self == target {
            return false;
        }
        match target {
            OrderStatus::Cancelled => !self.is_terminal(),
            OrderStatus::Accepted => false,
            _ => !self.is_terminal() && target.rank() > self.rank(),
        }
    }
}

/// Money state machine, orthogonal to fulfillment but constrained by it.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Only pending→paid, pending→failed and paid→refunded are legal.
    pub fn can_transition_to(self, target: PaymentStatus) -> bool {
        matches!(
            (self, target),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
        )
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Yookassa,
    Mock,
    Internal,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemFormat {
    Digital,
    Physical,
}

/// One line of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    /// Product reference (numeric or text id)
    #[schema(value_type = Object)]
    pub product: EntityRef,
    pub format: ItemFormat,
    pub quantity: u32,
    /// Unit price in major currency units
    #[schema(value_type = String, example = "500.00")]
    pub unit_price: Decimal,
}

impl OrderItem {
    /// Line total in major units; negative unit prices are floored to zero.
    pub fn line_total(&self) -> Decimal {
        let unit = self.unit_price.max(Decimal::ZERO);
        unit * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingInfo {
    pub method: String,
    pub city: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub name: String,
    pub email: String,
}

/// The order aggregate root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    /// Opaque identifier, stable for the order's lifetime
    pub id: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_provider: PaymentProvider,
    /// Provider-issued intent reference; immutable once paid
    pub payment_intent_id: Option<String>,
    pub items: Vec<OrderItem>,
    /// Present only when any item is physical
    pub shipping: Option<ShippingInfo>,
    /// Denormalized subtotal in major units. Never trusted for amount
    /// verification; the resolver recomputes from items + delivery.
    #[schema(value_type = String, example = "500.00")]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the pending→paid transition
    pub paid_at: Option<DateTime<Utc>>,
    /// Authenticated owner, when the order was placed by a known user
    pub user_id: Option<String>,
    pub customer: Customer,
    /// Optimistic concurrency token, incremented on every store update
    #[serde(default)]
    pub version: i64,
}

impl Order {
    pub fn has_physical_items(&self) -> bool {
        self.items.iter().any(|i| i.format == ItemFormat::Physical)
    }

    pub fn is_physical_only(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| i.format == ItemFormat::Physical)
    }

    /// Ownership check: authenticated user id first, then the normalized
    /// lower-cased customer email as fallback.
    pub fn is_owned_by(&self, user_id: &str, email: &str) -> bool {
        if let Some(owner) = &self.user_id {
            if owner == user_id {
                return true;
            }
        }
        !email.trim().is_empty()
            && self.customer.email.trim().to_lowercase() == email.trim().to_lowercase()
    }

    /// Applies the pending→paid transition, setting `paid_at` exactly once.
    pub fn mark_paid(
        &mut self,
        provider: PaymentProvider,
        intent_id: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.payment_status = PaymentStatus::Paid;
        if self.status.can_transition_to(OrderStatus::Paid) {
            self.status = OrderStatus::Paid;
        }
        if self.paid_at.is_none() {
            self.paid_at = Some(now);
        }
        self.payment_provider = provider;
        if intent_id.is_some() {
            self.payment_intent_id = intent_id;
        }
    }
}
