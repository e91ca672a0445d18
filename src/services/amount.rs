//! Amount Resolver.
//!
//! The single source of truth for an order's provider-facing amount, used
//! both when creating an intent and when verifying a provider's reported
//! paid amount. The order's stored `total` field is never trusted here.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Order;

/// Fixed delivery surcharge per shipping method, in major units. Unknown
/// methods contribute nothing, consistent with flooring invalid inputs.
const DELIVERY_COSTS: &[(&str, Decimal)] = &[
    ("pickup", dec!(0)),
    ("courier", dec!(350)),
    ("post", dec!(250)),
];

pub fn delivery_cost(method: &str) -> Decimal {
    let needle = method.trim().to_ascii_lowercase();
    DELIVERY_COSTS
        .iter()
        .find(|(name, _)| *name == needle)
        .map(|(_, cost)| *cost)
        .unwrap_or(Decimal::ZERO)
}

/// Canonical minor-unit total for an order: Σ(quantity × unit_price) with
/// negative values floored to zero, plus the delivery surcharge when any
/// item is physical, multiplied by 100 and rounded.
pub fn order_amount_minor(order: &Order) -> i64 {
    let items_total: Decimal = order.items.iter().map(|item| item.line_total()).sum();

    let delivery = if order.has_physical_items() {
        order
            .shipping
            .as_ref()
            .map(|s| delivery_cost(&s.method))
            .unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    ((items_total + delivery) * dec!(100))
        .round()
        .to_i64()
        .unwrap_or(0)
        .max(0)
}

/// Minor-unit total for a single line of an order.
pub fn item_amount_minor(order: &Order, index: usize) -> i64 {
    order
        .items
        .get(index)
        .map(|item| {
            (item.line_total() * dec!(100))
                .round()
                .to_i64()
                .unwrap_or(0)
                .max(0)
        })
        .unwrap_or(0)
}
