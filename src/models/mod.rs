pub mod entity_ref;
pub mod order;

pub use entity_ref::EntityRef;
pub use order::{
    Customer, ItemFormat, Order, OrderItem, OrderStatus, PaymentProvider, PaymentStatus,
    ShippingInfo,
};
