//! HTTP handlers for the versioned API.

pub mod orders;
pub mod payment_webhooks;
pub mod payments;

pub use crate::AppState;
