//! Payment gateway abstraction.
//!
//! One trait per the engine's needs — intent creation/retrieval, refund
//! listing/creation — with a concrete implementation per provider and an
//! in-process one for mock/off modes. All amounts crossing this boundary
//! are integers in minor currency units.

pub mod mock;
pub mod stripe;
pub mod yookassa;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::PaymentProvider;

pub use mock::MockGateway;
pub use stripe::StripeGateway;
pub use yookassa::YookassaGateway;

/// Provider-side intent lifecycle, normalized across gateways.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    WaitingForCapture,
    Pending,
    Succeeded,
    Canceled,
    Failed,
    Unknown,
}

impl IntentStatus {
    /// Pre-success states in which an existing intent may be reused for a
    /// new confirmation attempt instead of creating a duplicate charge.
    pub fn is_reusable(self) -> bool {
        matches!(
            self,
            IntentStatus::RequiresPaymentMethod
                | IntentStatus::RequiresConfirmation
                | IntentStatus::RequiresAction
                | IntentStatus::Pending
                | IntentStatus::WaitingForCapture
        )
    }

    pub fn is_succeeded(self) -> bool {
        self == IntentStatus::Succeeded
    }
}

#[derive(Clone, Debug)]
pub struct CreateIntentRequest {
    pub order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub description: Option<String>,
}

/// What the client needs to complete provider-side authorization.
#[derive(Clone, Debug)]
pub struct IntentHandle {
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub confirmation_url: Option<String>,
}

/// The provider's authoritative record of an intent.
#[derive(Clone, Debug)]
pub struct IntentSnapshot {
    pub id: String,
    pub status: IntentStatus,
    pub amount_minor: i64,
    /// Amount actually received, when the provider reports it separately.
    pub amount_received_minor: Option<i64>,
    pub currency: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Present when the provider lets a pre-success intent be resumed.
    pub client_secret: Option<String>,
    pub confirmation_url: Option<String>,
}

impl IntentSnapshot {
    /// The amount to verify against: amount-received when present, else
    /// the authorized amount.
    pub fn paid_amount_minor(&self) -> i64 {
        self.amount_received_minor.unwrap_or(self.amount_minor)
    }
}

#[derive(Clone, Debug)]
pub struct RefundRecord {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<IntentHandle, ServiceError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ServiceError>;

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<RefundRecord>, ServiceError>;

    async fn create_refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<RefundRecord, ServiceError>;
}

/// Constant-time string comparison for signature and token checks.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
