//! Intent Issuer.
//!
//! Resolves or creates a provider payment intent for an order according to
//! the configured provider mode, reusing a stored intent while it is still
//! in a reusable pre-success state so the provider never carries duplicate
//! live charges for one order.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::config::{PaymentsConfig, ProviderMode};
use crate::errors::ServiceError;
use crate::gateways::{CreateIntentRequest, PaymentGateway};
use crate::models::{EntityRef, Order, PaymentProvider, PaymentStatus};
use crate::services::amount::order_amount_minor;
use crate::store::OrderStore;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueIntentResponse {
    pub order_id: String,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_url: Option<String>,
}

pub struct IntentIssuer {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentsConfig,
}

impl IntentIssuer {
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

    #[instrument(skip(self), fields(order_id = %order_ref))]
    pub async fn issue(&self, order_ref: &EntityRef) -> Result<IssueIntentResponse, ServiceError> {
        let order_key = order_ref
            .key()
            .ok_or_else(|| ServiceError::ValidationError("invalid order id".into()))?;
        let order = self
            .store
            .get(&order_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_key)))?;

        // Issuing an intent only makes sense while the payment can still
        // become paid; paid, refunded and failed orders all conflict.
        if !order.payment_status.can_transition_to(PaymentStatus::Paid) {
            return Err(ServiceError::Conflict(format!(
                "Order {} payment is already {}",
                order.id, order.payment_status
            )));
        }

        let amount_minor = order_amount_minor(&order);
        if amount_minor <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Order {} resolves to a non-positive amount",
                order.id
            )));
        }

        match self.config.provider_mode {
            ProviderMode::Off => self.issue_off(order).await,
            ProviderMode::Mock => self.issue_mock(order, amount_minor).await,
            ProviderMode::Stripe | ProviderMode::Yookassa => {
                self.issue_gateway(order, amount_minor).await
            }
        }
    }

    /// No provider configured: the order is reported paid immediately.
    async fn issue_off(&self, mut order: Order) -> Result<IssueIntentResponse, ServiceError> {
        order.mark_paid(PaymentProvider::Internal, None, Utc::now());
        let order = self.store.update(order).await?;
        info!(order_id = %order.id, "payments off; order marked paid");
        Ok(IssueIntentResponse {
            order_id: order.id,
            payment_status: PaymentStatus::Paid,
            payment_intent_id: None,
            client_secret: None,
            confirmation_url: None,
        })
    }

    async fn issue_mock(
        &self,
        mut order: Order,
        amount_minor: i64,
    ) -> Result<IssueIntentResponse, ServiceError> {
        if let Some(existing) = order.payment_intent_id.clone() {
            if order.payment_status == PaymentStatus::Pending
                && order.payment_provider == PaymentProvider::Mock
            {
                return Ok(IssueIntentResponse {
                    order_id: order.id,
                    payment_status: PaymentStatus::Pending,
                    payment_intent_id: Some(existing),
                    client_secret: None,
                    confirmation_url: None,
                });
            }
        }

        let handle = self
            .gateway
            .create_intent(&CreateIntentRequest {
                order_id: order.id.clone(),
                amount_minor,
                currency: self.config.currency.clone(),
                description: None,
            })
            .await?;

        order.payment_provider = PaymentProvider::Mock;
        order.payment_intent_id = Some(handle.intent_id.clone());
        order.payment_status = PaymentStatus::Pending;
        let order = self.store.update(order).await?;

        Ok(IssueIntentResponse {
            order_id: order.id,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: Some(handle.intent_id),
            client_secret: None,
            confirmation_url: None,
        })
    }

    async fn issue_gateway(
        &self,
        mut order: Order,
        amount_minor: i64,
    ) -> Result<IssueIntentResponse, ServiceError> {
        // Reuse the stored intent while the provider still reports it in a
        // pre-success state; a stale or failed intent gets reissued.
        if let Some(existing) = order.payment_intent_id.clone() {
            match self.gateway.retrieve_intent(&existing).await {
                Ok(snapshot) if snapshot.status.is_reusable() => {
                    info!(order_id = %order.id, intent_id = %existing, "reusing payment intent");
                    return Ok(IssueIntentResponse {
                        order_id: order.id,
                        payment_status: PaymentStatus::Pending,
                        payment_intent_id: Some(existing),
                        client_secret: snapshot.client_secret,
                        confirmation_url: snapshot.confirmation_url,
                    });
                }
                Ok(snapshot) => {
                    info!(
                        order_id = %order.id,
                        intent_id = %existing,
                        status = ?snapshot.status,
                        "stored intent not reusable; reissuing"
                    );
                }
                Err(ServiceError::NotFound(_)) => {
                    info!(order_id = %order.id, intent_id = %existing, "stored intent unknown to provider; reissuing");
                }
                Err(other) => return Err(other),
            }
        }

        let handle = self
            .gateway
            .create_intent(&CreateIntentRequest {
                order_id: order.id.clone(),
                amount_minor,
                currency: self.config.currency.clone(),
                description: Some(format!("Order {}", order.id)),
            })
            .await?;

        order.payment_provider = self.gateway.provider();
        order.payment_intent_id = Some(handle.intent_id.clone());
        order.payment_status = PaymentStatus::Pending;
        let order = self.store.update(order).await?;
        info!(order_id = %order.id, intent_id = %handle.intent_id, "payment intent created");

        Ok(IssueIntentResponse {
            order_id: order.id,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: Some(handle.intent_id),
            client_secret: handle.client_secret,
            confirmation_url: handle.confirmation_url,
        })
    }
}
