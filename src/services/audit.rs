//! Audit Trail Builder.
//!
//! Read-only timeline of an order's monetary history: local lifecycle
//! events plus, for card-network payments, a live re-query of the intent
//! and its refunds. A provider outage degrades to a diagnostic entry
//! instead of failing the whole report.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;
use crate::gateways::PaymentGateway;
use crate::models::{EntityRef, Order, OrderStatus, PaymentProvider, PaymentStatus};
use crate::services::amount::order_amount_minor;
use crate::store::OrderStore;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event: &'static str,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub order_id: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_provider: PaymentProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub events: Vec<AuditEvent>,
}

pub struct AuditTrailBuilder {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentsConfig,
}

impl AuditTrailBuilder {
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
    pub async fn build(
        &self,
        caller_id: &str,
        caller_email: &str,
        order_ref: &EntityRef,
    ) -> Result<AuditReport, ServiceError> {
        let order_key = order_ref
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

        let mut events = local_events(&order);
        if order.payment_provider == PaymentProvider::Stripe {
            if let Some(intent_id) = &order.payment_intent_id {
                self.append_provider_events(intent_id, &mut events).await;
            }
        }
        sort_descending(&mut events);

        Ok(AuditReport {
            amount_minor: order_amount_minor(&order),
            currency: self.config.currency.clone(),
            order_status: order.status,
            payment_status: order.payment_status,
            payment_provider: order.payment_provider,
            payment_intent_id: order.payment_intent_id,
            order_id: order.id,
            events,
        })
    }

    async fn append_provider_events(&self, intent_id: &str, events: &mut Vec<AuditEvent>) {
        match self.gateway.retrieve_intent(intent_id).await {
            Ok(snapshot) => {
                events.push(AuditEvent {
                    event: "intent_created",
                    description: format!("payment intent {} created at provider", snapshot.id),
                    timestamp: snapshot.created_at,
                    amount_minor: Some(snapshot.amount_minor),
                    currency: Some(snapshot.currency.clone()),
                });
                if let Some(received) = snapshot.amount_received_minor {
                    if received > 0 {
                        events.push(AuditEvent {
                            event: "payment_received",
                            description: "provider reports amount captured".into(),
                            timestamp: snapshot.created_at,
                            amount_minor: Some(received),
                            currency: Some(snapshot.currency.clone()),
                        });
                    }
                }
            }
            Err(err) => {
                warn!(intent_id, error = %err, "audit intent query failed");
                events.push(diagnostic_event("intent", err));
                return;
            }
        }

        match self.gateway.list_refunds(intent_id).await {
            Ok(refunds) => {
                for refund in refunds {
                    events.push(AuditEvent {
                        event: "refund",
                        description: format!("refund {} ({})", refund.id, refund.status),
                        timestamp: refund.created_at,
                        amount_minor: Some(refund.amount_minor),
                        currency: Some(refund.currency),
                    });
                }
            }
            Err(err) => {
                warn!(intent_id, error = %err, "audit refund query failed");
                events.push(diagnostic_event("refunds", err));
            }
        }
    }
}

fn local_events(order: &Order) -> Vec<AuditEvent> {
    let mut events = vec![AuditEvent {
        event: "order_created",
        description: format!("order {} created", order.id),
        timestamp: Some(order.created_at),
        amount_minor: None,
        currency: None,
    }];
    if let Some(paid_at) = order.paid_at {
        events.push(AuditEvent {
            event: "payment_marked_paid",
            description: format!("order marked paid via {}", order.payment_provider),
            timestamp: Some(paid_at),
            amount_minor: Some(order_amount_minor(order)),
            currency: None,
        });
    }
    events
}

fn diagnostic_event(scope: &str, err: ServiceError) -> AuditEvent {
    AuditEvent {
        event: "provider_query_failed",
        description: format!("could not fetch {} history: {}", scope, err),
        timestamp: None,
        amount_minor: None,
        currency: None,
    }
}

/// Newest first; entries without a timestamp sink to the end.
fn sort_descending(events: &mut [AuditEvent]) {
    events.sort_by(|a, b| match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
