//! In-process gateway for mock/off modes and the test harness.

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;

use super::{
    CreateIntentRequest, IntentHandle, IntentSnapshot, IntentStatus, PaymentGateway, RefundRecord,
};
use crate::errors::ServiceError;
use crate::models::PaymentProvider;

#[derive(Default)]
pub struct MockGateway {
    intents: DashMap<String, IntentSnapshot>,
    refunds: DashMap<String, Vec<RefundRecord>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn random_id(prefix: &str) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..16)
            .map(|_| {
                let idx = rng.gen_range(0..16);
                char::from_digit(idx, 16).unwrap_or('0')
            })
            .collect();
        format!("{}_{}", prefix, suffix)
    }

    /// Seeds an intent snapshot directly. Test hook for exercising
    /// verification paths (underpayment, wrong currency, pre-success
    /// states) without a live provider.
    pub fn insert_intent(&self, snapshot: IntentSnapshot) {
        self.intents.insert(snapshot.id.clone(), snapshot);
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mock
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<IntentHandle, ServiceError> {
        let id = Self::random_id("mock_pi");
        self.intents.insert(
            id.clone(),
            IntentSnapshot {
                id: id.clone(),
                status: IntentStatus::Succeeded,
                amount_minor: request.amount_minor,
                amount_received_minor: Some(request.amount_minor),
                currency: request.currency.clone(),
                created_at: Some(Utc::now()),
                client_secret: None,
                confirmation_url: None,
            },
        );
        Ok(IntentHandle {
            intent_id: id,
            client_secret: None,
            confirmation_url: None,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ServiceError> {
        self.intents
            .get(intent_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("intent {} not found", intent_id)))
    }

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<RefundRecord>, ServiceError> {
        Ok(self
            .refunds
            .get(intent_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn create_refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<RefundRecord, ServiceError> {
        let currency = self
            .intents
            .get(intent_id)
            .map(|i| i.currency.clone())
            .unwrap_or_else(|| "USD".to_string());
        let record = RefundRecord {
            id: Self::random_id("mock_re"),
            amount_minor,
            currency,
            status: "succeeded".to_string(),
            created_at: Some(Utc::now()),
        };
        self.refunds
            .entry(intent_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_retrieve_roundtrip() {
        let gateway = MockGateway::new();
        let handle = gateway
            .create_intent(&CreateIntentRequest {
                order_id: "1001".into(),
                amount_minor: 50_000,
                currency: "USD".into(),
                description: None,
            })
            .await
            .unwrap();
        assert!(handle.intent_id.starts_with("mock_pi_"));

        let snapshot = gateway.retrieve_intent(&handle.intent_id).await.unwrap();
        assert_eq!(snapshot.amount_minor, 50_000);
        assert!(snapshot.status.is_succeeded());
    }

    #[tokio::test]
    async fn refunds_accumulate() {
        let gateway = MockGateway::new();
        let handle = gateway
            .create_intent(&CreateIntentRequest {
                order_id: "1001".into(),
                amount_minor: 10_000,
                currency: "USD".into(),
                description: None,
            })
            .await
            .unwrap();

        gateway.create_refund(&handle.intent_id, 4_000).await.unwrap();
        gateway.create_refund(&handle.intent_id, 6_000).await.unwrap();

        let refunds = gateway.list_refunds(&handle.intent_id).await.unwrap();
        assert_eq!(refunds.len(), 2);
        assert_eq!(refunds.iter().map(|r| r.amount_minor).sum::<i64>(), 10_000);
    }

    #[tokio::test]
    async fn unknown_intent_is_not_found() {
        let gateway = MockGateway::new();
        let err = gateway.retrieve_intent("mock_pi_missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
