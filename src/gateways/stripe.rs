//! Card-network gateway client (Stripe REST API).

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use super::{
    constant_time_eq, CreateIntentRequest, IntentHandle, IntentSnapshot, IntentStatus,
    PaymentGateway, RefundRecord,
};
use crate::errors::ServiceError;
use crate::models::PaymentProvider;

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Clock skew allowance for webhook timestamps from the future.
const FUTURE_SKEW_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct PaymentIntentPayload {
    id: String,
    status: String,
    amount: i64,
    #[serde(default)]
    amount_received: Option<i64>,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    created: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefundPayload {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    created: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefundListPayload {
    data: Vec<RefundPayload>,
}

fn epoch_to_utc(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

fn parse_intent_status(raw: &str) -> IntentStatus {
    match raw {
        "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
        "requires_confirmation" => IntentStatus::RequiresConfirmation,
        "requires_action" => IntentStatus::RequiresAction,
        "processing" => IntentStatus::Processing,
        "requires_capture" => IntentStatus::WaitingForCapture,
        "succeeded" => IntentStatus::Succeeded,
        "canceled" => IntentStatus::Canceled,
        _ => IntentStatus::Unknown,
    }
}

impl PaymentIntentPayload {
    fn into_snapshot(self) -> IntentSnapshot {
        IntentSnapshot {
            status: parse_intent_status(&self.status),
            amount_minor: self.amount,
            amount_received_minor: self.amount_received,
            currency: self.currency.to_uppercase(),
            created_at: epoch_to_utc(self.created),
            client_secret: self.client_secret,
            confirmation_url: None,
            id: self.id,
        }
    }
}

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            api_base: API_BASE.to_string(),
        }
    }

    /// Points the client at a different API host. Used by tests.
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    async fn send_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("stripe request failed: {}", e)))?;
        check_status(response).await
    }

    async fn send_get(&self, path: &str) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .client
            .get(format!("{}/{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("stripe request failed: {}", e)))?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::ProviderError(format!(
        "stripe returned {}: {}",
        status, body
    )))
}

#[async_trait::async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<IntentHandle, ServiceError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            (
                "metadata[order_id]".to_string(),
                request.order_id.clone(),
            ),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(description) = &request.description {
            form.push(("description".to_string(), description.clone()));
        }

        let payload: PaymentIntentPayload = self
            .send_form("payment_intents", &form)
            .await?
            .json()
            .await
            .map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse stripe response: {}", e))
            })?;

        Ok(IntentHandle {
            confirmation_url: None,
            client_secret: payload.client_secret.clone(),
            intent_id: payload.id,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ServiceError> {
        let payload: PaymentIntentPayload = self
            .send_get(&format!("payment_intents/{}", intent_id))
            .await?
            .json()
            .await
            .map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse stripe response: {}", e))
            })?;
        Ok(payload.into_snapshot())
    }

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<RefundRecord>, ServiceError> {
        let payload: RefundListPayload = self
            .send_get(&format!("refunds?payment_intent={}&limit=100", intent_id))
            .await?
            .json()
            .await
            .map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse stripe response: {}", e))
            })?;

        Ok(payload
            .data
            .into_iter()
            .map(|r| RefundRecord {
                amount_minor: r.amount,
                currency: r.currency.to_uppercase(),
                status: r.status,
                created_at: epoch_to_utc(r.created),
                id: r.id,
            })
            .collect())
    }

    async fn create_refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<RefundRecord, ServiceError> {
        let form = vec![
            ("payment_intent".to_string(), intent_id.to_string()),
            ("amount".to_string(), amount_minor.to_string()),
        ];
        let payload: RefundPayload = self
            .send_form("refunds", &form)
            .await?
            .json()
            .await
            .map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse stripe response: {}", e))
            })?;

        Ok(RefundRecord {
            amount_minor: payload.amount,
            currency: payload.currency.to_uppercase(),
            status: payload.status,
            created_at: epoch_to_utc(payload.created),
            id: payload.id,
        })
    }
}

/// Verifies a `Stripe-Signature` header (`t=<ts>,v1=<hmac>`) against the
/// raw request body. Rejects stale timestamps to limit replay windows.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    tolerance_secs: u64,
) -> bool {
    let mut timestamp = "";
    let mut v1 = "";
    for part in signature_header.split(',') {
        if let Some(t) = part.trim().strip_prefix("t=") {
            timestamp = t;
        } else if let Some(s) = part.trim().strip_prefix("v1=") {
            v1 = s;
        }
    }
    if timestamp.is_empty() || v1.is_empty() {
        return false;
    }

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let age = Utc::now().timestamp() - ts;
    if age > tolerance_secs as i64 || age < -FUTURE_SKEW_TOLERANCE_SECS {
        tracing::warn!(age, "stripe webhook timestamp outside tolerance");
        return false;
    }

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

/// Builds a `Stripe-Signature` header value for a payload. Test helper for
/// webhook delivery without a live provider.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
