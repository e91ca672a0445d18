//! Regional instant-payment gateway client (YooKassa REST API).
//!
//! JSON API with Basic auth (shop id + secret key) and an Idempotence-Key
//! header on every mutating call. Amounts on the wire are decimal strings
//! in major units; this module converts at the boundary.

use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    constant_time_eq, CreateIntentRequest, IntentHandle, IntentSnapshot, IntentStatus,
    PaymentGateway, RefundRecord,
};
use crate::errors::ServiceError;
use crate::models::PaymentProvider;

const API_BASE: &str = "https://api.yookassa.ru/v3";

#[derive(Debug, Deserialize)]
struct WireAmount {
    value: String,
    currency: String,
}

impl WireAmount {
    fn minor_units(&self) -> Result<i64, ServiceError> {
        let major: Decimal = self.value.parse().map_err(|_| {
            ServiceError::ProviderError(format!("yookassa returned bad amount: {}", self.value))
        })?;
        (major * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::ProviderError(format!(
                    "yookassa amount out of range: {}",
                    self.value
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
struct Confirmation {
    #[serde(default)]
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentPayload {
    id: String,
    status: String,
    amount: WireAmount,
    #[serde(default)]
    confirmation: Option<Confirmation>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RefundPayload {
    id: String,
    status: String,
    amount: WireAmount,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RefundListPayload {
    items: Vec<RefundPayload>,
}

fn parse_payment_status(raw: &str) -> IntentStatus {
    match raw {
        "pending" => IntentStatus::Pending,
        "waiting_for_capture" => IntentStatus::WaitingForCapture,
        "succeeded" => IntentStatus::Succeeded,
        "canceled" => IntentStatus::Canceled,
        _ => IntentStatus::Unknown,
    }
}

impl PaymentPayload {
    fn into_snapshot(self) -> Result<IntentSnapshot, ServiceError> {
        let amount_minor = self.amount.minor_units()?;
        Ok(IntentSnapshot {
            status: parse_payment_status(&self.status),
            amount_minor,
            // YooKassa reports a single captured amount, no separate
            // amount-received field.
            amount_received_minor: None,
            currency: self.amount.currency.to_uppercase(),
            created_at: self.created_at,
            client_secret: None,
            confirmation_url: self
                .confirmation
                .as_ref()
                .and_then(|c| c.confirmation_url.clone()),
            id: self.id,
        })
    }
}

#[derive(Clone)]
pub struct YookassaGateway {
    client: Client,
    shop_id: String,
    secret_key: String,
    return_url: Option<String>,
    api_base: String,
}

impl YookassaGateway {
    pub fn new(shop_id: String, secret_key: String, return_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            shop_id,
            secret_key,
            return_url,
            api_base: API_BASE.to_string(),
        }
    }

    /// Points the client at a different API host. Used by tests.
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, path))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("yookassa request failed: {}", e)))?;
        check_status(response).await
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .client
            .get(format!("{}/{}", self.api_base, path))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("yookassa request failed: {}", e)))?;
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
        "yookassa returned {}: {}",
        status, body
    )))
}

fn major_units_string(amount_minor: i64) -> String {
    format!("{}.{:02}", amount_minor / 100, (amount_minor % 100).abs())
}

#[async_trait::async_trait]
impl PaymentGateway for YookassaGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Yookassa
    }

    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<IntentHandle, ServiceError> {
        let mut body = json!({
            "amount": {
                "value": major_units_string(request.amount_minor),
                "currency": request.currency,
            },
            "capture": true,
            "metadata": { "order_id": request.order_id },
        });
        if let Some(url) = &self.return_url {
            body["confirmation"] = json!({ "type": "redirect", "return_url": url });
        }
        if let Some(description) = &request.description {
            body["description"] = json!(description);
        }

        let payload: PaymentPayload =
            self.post_json("payments", body).await?.json().await.map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse yookassa response: {}", e))
            })?;

        Ok(IntentHandle {
            confirmation_url: payload
                .confirmation
                .as_ref()
                .and_then(|c| c.confirmation_url.clone()),
            client_secret: None,
            intent_id: payload.id,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, ServiceError> {
        let payload: PaymentPayload = self
            .get(&format!("payments/{}", intent_id))
            .await?
            .json()
            .await
            .map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse yookassa response: {}", e))
            })?;
        payload.into_snapshot()
    }

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<RefundRecord>, ServiceError> {
        let payload: RefundListPayload = self
            .get(&format!("refunds?payment_id={}", intent_id))
            .await?
            .json()
            .await
            .map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse yookassa response: {}", e))
            })?;

        payload
            .items
            .into_iter()
            .map(|r| {
                Ok(RefundRecord {
                    amount_minor: r.amount.minor_units()?,
                    currency: r.amount.currency.to_uppercase(),
                    status: r.status,
                    created_at: r.created_at,
                    id: r.id,
                })
            })
            .collect()
    }

    async fn create_refund(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<RefundRecord, ServiceError> {
        let body = json!({
            "payment_id": intent_id,
            "amount": {
                "value": major_units_string(amount_minor),
                // Refund currency follows the original payment.
                "currency": self.settlement_currency_hint(intent_id).await?,
            },
        });

        let payload: RefundPayload =
            self.post_json("refunds", body).await?.json().await.map_err(|e| {
                ServiceError::ProviderError(format!("failed to parse yookassa response: {}", e))
            })?;

        Ok(RefundRecord {
            amount_minor: payload.amount.minor_units()?,
            currency: payload.amount.currency.to_uppercase(),
            status: payload.status,
            created_at: payload.created_at,
            id: payload.id,
        })
    }
}

impl YookassaGateway {
    async fn settlement_currency_hint(&self, intent_id: &str) -> Result<String, ServiceError> {
        Ok(self.retrieve_intent(intent_id).await?.currency)
    }
}

/// Verifies the shared-secret Basic-auth-style header on inbound YooKassa
/// notification requests.
pub fn verify_basic_auth(header_value: &str, shop_id: &str, secret_key: &str) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let expected = format!("{}:{}", shop_id, secret_key);
    constant_time_eq(&decoded, &expected)
}
