use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
/// Webhook timestamps older than this are rejected as replays.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub customer: Option<String>,
    pub client_reference_id: Option<String>,
    pub payment_status: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub customer: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub customer: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// Parameters of a hosted Checkout session.
pub struct CheckoutRequest<'a> {
    pub price_id: &'a str,
    /// `subscription` or `payment`.
    pub mode: &'a str,
    pub customer_id: &'a str,
    pub user_id: Uuid,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, secret_key: String, webhook_secret: String) -> Self {
        Self {
            http,
            secret_key,
            webhook_secret,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (stripe_error_type, stripe_error_code, stripe_error_message) =
            match serde_json::from_str::<StripeErrorEnvelope>(&body) {
                Ok(envelope) => (
                    envelope.error.type_,
                    envelope.error.code,
                    envelope.error.message,
                ),
                Err(_) => (None, None, None),
            };

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?stripe_error_type,
            stripe_error_code = ?stripe_error_code,
            stripe_error_message = ?stripe_error_message,
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    async fn post_form(&self, path: &str, body: &[(String, String)], context: &str) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{STRIPE_API_BASE}{path}"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .form(body)
            .send()
            .await?;
        Self::ensure_success(resp, context).await
    }

    /// Creates a Stripe customer tagged with our user id.
    pub async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String> {
        let body = vec![
            ("email".to_string(), email.to_string()),
            ("metadata[user_id]".to_string(), user_id.to_string()),
        ];
        let resp = self.post_form("/customers", &body, "create customer").await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    /// Creates a Checkout Session and returns its URL.
    pub async fn create_checkout_session(&self, request: CheckoutRequest<'_>) -> Result<String> {
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), request.mode.to_string()),
            ("line_items[0][price]".to_string(), request.price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("customer".to_string(), request.customer_id.to_string()),
            ("client_reference_id".to_string(), request.user_id.to_string()),
            ("success_url".to_string(), request.success_url),
            ("cancel_url".to_string(), request.cancel_url),
        ];

        for (key, value) in request.metadata {
            body.push((format!("metadata[{key}]"), value));
        }

        let resp = self
            .post_form("/checkout/sessions", &body, "create checkout session")
            .await?;

        #[derive(Deserialize)]
        struct CheckoutResp {
            url: Option<String>,
        }

        let parsed: CheckoutResp = resp.json().await?;
        parsed
            .url
            .ok_or_else(|| anyhow::anyhow!("Stripe Checkout session URL is missing"))
    }

    /// Creates a Billing Portal session for managing an existing subscription.
    pub async fn create_portal_session(&self, customer_id: &str, return_url: String) -> Result<String> {
        let body = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url),
        ];
        let resp = self
            .post_form("/billing_portal/sessions", &body, "create portal session")
            .await?;

        #[derive(Deserialize)]
        struct PortalResp {
            url: String,
        }

        let parsed: PortalResp = resp.json().await?;
        Ok(parsed.url)
    }

    /// Verifies the `stripe-signature` header and parses the event.
    pub fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<StripeEvent> {
        verify_signature(&self.webhook_secret, payload, signature_header, now)?;
        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}

/// Checks a `t=<unix>,v1=<hex>[,v1=<hex>...]` header against HMAC-SHA256("{t}.{payload}").
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("t=") {
            timestamp = Some(rest);
        } else if let Some(rest) = part.strip_prefix("v1=") {
            signatures.push(rest);
        }
    }

    let timestamp = timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
    if signatures.is_empty() {
        anyhow::bail!("missing v1 in stripe-signature");
    }

    let signed_at: i64 = timestamp.parse()?;
    let skew = now
        .timestamp()
        .checked_sub(signed_at)
        .map(i64::unsigned_abs)
        .ok_or_else(|| anyhow::anyhow!("stripe-signature timestamp out of range"))?;
    if skew > WEBHOOK_TOLERANCE_SECS.unsigned_abs() {
        anyhow::bail!("stripe-signature timestamp outside tolerance");
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|provided| mac.clone().verify_slice(&provided).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        anyhow::bail!("invalid webhook signature");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed","data":{"object":{}}}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let now = Utc::now();
        let header = sign_payload(SECRET, PAYLOAD, now.timestamp());
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_ok());
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let now = Utc::now();
        let good = sign_payload(SECRET, PAYLOAD, now.timestamp());
        let header = format!("{},v1=deadbeef", good);
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = Utc::now();
        let header = sign_payload(SECRET, PAYLOAD, now.timestamp());
        let tampered = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#;
        assert!(verify_signature(SECRET, tampered, &header, now).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = Utc::now();
        let header = sign_payload("whsec_other", PAYLOAD, now.timestamp());
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = Utc::now();
        let signed_at = (now - Duration::seconds(WEBHOOK_TOLERANCE_SECS + 1)).timestamp();
        let header = sign_payload(SECRET, PAYLOAD, signed_at);
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let now = Utc::now();
        assert!(verify_signature(SECRET, PAYLOAD, "", now).is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "v1=abcd", now).is_err());
        let ts_only = format!("t={}", now.timestamp());
        assert!(verify_signature(SECRET, PAYLOAD, &ts_only, now).is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "t=-9223372036854775808,v1=00", now).is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "t=9223372036854775807,v1=00", now).is_err());
    }

    #[test]
    fn test_verified_event_parses() {
        let client = StripeClient::new(reqwest::Client::new(), "sk_test".to_string(), SECRET.to_string());
        let now = Utc::now();
        let header = sign_payload(SECRET, PAYLOAD, now.timestamp());
        let event = client.verify_webhook(PAYLOAD, &header, now).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.type_, "invoice.payment_failed");
    }
}
