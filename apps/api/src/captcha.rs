//! CAPTCHA verification for anonymous generations.
//!
//! `AppState` carries an `Arc<dyn CaptchaVerifier>`: Turnstile when a secret is
//! configured, otherwise a verifier that accepts everything.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::errors::AppError;

const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Returns Ok(()) when the token proves a human, `AppError::Validation` otherwise.
    async fn verify(&self, token: Option<&str>, remote_ip: &str) -> Result<(), AppError>;
}

pub struct DisabledCaptcha;

#[async_trait]
impl CaptchaVerifier for DisabledCaptcha {
    async fn verify(&self, _token: Option<&str>, _remote_ip: &str) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct TurnstileVerifier {
    http: Client,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl TurnstileVerifier {
    pub fn new(http: Client, secret: String) -> Self {
        Self { http, secret }
    }
}

#[async_trait]
impl CaptchaVerifier for TurnstileVerifier {
    async fn verify(&self, token: Option<&str>, remote_ip: &str) -> Result<(), AppError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("CAPTCHA verification is required".to_string()))?;

        let mut form = vec![("secret", self.secret.as_str()), ("response", token)];
        if remote_ip != "unknown" {
            form.push(("remoteip", remote_ip));
        }

        let response = self
            .http
            .post(TURNSTILE_VERIFY_URL)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("CAPTCHA verification request failed: {e}")))?;

        let result: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("CAPTCHA verification response invalid: {e}")))?;

        if result.success {
            Ok(())
        } else {
            warn!(errors = ?result.error_codes, "CAPTCHA verification failed");
            Err(AppError::Validation("CAPTCHA verification failed".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_captcha_accepts_missing_token() {
        assert!(DisabledCaptcha.verify(None, "unknown").await.is_ok());
    }

    #[tokio::test]
    async fn test_turnstile_requires_token_before_network() {
        let verifier = TurnstileVerifier::new(Client::new(), "secret".to_string());
        let err = verifier.verify(Some("   "), "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_siteverify_response_parses_error_codes() {
        let parsed: SiteVerifyResponse = serde_json::from_str(
            r#"{"success": false, "error-codes": ["invalid-input-response"]}"#,
        )
        .unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_codes, vec!["invalid-input-response"]);
    }
}
