use std::sync::Arc;

use sqlx::PgPool;

use crate::anon_guard::GuardPolicy;
use crate::billing::stripe_client::StripeClient;
use crate::captcha::CaptchaVerifier;
use crate::config::Config;
use crate::llm_client::ChatCompletion;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub llm: Arc<dyn ChatCompletion>,
    pub stripe: Arc<StripeClient>,
    /// Turnstile when configured, otherwise a pass-through verifier.
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub anon_policy: GuardPolicy,
    pub config: Config,
}
