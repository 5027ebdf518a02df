use anyhow::{Context, Result};

const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub run_migrations: bool,
    pub supabase_jwt_secret: String,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub stripe: StripeConfig,
    pub anon_cookie_secret: String,
    /// Cloudflare Turnstile secret. Anonymous CAPTCHA checks are skipped when unset.
    pub turnstile_secret_key: Option<String>,
    /// Public origin of the web app, used to build checkout return URLs.
    pub app_url: String,
    pub port: u16,
    pub rust_log: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_premium: String,
    pub price_credits_small: String,
    pub price_credits_medium: String,
    pub price_credits_large: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            supabase_jwt_secret: require_env("SUPABASE_JWT_SECRET")?,
            openrouter_api_key: require_env("OPENROUTER_API_KEY")?,
            openrouter_base_url: std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            stripe: StripeConfig {
                secret_key: require_env("STRIPE_SECRET_KEY")?,
                webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
                price_premium: require_env("STRIPE_PRICE_PREMIUM")?,
                price_credits_small: require_env("STRIPE_PRICE_CREDITS_SMALL")?,
                price_credits_medium: require_env("STRIPE_PRICE_CREDITS_MEDIUM")?,
                price_credits_large: require_env("STRIPE_PRICE_CREDITS_LARGE")?,
            },
            anon_cookie_secret: require_env("ANON_COOKIE_SECRET")?,
            turnstile_secret_key: std::env::var("TURNSTILE_SECRET_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            app_url: require_env("APP_URL")?.trim_end_matches('/').to_string(),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

#[cfg(test)]
impl Config {
    /// Fixed configuration for handler and router tests.
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost:5432/tripgen_test".to_string(),
            run_migrations: false,
            supabase_jwt_secret: "test-jwt-secret-with-enough-length-123".to_string(),
            openrouter_api_key: "test-openrouter-key".to_string(),
            openrouter_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            stripe: StripeConfig {
                secret_key: "sk_test_123".to_string(),
                webhook_secret: "whsec_test_secret".to_string(),
                price_premium: "price_premium".to_string(),
                price_credits_small: "price_small".to_string(),
                price_credits_medium: "price_medium".to_string(),
                price_credits_large: "price_large".to_string(),
            },
            anon_cookie_secret: "anon-cookie-test-secret".to_string(),
            turnstile_secret_key: None,
            app_url: "https://trips.example.com".to_string(),
            port: 8080,
            rust_log: "debug".to_string(),
        }
    }
}
