mod anon_guard;
mod auth;
mod billing;
mod captcha;
mod config;
mod db;
mod errors;
mod itineraries;
mod llm_client;
mod models;
mod profiles;
mod routes;
mod state;
mod tiers;
mod validation;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::anon_guard::GuardPolicy;
use crate::billing::stripe_client::StripeClient;
use crate::captcha::{CaptchaVerifier, DisabledCaptcha, TurnstileVerifier};
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tripgen API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    if config.run_migrations {
        run_migrations(&db).await?;
    }

    // One HTTP client shared by Stripe and Turnstile
    let http = reqwest::Client::new();

    // Initialize LLM client
    let llm = LlmClient::new(
        config.openrouter_api_key.clone(),
        config.openrouter_base_url.clone(),
        config.app_url.clone(),
    )?;
    info!("LLM client initialized ({})", config.openrouter_base_url);

    let stripe = Arc::new(StripeClient::new(
        http.clone(),
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
    ));

    let captcha: Arc<dyn CaptchaVerifier> = match &config.turnstile_secret_key {
        Some(secret) => {
            info!("CAPTCHA verification enabled (Turnstile)");
            Arc::new(TurnstileVerifier::new(http.clone(), secret.clone()))
        }
        None => {
            info!("CAPTCHA verification disabled");
            Arc::new(DisabledCaptcha)
        }
    };

    // Build app state
    let state = AppState {
        db,
        llm: Arc::new(llm),
        stripe,
        captcha,
        anon_policy: GuardPolicy::default(),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to APP_URL once the frontend domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
