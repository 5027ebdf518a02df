//! Axum route handlers for the Billing API.

use std::collections::HashMap;

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::AuthUser;
use crate::billing::catalog::Product;
use crate::billing::stripe_client::CheckoutRequest;
use crate::billing::webhook::{apply_event, WebhookOutcome};
use crate::errors::AppError;
use crate::models::profile::ProfileRow;
use crate::profiles::store::{ensure_profile, set_stripe_customer_id};
use crate::state::AppState;
use crate::tiers::resolver::tier_from_fields;
use crate::tiers::Tier;
use crate::validation::safe_redirect_path;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub product: Product,
    pub return_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PortalBody {
    pub return_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// POST /api/billing/checkout
///
/// Creates a Stripe Checkout session for a subscription or a credit pack.
pub async fn handle_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<RedirectResponse>, AppError> {
    let profile = ensure_profile(&state.db, &user).await?;

    if body.product == Product::Premium {
        let tier = tier_from_fields(&profile.subscription_tier, &profile.subscription_status);
        if tier >= Tier::Premium {
            return Err(AppError::Validation(
                "You already have an active subscription. Use the billing portal to manage it."
                    .to_string(),
            ));
        }
    }

    let customer_id = customer_for(&state, &profile).await?;
    let return_path = safe_redirect_path(body.return_path.as_deref());
    let base = format!("{}{}", state.config.app_url, return_path);
    let separator = if return_path.contains('?') { '&' } else { '?' };

    let mut metadata = HashMap::new();
    metadata.insert("user_id".to_string(), user.user_id.to_string());
    metadata.insert("product".to_string(), body.product.as_str().to_string());
    metadata.insert("credits".to_string(), body.product.credits().to_string());

    let url = state
        .stripe
        .create_checkout_session(CheckoutRequest {
            price_id: body.product.price_id(&state.config.stripe),
            mode: body.product.checkout_mode(),
            customer_id: &customer_id,
            user_id: user.user_id,
            success_url: format!("{base}{separator}checkout=success"),
            cancel_url: format!("{base}{separator}checkout=canceled"),
            metadata,
        })
        .await
        .map_err(|e| {
            error!(user_id = %user.user_id, "checkout session failed: {e:#}");
            AppError::PaymentProvider("Could not start checkout".to_string())
        })?;

    info!(user_id = %user.user_id, product = body.product.as_str(), "checkout session created");
    Ok(Json(RedirectResponse { url }))
}

/// POST /api/billing/portal
pub async fn handle_portal(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<PortalBody>>,
) -> Result<Json<RedirectResponse>, AppError> {
    let profile = ensure_profile(&state.db, &user).await?;
    let customer_id = profile.stripe_customer_id.ok_or_else(|| {
        AppError::Validation("No billing account found. Make a purchase first.".to_string())
    })?;

    let return_path = safe_redirect_path(body.as_ref().and_then(|b| b.return_path.as_deref()));
    let url = state
        .stripe
        .create_portal_session(&customer_id, format!("{}{}", state.config.app_url, return_path))
        .await
        .map_err(|e| {
            error!(user_id = %user.user_id, "portal session failed: {e:#}");
            AppError::PaymentProvider("Could not open the billing portal".to_string())
        })?;

    Ok(Json(RedirectResponse { url }))
}

/// POST /api/billing/webhook
///
/// Verifies the Stripe signature over the raw body, then applies the event once.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Missing stripe-signature header".to_string()))?;

    let event = state
        .stripe
        .verify_webhook(&payload, signature, Utc::now())
        .map_err(|e| {
            warn!("stripe webhook verification failed: {e:#}");
            AppError::Validation("Invalid webhook signature".to_string())
        })?;

    match apply_event(&state.db, &event).await {
        Ok(WebhookOutcome::Applied) => {
            info!(event_id = %event.id, event_type = %event.type_, "stripe event applied")
        }
        Ok(WebhookOutcome::Duplicate) => {
            info!(event_id = %event.id, "stripe event already processed")
        }
        Ok(WebhookOutcome::Ignored) => {
            info!(event_id = %event.id, event_type = %event.type_, "stripe event ignored")
        }
        Err(e) => {
            error!(event_id = %event.id, event_type = %event.type_, "stripe event failed: {e:#}");
            return Err(AppError::Internal(e));
        }
    }

    Ok(Json(WebhookAck { received: true }))
}

/// Returns the profile's Stripe customer, creating and storing one on first checkout.
async fn customer_for(state: &AppState, profile: &ProfileRow) -> Result<String, AppError> {
    if let Some(id) = &profile.stripe_customer_id {
        return Ok(id.clone());
    }

    let customer_id = state
        .stripe
        .create_customer(&profile.email, profile.id)
        .await
        .map_err(|e| {
            error!(user_id = %profile.id, "customer creation failed: {e:#}");
            AppError::PaymentProvider("Could not create billing account".to_string())
        })?;
    set_stripe_customer_id(&state.db, profile.id, &customer_id).await?;
    info!(user_id = %profile.id, "stripe customer created");
    Ok(customer_id)
}
