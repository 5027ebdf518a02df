//! Translates verified Stripe events into profile updates.
//!
//! Event mapping and the profile transition are pure functions. `apply_event` locks
//! the profile, runs the transition and records the event id in one transaction.

use anyhow::{Context, Result};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::catalog::Product;
use crate::billing::stripe_client::{
    StripeCheckoutSession, StripeEvent, StripeInvoice, StripeSubscription,
};
use crate::tiers::{SubscriptionStatus, Tier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdate {
    ActivateSubscription {
        user_id: Uuid,
        customer_id: Option<String>,
        tier: Tier,
    },
    AddCredits {
        user_id: Uuid,
        customer_id: Option<String>,
        credits: i32,
    },
    SetStatus {
        customer_id: String,
        status: SubscriptionStatus,
    },
    EndSubscription {
        customer_id: String,
    },
}

/// Billing columns of one profile.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BillingState {
    pub subscription_tier: String,
    pub subscription_status: String,
    pub credits: i32,
}

#[derive(Debug, FromRow)]
struct BillingRow {
    id: Uuid,
    #[sqlx(flatten)]
    state: BillingState,
}

/// Tiers bought as a recurring subscription, as opposed to free or pay-as-you-go.
fn is_subscription_tier(tier: &str) -> bool {
    !matches!(tier, "free" | "basic" | "payg")
}

impl BillingState {
    fn has_active_subscription(&self) -> bool {
        is_subscription_tier(&self.subscription_tier)
            && matches!(self.subscription_status.as_str(), "active" | "trialing")
    }

    fn with(&self, tier: &str, status: SubscriptionStatus, credits: i32) -> Self {
        Self {
            subscription_tier: tier.to_string(),
            subscription_status: status.as_str().to_string(),
            credits,
        }
    }
}

/// Billing state after `update`, or `None` when the update does not apply to this profile.
pub fn transition(current: &BillingState, update: &ProfileUpdate) -> Option<BillingState> {
    match update {
        ProfileUpdate::ActivateSubscription { tier, .. } => {
            Some(current.with(tier.as_str(), SubscriptionStatus::Active, current.credits))
        }
        ProfileUpdate::AddCredits { credits, .. } => {
            let credits = current.credits.saturating_add(*credits);
            if current.has_active_subscription() {
                Some(BillingState {
                    credits,
                    ..current.clone()
                })
            } else {
                Some(current.with(Tier::Basic.as_str(), SubscriptionStatus::Active, credits))
            }
        }
        ProfileUpdate::SetStatus { status, .. } => is_subscription_tier(&current.subscription_tier)
            .then(|| current.with(&current.subscription_tier, *status, current.credits)),
        // Leftover credits keep the user on pay-as-you-go.
        ProfileUpdate::EndSubscription { .. } => Some(if current.credits > 0 {
            current.with(Tier::Basic.as_str(), SubscriptionStatus::Active, current.credits)
        } else {
            current.with(Tier::Free.as_str(), SubscriptionStatus::Canceled, current.credits)
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
}

/// Maps an event to the profile update it implies, if any.
pub fn update_for_event(event: &StripeEvent) -> Result<Option<ProfileUpdate>> {
    match event.type_.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
                .context("checkout session payload is malformed")?;
            checkout_update(&session)
        }
        "customer.subscription.updated" => {
            let subscription: StripeSubscription =
                serde_json::from_value(event.data.object.clone())
                    .context("subscription payload is malformed")?;
            let customer_id = subscription
                .customer
                .context("subscription event has no customer")?;
            let status = SubscriptionStatus::from_stripe(subscription.status.as_deref().unwrap_or(""));
            Ok(Some(ProfileUpdate::SetStatus {
                customer_id,
                status,
            }))
        }
        "customer.subscription.deleted" => {
            let subscription: StripeSubscription =
                serde_json::from_value(event.data.object.clone())
                    .context("subscription payload is malformed")?;
            let customer_id = subscription
                .customer
                .context("subscription event has no customer")?;
            Ok(Some(ProfileUpdate::EndSubscription { customer_id }))
        }
        "invoice.payment_failed" => {
            let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone())
                .context("invoice payload is malformed")?;
            match (invoice.customer, invoice.subscription) {
                (Some(customer_id), Some(_)) => Ok(Some(ProfileUpdate::SetStatus {
                    customer_id,
                    status: SubscriptionStatus::PastDue,
                })),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn checkout_update(session: &StripeCheckoutSession) -> Result<Option<ProfileUpdate>> {
    if session.payment_status.as_deref() == Some("unpaid") {
        return Ok(None);
    }

    let metadata = session.metadata.clone().unwrap_or_default();
    let raw_user_id = metadata
        .get("user_id")
        .cloned()
        .or_else(|| session.client_reference_id.clone())
        .context("checkout session carries no user id")?;
    let user_id = Uuid::parse_str(&raw_user_id).context("checkout session user id is not a UUID")?;

    let product = metadata
        .get("product")
        .context("checkout session carries no product")?
        .parse::<Product>()?;

    let customer_id = session.customer.clone();
    Ok(Some(match product {
        Product::Premium => ProfileUpdate::ActivateSubscription {
            user_id,
            customer_id,
            tier: Tier::Premium,
        },
        pack => ProfileUpdate::AddCredits {
            user_id,
            customer_id,
            credits: pack.credits(),
        },
    }))
}

/// Applies an event at most once.
pub async fn apply_event(pool: &PgPool, event: &StripeEvent) -> Result<WebhookOutcome> {
    let Some(update) = update_for_event(event)? else {
        info!(event_id = %event.id, event_type = %event.type_, "stripe webhook ignored");
        return Ok(WebhookOutcome::Ignored);
    };

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO stripe_events (id, event_type) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
    )
    .bind(&event.id)
    .bind(&event.type_)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        tx.rollback().await?;
        info!(event_id = %event.id, "stripe webhook already processed");
        return Ok(WebhookOutcome::Duplicate);
    }

    let found = apply_update(&mut tx, &update).await?;
    tx.commit().await?;

    if found {
        info!(event_id = %event.id, ?update, "stripe webhook applied");
    } else {
        warn!(event_id = %event.id, ?update, "stripe webhook matched no profile");
    }
    Ok(WebhookOutcome::Applied)
}

/// Locks the target profile and writes its next billing state. Returns false if no profile matched.
async fn apply_update(tx: &mut Transaction<'_, Postgres>, update: &ProfileUpdate) -> Result<bool> {
    let (current, customer_id) = match update {
        ProfileUpdate::ActivateSubscription {
            user_id,
            customer_id,
            ..
        }
        | ProfileUpdate::AddCredits {
            user_id,
            customer_id,
            ..
        } => {
            let row = sqlx::query_as::<_, BillingRow>(
                r#"
                SELECT id, subscription_tier, subscription_status, credits
                FROM profiles WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
            (row, customer_id.as_deref())
        }
        ProfileUpdate::SetStatus { customer_id, .. }
        | ProfileUpdate::EndSubscription { customer_id } => {
            let row = sqlx::query_as::<_, BillingRow>(
                r#"
                SELECT id, subscription_tier, subscription_status, credits
                FROM profiles WHERE stripe_customer_id = $1
                FOR UPDATE
                "#,
            )
            .bind(customer_id)
            .fetch_optional(&mut **tx)
            .await?;
            (row, None)
        }
    };

    let Some(current) = current else {
        return Ok(false);
    };
    let Some(next) = transition(&current.state, update) else {
        debug!(profile_id = %current.id, tier = %current.state.subscription_tier, "billing update does not apply");
        return Ok(true);
    };

    sqlx::query(
        r#"
        UPDATE profiles
        SET subscription_tier = $2,
            subscription_status = $3,
            credits = $4,
            stripe_customer_id = COALESCE($5, stripe_customer_id),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(current.id)
    .bind(&next.subscription_tier)
    .bind(&next.subscription_status)
    .bind(next.credits)
    .bind(customer_id)
    .execute(&mut **tx)
    .await?;
    Ok(true)
}
