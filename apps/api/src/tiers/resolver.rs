//! Tier Resolver: maps the caller's identity to an effective tier.
//!
//! Policy: anonymous → free; inactive subscription → free; otherwise the stored
//! tier. Any missing row, unrecognized value or database error falls back to free.

use std::fmt::Display;

use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tiers::{SubscriptionStatus, Tier};

#[derive(Debug, Clone, FromRow)]
pub struct TierFields {
    pub subscription_tier: String,
    pub subscription_status: String,
}

/// Resolves the effective tier for an optional authenticated user.
pub async fn resolve_tier(pool: &PgPool, user_id: Option<Uuid>) -> Tier {
    let Some(user_id) = user_id else {
        return Tier::Free;
    };

    let lookup = sqlx::query_as::<_, TierFields>(
        "SELECT subscription_tier, subscription_status FROM profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await;

    let tier = tier_from_lookup(lookup);
    debug!(%user_id, %tier, "tier_resolver: resolved tier");
    tier
}

/// Applies the fallback policy to the result of a profile lookup.
pub fn tier_from_lookup<E: Display>(lookup: Result<Option<TierFields>, E>) -> Tier {
    match lookup {
        Ok(Some(fields)) => tier_from_fields(&fields.subscription_tier, &fields.subscription_status),
        Ok(None) => Tier::Free,
        Err(e) => {
            warn!("tier_resolver: profile lookup failed, falling back to free: {e}");
            Tier::Free
        }
    }
}

/// Computes the effective tier from the raw profile columns.
pub fn tier_from_fields(tier: &str, status: &str) -> Tier {
    let status = status.parse::<SubscriptionStatus>().unwrap_or(SubscriptionStatus::Inactive);
    if !status.grants_tier() {
        return Tier::Free;
    }
    tier.parse::<Tier>().unwrap_or_else(|_| {
        warn!("tier_resolver: unrecognized tier '{tier}', falling back to free");
        Tier::Free
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(tier: &str, status: &str) -> TierFields {
        TierFields {
            subscription_tier: tier.to_string(),
            subscription_status: status.to_string(),
        }
    }

    #[test]
    fn test_active_subscription_keeps_stored_tier() {
        assert_eq!(tier_from_fields("premium", "active"), Tier::Premium);
        assert_eq!(tier_from_fields("pro", "trialing"), Tier::Premium);
        assert_eq!(tier_from_fields("payg", "active"), Tier::Basic);
    }

    #[test]
    fn test_inactive_status_falls_back_to_free() {
        assert_eq!(tier_from_fields("enterprise", "canceled"), Tier::Free);
        assert_eq!(tier_from_fields("premium", "past_due"), Tier::Free);
        assert_eq!(tier_from_fields("premium", "inactive"), Tier::Free);
    }

    #[test]
    fn test_unknown_values_fall_back_to_free() {
        assert_eq!(tier_from_fields("platinum", "active"), Tier::Free);
        assert_eq!(tier_from_fields("premium", "weird"), Tier::Free);
        assert_eq!(tier_from_fields("", ""), Tier::Free);
    }

    #[test]
    fn test_missing_row_is_free() {
        let lookup: Result<Option<TierFields>, String> = Ok(None);
        assert_eq!(tier_from_lookup(lookup), Tier::Free);
    }

    #[test]
    fn test_lookup_error_is_free() {
        let lookup: Result<Option<TierFields>, String> = Err("connection reset".to_string());
        assert_eq!(tier_from_lookup(lookup), Tier::Free);
    }

    #[test]
    fn test_found_row_is_resolved() {
        let lookup: Result<Option<TierFields>, String> = Ok(Some(fields("enterprise", "active")));
        assert_eq!(tier_from_lookup(lookup), Tier::Enterprise);
    }
}
