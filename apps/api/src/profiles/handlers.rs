use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anon_guard::store::peek_anonymous;
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::errors::AppError;
use crate::models::profile::ProfileRow;
use crate::profiles::store::{
    ensure_profile, free_generations_this_month, get_profile, set_tier, update_display_name,
};
use crate::state::AppState;
use crate::tiers::resolver::{resolve_tier, tier_from_fields};
use crate::tiers::{ParseEnumError, Quota, SubscriptionStatus, Tier};
use crate::validation::parse_uuid_param;

const MAX_DISPLAY_NAME_LEN: usize = 50;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub tier: Tier,
    pub model: &'static str,
    pub max_days: u32,
    pub quota: Quota,
    /// Generations (or credits) left; `None` when unmetered.
    pub remaining: Option<u32>,
    pub anonymous: bool,
    pub blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub profile: ProfileRow,
    pub usage: UsageResponse,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTierRequest {
    pub tier: String,
    pub status: Option<String>,
}

/// GET /api/profile
pub async fn handle_get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = ensure_profile(&state.db, &user).await?;
    let tier = tier_from_fields(&profile.subscription_tier, &profile.subscription_status);
    let usage = user_usage(tier, &profile);
    Ok(Json(ProfileResponse { profile, usage }))
}

/// PATCH /api/profile
pub async fn handle_update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileRow>, AppError> {
    let display_name = validate_display_name(&request.display_name)?;
    ensure_profile(&state.db, &user).await?;
    let profile = update_display_name(&state.db, user.user_id, display_name).await?;
    Ok(Json(profile))
}

/// GET /api/usage
///
/// Tier quota for signed-in users; the anonymous guard's view for visitors.
pub async fn handle_usage(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, AppError> {
    if let Some(user) = user.0 {
        let profile = ensure_profile(&state.db, &user).await?;
        let tier = tier_from_fields(&profile.subscription_tier, &profile.subscription_status);
        return Ok(Json(user_usage(tier, &profile)));
    }

    let tier = resolve_tier(&state.db, None).await;

    let outcome = peek_anonymous(
        &state.db,
        &jar,
        &headers,
        &state.config.anon_cookie_secret,
        &state.anon_policy,
        Utc::now(),
    )
    .await?;
    let model = tier.model_profile();
    Ok(Json(UsageResponse {
        tier,
        model: model.model,
        max_days: model.max_days,
        quota: Quota::Monthly(state.anon_policy.max_generations.max(0) as u32),
        remaining: Some(outcome.remaining),
        anonymous: true,
        blocked_until: outcome.blocked_until,
    }))
}

/// PUT /api/admin/users/:id/tier
pub async fn handle_admin_set_tier(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
    Json(request): Json<SetTierRequest>,
) -> Result<Json<ProfileRow>, AppError> {
    let target = parse_uuid_param("id", &raw_id)?;

    let is_admin = get_profile(&state.db, user.user_id)
        .await?
        .is_some_and(|p| p.is_admin());
    if !is_admin {
        return Err(AppError::Forbidden);
    }

    let tier: Tier = request
        .tier
        .parse()
        .map_err(|e: ParseEnumError| AppError::Validation(e.to_string()))?;
    let status = match request.status.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|e: ParseEnumError| AppError::Validation(e.to_string()))?,
        None => SubscriptionStatus::Active,
    };

    let profile = set_tier(&state.db, target, tier, status).await?;
    info!(admin_id = %user.user_id, user_id = %target, %tier, %status, "admin set tier");
    Ok(Json(profile))
}

fn user_usage(tier: Tier, profile: &ProfileRow) -> UsageResponse {
    let model = tier.model_profile();
    let used = match model.quota {
        Quota::Monthly(_) => free_generations_this_month(profile, Utc::now()),
        Quota::Credits | Quota::Unlimited => 0,
    };
    UsageResponse {
        tier,
        model: model.model,
        max_days: model.max_days,
        quota: model.quota,
        remaining: model.remaining(profile.credits, used),
        anonymous: false,
        blocked_until: None,
    }
}

fn validate_display_name(raw: &str) -> Result<&str, AppError> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::Validation(format!(
            "display_name must be between 1 and {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn profile(tier: &str, status: &str, credits: i32, free_used: i32) -> ProfileRow {
        let now = Utc::now();
        ProfileRow {
            id: Uuid::new_v4(),
            email: "traveler@example.com".to_string(),
            display_name: Some("Traveler".to_string()),
            role: "user".to_string(),
            subscription_tier: tier.to_string(),
            subscription_status: status.to_string(),
            credits,
            free_generations_used: free_used,
            free_period_start: now,
            stripe_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_usage_is_derived_from_the_loaded_profile() {
        let free = profile("free", "inactive", 0, 2);
        let usage = user_usage(Tier::Free, &free);
        assert_eq!(usage.remaining, Some(1));
        assert!(!usage.anonymous);

        let basic = profile("basic", "active", 4, 0);
        let tier = tier_from_fields(&basic.subscription_tier, &basic.subscription_status);
        assert_eq!(tier, Tier::Basic);
        assert_eq!(user_usage(tier, &basic).remaining, Some(4));

        let premium = profile("premium", "active", 0, 0);
        assert_eq!(user_usage(Tier::Premium, &premium).remaining, None);
    }

    #[test]
    fn test_display_name_is_trimmed() {
        assert_eq!(validate_display_name("  Ada  ").unwrap(), "Ada");
    }

    #[test]
    fn test_display_name_bounds() {
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(50)).is_ok());
        assert!(validate_display_name(&"x".repeat(51)).is_err());
    }
}
