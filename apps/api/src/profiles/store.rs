use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::profile::ProfileRow;
use crate::tiers::{SubscriptionStatus, Tier};

pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<ProfileRow>, AppError> {
    Ok(
        sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?,
    )
}

/// Returns the caller's profile, creating a free-tier row on first access.
pub async fn ensure_profile(pool: &PgPool, user: &AuthUser) -> Result<ProfileRow, AppError> {
    let inserted = sqlx::query(
        "INSERT INTO profiles (id, email) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
    )
    .bind(user.user_id)
    .bind(user.email.as_deref().unwrap_or(""))
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 1 {
        info!(user_id = %user.user_id, "created profile");
    }

    get_profile(pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", user.user_id)))
}

pub async fn set_stripe_customer_id(
    pool: &PgPool,
    user_id: Uuid,
    customer_id: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE profiles SET stripe_customer_id = $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(customer_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_display_name(
    pool: &PgPool,
    user_id: Uuid,
    display_name: &str,
) -> Result<ProfileRow, AppError> {
    sqlx::query_as::<_, ProfileRow>(
        "UPDATE profiles SET display_name = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .bind(display_name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Profile {user_id} not found")))
}

/// Admin override of a user's tier.
pub async fn set_tier(
    pool: &PgPool,
    user_id: Uuid,
    tier: Tier,
    status: SubscriptionStatus,
) -> Result<ProfileRow, AppError> {
    sqlx::query_as::<_, ProfileRow>(
        r#"
        UPDATE profiles
        SET subscription_tier = $2, subscription_status = $3, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(tier.as_str())
    .bind(status.as_str())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Profile {user_id} not found")))
}

/// Atomically spends one credit. Returns the balance left, or `None` if none were available.
pub async fn take_credit(pool: &PgPool, user_id: Uuid) -> Result<Option<i32>, AppError> {
    Ok(sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE profiles
        SET credits = credits - 1, updated_at = now()
        WHERE id = $1 AND credits > 0
        RETURNING credits
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?)
}

pub async fn refund_credit(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE profiles SET credits = credits + 1, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    info!(%user_id, "refunded generation credit");
    Ok(())
}

/// Claims one free-tier generation for the month containing `now`, starting a new
/// period when the stored one is older. Returns the count used so far, or `None`
/// when `limit` is already reached.
pub async fn take_free_generation(
    pool: &PgPool,
    user_id: Uuid,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<Option<i32>, AppError> {
    Ok(sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE profiles
        SET free_generations_used = CASE
                WHEN free_period_start < $3 THEN 1
                ELSE free_generations_used + 1
            END,
            free_period_start = GREATEST(free_period_start, $3),
            updated_at = now()
        WHERE id = $1 AND (free_period_start < $3 OR free_generations_used < $2)
        RETURNING free_generations_used
        "#,
    )
    .bind(user_id)
    .bind(i32::try_from(limit).unwrap_or(i32::MAX))
    .bind(month_start(now))
    .fetch_optional(pool)
    .await?)
}

/// Gives back a slot claimed by `take_free_generation`, unless the period has moved on.
pub async fn release_free_generation(
    pool: &PgPool,
    user_id: Uuid,
    period_start: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE profiles
        SET free_generations_used = GREATEST(free_generations_used - 1, 0), updated_at = now()
        WHERE id = $1 AND free_period_start = $2
        "#,
    )
    .bind(user_id)
    .bind(period_start)
    .execute(pool)
    .await?;
    info!(%user_id, "released free generation");
    Ok(())
}

/// Free generations counted against the month containing `now`.
pub fn free_generations_this_month(profile: &ProfileRow, now: DateTime<Utc>) -> i64 {
    if profile.free_period_start < month_start(now) {
        0
    } else {
        i64::from(profile.free_generations_used)
    }
}

pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}
