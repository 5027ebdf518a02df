//! Axum route handlers for itinerary generation, the public gallery and owner CRUD.

use std::future::Future;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::anon_guard::store::{check_anonymous, release_generation, reserve_generation};
use crate::anon_guard::{ClientInfo, GuardOutcome};
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::errors::AppError;
use crate::itineraries::generator::generate_plan;
use crate::itineraries::plan::{derive_tags, GenerateRequest, ItineraryStatus};
use crate::itineraries::store::{
    self, GalleryPage, GalleryQuery, GalleryStats, LikeState, NewItinerary, TagCount,
};
use crate::models::itinerary::{ItineraryRow, ItinerarySummaryRow};
use crate::profiles::store::{
    ensure_profile, get_profile, month_start, refund_credit, release_free_generation,
    take_credit, take_free_generation,
};
use crate::state::AppState;
use crate::tiers::resolver::tier_from_fields;
use crate::tiers::{ModelProfile, ParseEnumError, Quota, Tier};
use crate::validation::parse_uuid_param;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub itinerary: ItineraryRow,
    /// Generations left after this one; `None` for unmetered tiers.
    pub remaining: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PrivacyRequest {
    pub is_private: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct MineResponse {
    pub items: Vec<ItinerarySummaryRow>,
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub tags: Vec<TagCount>,
}

// ────────────────────────────────────────────────────────────────────────────
// Generation
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/itineraries/generate
///
/// Signed-in users are metered by tier. Visitors go through CAPTCHA and the
/// anonymous guard; the guard's cookie is returned even when the call is denied.
pub async fn handle_generate(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, AppError> {
    if let Some(user) = user.0 {
        return Ok(generate_for_user(&state, &user, request).await?.into_response());
    }

    let model = Tier::Free.model_profile();
    let request = request.validated(model.max_days)?;
    let client = ClientInfo::from_headers(&headers);
    state
        .captcha
        .verify(request.captcha_token.as_deref(), &client.ip)
        .await?;

    let check = check_anonymous(
        &state.db,
        jar,
        &headers,
        &state.config.anon_cookie_secret,
        &state.anon_policy,
        Utc::now(),
    )
    .await?;
    let result = generate_for_visitor(&state, check.session.id, check.outcome, &request, &model).await;
    Ok((check.jar, result).into_response())
}

async fn generate_for_user(
    state: &AppState,
    user: &AuthUser,
    request: GenerateRequest,
) -> Result<Json<GenerateResponse>, AppError> {
    let profile = ensure_profile(&state.db, user).await?;
    let tier = tier_from_fields(&profile.subscription_tier, &profile.subscription_status);
    let model = tier.model_profile();
    let request = request.validated(model.max_days)?;

    let now = Utc::now();
    let (charge, remaining) = match model.quota {
        Quota::Monthly(limit) => {
            let used = take_free_generation(&state.db, user.user_id, limit, now)
                .await?
                .ok_or_else(|| {
                    AppError::PaymentRequired(format!(
                        "You have used all {limit} free itineraries this month. Upgrade to keep planning."
                    ))
                })?;
            let charge = QuotaCharge::FreeSlot {
                period_start: month_start(now),
            };
            (charge, Some(limit.saturating_sub(used.max(0) as u32)))
        }
        Quota::Credits => {
            let left = take_credit(&state.db, user.user_id).await?.ok_or_else(|| {
                AppError::PaymentRequired("No credits left. Buy a credit pack to keep planning.".to_string())
            })?;
            (QuotaCharge::Credit, Some(left.max(0) as u32))
        }
        Quota::Unlimited => (QuotaCharge::Unmetered, None),
    };

    let result = create_itinerary(state, Some(user.user_id), &request, request.is_private, &model).await;
    let result = refund_on_error(result, || charge.refund(&state.db, user.user_id)).await;
    let itinerary = result?;

    info!(
        user_id = %user.user_id,
        tier = %tier,
        itinerary_id = %itinerary.id,
        "itinerary created"
    );
    Ok(Json(GenerateResponse {
        itinerary,
        remaining,
    }))
}

async fn generate_for_visitor(
    state: &AppState,
    session_id: Uuid,
    outcome: GuardOutcome,
    request: &GenerateRequest,
    model: &ModelProfile,
) -> Result<Json<GenerateResponse>, AppError> {
    if !outcome.allowed {
        let message = if outcome.blocked_until.is_some() {
            "Too many attempts. Please wait before trying again, or sign in."
        } else {
            "You have used your free anonymous itineraries. Sign up to keep planning."
        };
        return Err(AppError::RateLimited {
            message: message.to_string(),
            blocked_until: outcome.blocked_until,
        });
    }

    if !reserve_generation(&state.db, session_id, &state.anon_policy).await? {
        return Err(AppError::RateLimited {
            message: "You have used your free anonymous itineraries. Sign up to keep planning."
                .to_string(),
            blocked_until: None,
        });
    }

    let result = create_itinerary(state, None, request, true, model).await;
    let itinerary = refund_on_error(result, || release_generation(&state.db, session_id)).await?;

    info!(%session_id, itinerary_id = %itinerary.id, "anonymous itinerary created");
    Ok(Json(GenerateResponse {
        itinerary,
        remaining: Some(outcome.remaining.saturating_sub(1)),
    }))
}

/// Quota a signed-in user was charged before generation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuotaCharge {
    Unmetered,
    Credit,
    FreeSlot { period_start: DateTime<Utc> },
}

impl QuotaCharge {
    async fn refund(self, db: &PgPool, user_id: Uuid) -> Result<(), AppError> {
        match self {
            QuotaCharge::Unmetered => Ok(()),
            QuotaCharge::Credit => refund_credit(db, user_id).await,
            QuotaCharge::FreeSlot { period_start } => {
                release_free_generation(db, user_id, period_start).await
            }
        }
    }
}

/// Runs `refund` when `result` is an error. A failed refund is logged; the original error wins.
async fn refund_on_error<T, R, Fut>(result: Result<T, AppError>, refund: R) -> Result<T, AppError>
where
    R: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    if result.is_err() {
        if let Err(e) = refund().await {
            error!("failed to give back quota after a failed generation: {e}");
        }
    }
    result
}

/// Generates the plan and stores it. Callers undo their quota charge on error.
async fn create_itinerary(
    state: &AppState,
    user_id: Option<Uuid>,
    request: &GenerateRequest,
    is_private: bool,
    model: &ModelProfile,
) -> Result<ItineraryRow, AppError> {
    let plan = generate_plan(state.llm.as_ref(), model, request).await?;
    let plan = serde_json::to_value(&plan).map_err(|e| AppError::Internal(e.into()))?;
    let tags = derive_tags(&request.interests, request.budget, request.days);

    store::insert_itinerary(
        &state.db,
        NewItinerary {
            user_id,
            destination: &request.destination,
            days: request.days,
            travelers: request.travelers,
            budget: request.budget.as_str(),
            interests: &request.interests,
            plan: &plan,
            is_private,
            tags: &tags,
            model_used: model.model,
        },
    )
    .await
}

// ────────────────────────────────────────────────────────────────────────────
// Gallery
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/itineraries
pub async fn handle_list_public(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<GalleryPage>, AppError> {
    Ok(Json(store::list_public(&state.db, &query).await?))
}

/// GET /api/itineraries/mine
pub async fn handle_list_mine(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MineResponse>, AppError> {
    let items = store::list_for_user(&state.db, user.user_id).await?;
    Ok(Json(MineResponse { items }))
}

/// GET /api/itineraries/:id
///
/// Private itineraries are reported as missing to everyone but their owner.
pub async fn handle_get(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<ItineraryRow>, AppError> {
    let id = parse_uuid_param("id", &raw_id)?;
    let itinerary = store::get_itinerary(&state.db, id)
        .await?
        .filter(|it| !it.is_private || user.user_id().is_some_and(|uid| it.is_owned_by(uid)))
        .ok_or_else(|| AppError::NotFound(format!("Itinerary {id} not found")))?;
    Ok(Json(itinerary))
}

/// PATCH /api/itineraries/:id/privacy
pub async fn handle_set_privacy(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
    Json(request): Json<PrivacyRequest>,
) -> Result<Json<ItineraryRow>, AppError> {
    let id = parse_uuid_param("id", &raw_id)?;
    load_owned(&state, id, &user).await?;
    let itinerary = store::set_privacy(&state.db, id, request.is_private).await?;
    Ok(Json(itinerary))
}

/// PATCH /api/itineraries/:id/status
pub async fn handle_set_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<ItineraryRow>, AppError> {
    let id = parse_uuid_param("id", &raw_id)?;
    let status: ItineraryStatus = request
        .status
        .parse()
        .map_err(|e: ParseEnumError| AppError::Validation(e.to_string()))?;
    load_owned(&state, id, &user).await?;
    let itinerary = store::set_status(&state.db, id, status.as_str()).await?;
    Ok(Json(itinerary))
}

/// DELETE /api/itineraries/:id
///
/// Owners may delete their own itineraries; admins may delete any.
pub async fn handle_delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_uuid_param("id", &raw_id)?;
    let itinerary = store::get_itinerary(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Itinerary {id} not found")))?;

    if !itinerary.is_owned_by(user.user_id) {
        let is_admin = get_profile(&state.db, user.user_id)
            .await?
            .is_some_and(|p| p.is_admin());
        if !is_admin {
            return Err(AppError::Forbidden);
        }
        info!(admin_id = %user.user_id, itinerary_id = %id, "admin deleted itinerary");
    }

    store::delete_itinerary(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/itineraries/:id/like
pub async fn handle_toggle_like(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<LikeState>, AppError> {
    let id = parse_uuid_param("id", &raw_id)?;
    store::get_itinerary(&state.db, id)
        .await?
        .filter(|it| !it.is_private)
        .ok_or_else(|| AppError::NotFound(format!("Itinerary {id} not found")))?;
    ensure_profile(&state.db, &user).await?;

    Ok(Json(store::toggle_like(&state.db, user.user_id, id).await?))
}

/// GET /api/tags
pub async fn handle_tags(State(state): State<AppState>) -> Result<Json<TagsResponse>, AppError> {
    let tags = store::tag_counts(&state.db).await?;
    Ok(Json(TagsResponse { tags }))
}

/// GET /api/stats
pub async fn handle_stats(State(state): State<AppState>) -> Result<Json<GalleryStats>, AppError> {
    Ok(Json(store::gallery_stats(&state.db).await?))
}

/// Loads an itinerary the caller owns. Private ones owned by others look missing.
async fn load_owned(state: &AppState, id: Uuid, user: &AuthUser) -> Result<ItineraryRow, AppError> {
    let itinerary = store::get_itinerary(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Itinerary {id} not found")))?;

    if itinerary.is_owned_by(user.user_id) {
        Ok(itinerary)
    } else if itinerary.is_private {
        Err(AppError::NotFound(format!("Itinerary {id} not found")))
    } else {
        Err(AppError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_failed_generation_gives_quota_back() {
        let refunds = AtomicUsize::new(0);
        let result: Result<(), AppError> = refund_on_error(
            Err(AppError::Llm("model unavailable".to_string())),
            || async {
                refunds.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Llm(_))));
        assert_eq!(refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successful_generation_keeps_charge() {
        let refunds = AtomicUsize::new(0);
        let result = refund_on_error(Ok(7), || async {
            refunds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refund_failure_keeps_original_error() {
        let result: Result<(), AppError> = refund_on_error(
            Err(AppError::Llm("model unavailable".to_string())),
            || async { Err(AppError::NotFound("profile".to_string())) },
        )
        .await;
        assert!(matches!(result, Err(AppError::Llm(_))));
    }

    #[tokio::test]
    async fn test_unmetered_charge_refunds_without_database() {
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        assert!(QuotaCharge::Unmetered.refund(&db, Uuid::new_v4()).await.is_ok());
    }
}
