use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::itinerary::{ItineraryRow, ItinerarySummaryRow};

const MAX_PAGE_SIZE: i64 = 50;
const DEFAULT_PAGE_SIZE: i64 = 12;
const MAX_PAGE: i64 = 10_000;
const MAX_TAGS: i64 = 50;

/// Parameters for inserting a freshly generated itinerary.
pub struct NewItinerary<'a> {
    pub user_id: Option<Uuid>,
    pub destination: &'a str,
    pub days: i32,
    pub travelers: i32,
    pub budget: &'a str,
    pub interests: &'a [String],
    pub plan: &'a serde_json::Value,
    pub is_private: bool,
    pub tags: &'a [String],
    pub model_used: &'a str,
}

pub async fn insert_itinerary(pool: &PgPool, new: NewItinerary<'_>) -> Result<ItineraryRow, AppError> {
    Ok(sqlx::query_as::<_, ItineraryRow>(
        r#"
        INSERT INTO itineraries
            (user_id, destination, days, travelers, budget, interests, plan,
             is_private, tags, model_used)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(new.user_id)
    .bind(new.destination)
    .bind(new.days)
    .bind(new.travelers)
    .bind(new.budget)
    .bind(new.interests)
    .bind(new.plan)
    .bind(new.is_private)
    .bind(new.tags)
    .bind(new.model_used)
    .fetch_one(pool)
    .await?)
}

pub async fn get_itinerary(pool: &PgPool, id: Uuid) -> Result<Option<ItineraryRow>, AppError> {
    Ok(
        sqlx::query_as::<_, ItineraryRow>("SELECT * FROM itineraries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?,
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GallerySort {
    #[default]
    Recent,
    Popular,
}

impl GallerySort {
    fn order_by(&self) -> &'static str {
        match self {
            Self::Recent => "created_at DESC",
            Self::Popular => "likes DESC, created_at DESC",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub tag: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: GallerySort,
}

impl GalleryQuery {
    /// Clamped (limit, offset).
    pub fn window(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = self.page.unwrap_or(1).clamp(1, MAX_PAGE);
        (limit, (page - 1) * limit)
    }

    fn tag_filter(&self) -> Option<String> {
        self.tag
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }

    fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)))
    }
}

#[derive(Debug, Serialize)]
pub struct GalleryPage {
    pub items: Vec<ItinerarySummaryRow>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Escapes LIKE wildcards so user input matches literally.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

const PUBLIC_FILTER: &str = r#"
    WHERE is_private = false
      AND ($1::text IS NULL OR $1 = ANY(tags))
      AND ($2::text IS NULL OR destination ILIKE $2)
"#;

pub async fn list_public(pool: &PgPool, query: &GalleryQuery) -> Result<GalleryPage, AppError> {
    let (limit, offset) = query.window();
    let tag = query.tag_filter();
    let pattern = query.search_pattern();

    let sql = format!(
        r#"
        SELECT id, user_id, destination, days, travelers, budget, is_private, status,
               tags, likes, created_at
        FROM itineraries
        {PUBLIC_FILTER}
        ORDER BY {}
        LIMIT $3 OFFSET $4
        "#,
        query.sort.order_by()
    );
    let items = sqlx::query_as::<_, ItinerarySummaryRow>(&sql)
        .bind(&tag)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM itineraries {PUBLIC_FILTER}"))
        .bind(&tag)
        .bind(&pattern)
        .fetch_one(pool)
        .await?;

    Ok(GalleryPage {
        items,
        total,
        page: offset / limit + 1,
        limit,
    })
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<ItinerarySummaryRow>, AppError> {
    Ok(sqlx::query_as::<_, ItinerarySummaryRow>(
        r#"
        SELECT id, user_id, destination, days, travelers, budget, is_private, status,
               tags, likes, created_at
        FROM itineraries
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

pub async fn set_privacy(pool: &PgPool, id: Uuid, is_private: bool) -> Result<ItineraryRow, AppError> {
    Ok(sqlx::query_as::<_, ItineraryRow>(
        r#"
        UPDATE itineraries
        SET is_private = $2,
            status = CASE WHEN $2 AND status = 'published' THEN 'active' ELSE status END,
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(is_private)
    .fetch_one(pool)
    .await?)
}

/// Sets the status; publishing also makes the itinerary public.
pub async fn set_status(pool: &PgPool, id: Uuid, status: &str) -> Result<ItineraryRow, AppError> {
    Ok(sqlx::query_as::<_, ItineraryRow>(
        r#"
        UPDATE itineraries
        SET status = $2,
            is_private = CASE WHEN $2 = 'published' THEN false ELSE is_private END,
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .fetch_one(pool)
    .await?)
}

pub async fn delete_itinerary(pool: &PgPool, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM itineraries WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub likes: i32,
}

/// Adds the caller's like, or removes it if already present.
pub async fn toggle_like(pool: &PgPool, user_id: Uuid, itinerary_id: Uuid) -> Result<LikeState, AppError> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query("DELETE FROM itinerary_likes WHERE user_id = $1 AND itinerary_id = $2")
        .bind(user_id)
        .bind(itinerary_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
        == 1;

    let (delta, liked) = if removed {
        (-1, false)
    } else {
        sqlx::query("INSERT INTO itinerary_likes (user_id, itinerary_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(itinerary_id)
            .execute(&mut *tx)
            .await?;
        (1, true)
    };

    let likes: i32 = sqlx::query_scalar(
        "UPDATE itineraries SET likes = GREATEST(likes + $2, 0) WHERE id = $1 RETURNING likes",
    )
    .bind(itinerary_id)
    .bind(delta)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(LikeState { liked, likes })
}

#[derive(Debug, Serialize, FromRow)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

pub async fn tag_counts(pool: &PgPool) -> Result<Vec<TagCount>, AppError> {
    Ok(sqlx::query_as::<_, TagCount>(
        r#"
        SELECT tag, COUNT(*) AS count
        FROM itineraries, UNNEST(tags) AS tag
        WHERE is_private = false
        GROUP BY tag
        ORDER BY count DESC, tag ASC
        LIMIT $1
        "#,
    )
    .bind(MAX_TAGS)
    .fetch_all(pool)
    .await?)
}

#[derive(Debug, Serialize, FromRow)]
pub struct GalleryStats {
    pub itineraries: i64,
    pub destinations: i64,
    pub likes: i64,
}

pub async fn gallery_stats(pool: &PgPool) -> Result<GalleryStats, AppError> {
    Ok(sqlx::query_as::<_, GalleryStats>(
        r#"
        SELECT COUNT(*) AS itineraries,
               COUNT(DISTINCT lower(destination)) AS destinations,
               COALESCE(SUM(likes), 0)::BIGINT AS likes
        FROM itineraries
        WHERE is_private = false
        "#,
    )
    .fetch_one(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gallery_window_clamps() {
        let q = GalleryQuery::default();
        assert_eq!(q.window(), (12, 0));

        let q = GalleryQuery {
            page: Some(3),
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(q.window(), (50, 100));

        let q = GalleryQuery {
            page: Some(-4),
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(q.window(), (1, 0));
    }

    #[test]
    fn test_gallery_window_huge_page_does_not_overflow() {
        let q = GalleryQuery {
            page: Some(i64::MAX),
            limit: Some(50),
            ..Default::default()
        };
        assert_eq!(q.window(), (50, (MAX_PAGE - 1) * 50));
    }

    #[test]
    fn test_search_pattern_escapes_wildcards() {
        let q = GalleryQuery {
            search: Some(" 100%_fun ".to_string()),
            ..Default::default()
        };
        assert_eq!(q.search_pattern().as_deref(), Some("%100\\%\\_fun%"));

        let blank = GalleryQuery {
            search: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(blank.search_pattern().is_none());
    }

    #[test]
    fn test_tag_filter_normalizes() {
        let q = GalleryQuery {
            tag: Some(" Food ".to_string()),
            ..Default::default()
        };
        assert_eq!(q.tag_filter().as_deref(), Some("food"));
    }

    #[test]
    fn test_sort_parses_from_query() {
        let q: GalleryQuery = serde_json::from_value(serde_json::json!({"sort": "popular"})).unwrap();
        assert_eq!(q.sort, GallerySort::Popular);
        assert!(q.sort.order_by().starts_with("likes DESC"));
    }
}
