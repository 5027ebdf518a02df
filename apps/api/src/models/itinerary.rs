use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ItineraryRow {
    pub id: Uuid,
    /// `None` for itineraries created by anonymous visitors.
    pub user_id: Option<Uuid>,
    pub destination: String,
    pub days: i32,
    pub travelers: i32,
    pub budget: String,
    pub interests: Vec<String>,
    pub plan: Value,
    pub is_private: bool,
    pub status: String,
    pub tags: Vec<String>,
    pub likes: i32,
    pub model_used: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItineraryRow {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == Some(user_id)
    }
}

/// Lightweight projection used by gallery listings (omits the full plan).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ItinerarySummaryRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub destination: String,
    pub days: i32,
    pub travelers: i32,
    pub budget: String,
    pub is_private: bool,
    pub status: String,
    pub tags: Vec<String>,
    pub likes: i32,
    pub created_at: DateTime<Utc>,
}
