use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnonymousSessionRow {
    pub id: Uuid,
    pub token: String,
    pub fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub generation_count: i32,
    pub attempt_count: i32,
    pub window_started_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
