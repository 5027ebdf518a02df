use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub credits: i32,
    /// Free-tier generations claimed since `free_period_start`.
    pub free_generations_used: i32,
    pub free_period_start: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRow {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}
