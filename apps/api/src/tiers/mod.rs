//! Subscription tiers and the static model table that governs what each tier may do.

pub mod resolver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription tier levels, ordered from least to most entitled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    /// Pay-as-you-go: one credit per generation.
    Basic,
    Premium,
    Enterprise,
}

impl Tier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }

    /// Static model selection for this tier.
    pub const fn model_profile(&self) -> ModelProfile {
        match self {
            Self::Free => ModelProfile {
                model: "meta-llama/llama-3.3-70b-instruct",
                max_tokens: 4000,
                max_days: 5,
                quota: Quota::Monthly(3),
            },
            Self::Basic => ModelProfile {
                model: "openai/gpt-4o-mini",
                max_tokens: 8000,
                max_days: 14,
                quota: Quota::Credits,
            },
            Self::Premium => ModelProfile {
                model: "anthropic/claude-3.5-sonnet",
                max_tokens: 12000,
                max_days: 30,
                quota: Quota::Unlimited,
            },
            Self::Enterprise => ModelProfile {
                model: "anthropic/claude-3.5-sonnet",
                max_tokens: 16000,
                max_days: 30,
                quota: Quota::Unlimited,
            },
        }
    }
}

impl ModelProfile {
    /// Generations left for a user; `None` means unmetered.
    pub fn remaining(&self, credits: i32, used_this_month: i64) -> Option<u32> {
        match self.quota {
            Quota::Monthly(limit) => Some((i64::from(limit) - used_this_month).max(0) as u32),
            Quota::Credits => Some(credits.max(0) as u32),
            Quota::Unlimited => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" | "payg" => Ok(Self::Basic),
            "premium" | "pro" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(ParseEnumError {
                kind: "tier",
                value: s.to_string(),
            }),
        }
    }
}

/// Subscription status as mirrored from the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Inactive,
}

impl SubscriptionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Inactive => "inactive",
        }
    }

    /// Only active and trialing subscriptions unlock the stored tier.
    pub const fn grants_tier(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Maps a Stripe subscription status onto the statuses tracked on profiles.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" | "unpaid" => Self::PastDue,
            "canceled" | "incomplete_expired" => Self::Canceled,
            _ => Self::Inactive,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "inactive" => Ok(Self::Inactive),
            _ => Err(ParseEnumError {
                kind: "subscription status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// How generations are metered for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "limit", rename_all = "snake_case")]
pub enum Quota {
    /// At most N generations per calendar month.
    Monthly(u32),
    /// Each generation consumes one prepaid credit.
    Credits,
    Unlimited,
}

/// LLM model and limits attached to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelProfile {
    pub model: &'static str,
    pub max_tokens: u32,
    pub max_days: u32,
    pub quota: Quota,
}
