//! Itinerary request and plan types, plus the checks applied to both.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::AppError;
use crate::tiers::ParseEnumError;

const MAX_DESTINATION_LEN: usize = 100;
const MAX_TRAVELERS: i32 = 20;
const MAX_INTERESTS: usize = 10;
const MAX_INTEREST_LEN: usize = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Budget,
    #[default]
    Moderate,
    Luxury,
}

impl Budget {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Moderate => "moderate",
            Self::Luxury => "luxury",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItineraryStatus {
    Active,
    Completed,
    Published,
}

impl ItineraryStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for ItineraryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItineraryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "published" => Ok(Self::Published),
            _ => Err(ParseEnumError {
                kind: "itinerary status",
                value: s.to_string(),
            }),
        }
    }
}

/// Request body for itinerary generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub destination: String,
    pub days: i32,
    #[serde(default = "default_travelers")]
    pub travelers: i32,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub interests: Vec<String>,
    /// Ignored for anonymous visitors, whose itineraries are always private.
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

fn default_travelers() -> i32 {
    1
}

impl GenerateRequest {
    /// Validates the request against the caller's trip-length limit and normalizes it.
    pub fn validated(mut self, max_days: u32) -> Result<Self, AppError> {
        self.destination = self.destination.trim().to_string();
        if self.destination.is_empty() {
            return Err(AppError::Validation("destination cannot be empty".to_string()));
        }
        if self.destination.chars().count() > MAX_DESTINATION_LEN {
            return Err(AppError::Validation(format!(
                "destination must be at most {MAX_DESTINATION_LEN} characters"
            )));
        }
        if self.days < 1 || self.days as u32 > max_days {
            return Err(AppError::Validation(format!(
                "days must be between 1 and {max_days} for your plan"
            )));
        }
        if !(1..=MAX_TRAVELERS).contains(&self.travelers) {
            return Err(AppError::Validation(format!(
                "travelers must be between 1 and {MAX_TRAVELERS}"
            )));
        }
        if self.interests.len() > MAX_INTERESTS {
            return Err(AppError::Validation(format!(
                "at most {MAX_INTERESTS} interests are allowed"
            )));
        }
        self.interests = normalize_interests(&self.interests)?;
        Ok(self)
    }
}

fn normalize_interests(raw: &[String]) -> Result<Vec<String>, AppError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for interest in raw {
        let interest = interest.trim().to_lowercase();
        if interest.is_empty() {
            continue;
        }
        if interest.chars().count() > MAX_INTEREST_LEN {
            return Err(AppError::Validation(format!(
                "interests must be at most {MAX_INTEREST_LEN} characters"
            )));
        }
        if seen.insert(interest.clone()) {
            out.push(interest);
        }
    }
    Ok(out)
}

/// Gallery tags for a generated itinerary: interests, budget and a trip-length bucket.
pub fn derive_tags(interests: &[String], budget: Budget, days: i32) -> Vec<String> {
    let length = match days {
        i32::MIN..=3 => "weekend",
        4..=7 => "week",
        _ => "extended",
    };
    let mut tags: Vec<String> = interests.to_vec();
    for extra in [budget.as_str(), length] {
        if !tags.iter().any(|t| t == extra) {
            tags.push(extra.to_string());
        }
    }
    tags
}

/// Day-by-day plan produced by the LLM and stored as JSONB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryPlan {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub days: Vec<DayPlan>,
    #[serde(default)]
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub day: u32,
    pub title: String,
    pub places: Vec<Place>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub estimated_cost: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanIssue {
    #[error("plan has no title")]
    MissingTitle,
    #[error("expected {expected} days, got {actual}")]
    WrongDayCount { expected: u32, actual: usize },
    #[error("day at position {position} is numbered {day}")]
    DayOutOfOrder { position: usize, day: u32 },
    #[error("day {0} has no places")]
    EmptyDay(u32),
    #[error("day {0} has a place without a name")]
    UnnamedPlace(u32),
}

impl ItineraryPlan {
    /// Checks that the plan covers exactly `expected_days` days numbered 1..=N, each non-empty.
    pub fn check(&self, expected_days: u32) -> Result<(), PlanIssue> {
        if self.title.trim().is_empty() {
            return Err(PlanIssue::MissingTitle);
        }
        if self.days.len() != expected_days as usize {
            return Err(PlanIssue::WrongDayCount {
                expected: expected_days,
                actual: self.days.len(),
            });
        }
        for (position, day) in self.days.iter().enumerate() {
            if day.day as usize != position + 1 {
                return Err(PlanIssue::DayOutOfOrder {
                    position: position + 1,
                    day: day.day,
                });
            }
            if day.places.is_empty() {
                return Err(PlanIssue::EmptyDay(day.day));
            }
            if day.places.iter().any(|p| p.name.trim().is_empty()) {
                return Err(PlanIssue::UnnamedPlace(day.day));
            }
        }
        Ok(())
    }
}
