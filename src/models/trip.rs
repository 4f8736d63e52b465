use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TripStatus {
    #[default]
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "completed")]
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "completed" {
            TripStatus::Completed
        } else {
            TripStatus::Active
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's travel budget session with its destination and expense ledger.
///
/// `remaining_budget` is a derived cache; when present it equals
/// `budget - sum(expense costs)` after reconciliation, and may be stale
/// between an optimistic local write and remote confirmation.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub user_uuid: String,
    pub destination: String,
    pub purpose: Option<String>,
    pub budget: f64,
    pub duration_days: i64,
    #[serde(default)]
    pub status: TripStatus,
    pub remaining_budget: Option<f64>,
    pub recommendations: Option<RecommendationBundle>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Opaque structured content produced by the recommendation generator.
/// Field names follow the JSON the assistant is prompted for.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecommendationBundle {
    #[serde(default)]
    pub food: Vec<RecommendationItem>,
    #[serde(default)]
    pub places: Vec<RecommendationItem>,
    #[serde(default)]
    pub stays: Vec<RecommendationItem>,
    #[serde(default)]
    pub travel_tips: Vec<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    // The assistant names the price field differently per category.
    #[serde(default, alias = "ticket", alias = "price")]
    pub cost: Option<String>,
}
