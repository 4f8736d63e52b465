use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A single recorded spend item tied to a trip. Immutable once created;
/// removal only happens through trip-level deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    #[serde(deserialize_with = "coerce_cost")]
    pub cost: f64,
    pub city: String,
    pub timestamp: DateTime<Utc>,
}

impl Expense {
    pub fn new(
        trip_id: impl Into<String>,
        name: impl Into<String>,
        cost: f64,
        city: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trip_id: trip_id.into(),
            name: name.into(),
            cost,
            city: city.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Cached expense lists may carry legacy costs as strings or junk values.
/// Anything that does not read as a number aggregates as zero.
fn coerce_cost<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(number) => number.as_f64().unwrap_or(0.0),
        serde_json::Value::String(raw) => raw.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}
