use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One finished task, as reported by the user. Never edited after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionHistory {
    pub task_id: String,
    /// Minutes, copied from the task's estimate at completion time.
    pub estimated_time: Option<u32>,
    pub actual_time: u32,
    /// Ratings are nominally 1-10 and are stored unchecked.
    pub difficulty_rating: u8,
    pub energy_level: u8,
    pub productivity_rating: u8,
    #[serde(default)]
    pub notes: String,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// One energy sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyPattern {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub energy_level: u8,
    pub activity_type: String,
    /// 0.0-1.0, unchecked.
    pub productivity_score: f64,
    #[serde(default)]
    pub context: Map<String, Value>,
}
