use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Scheduling settings for one user. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// Minutes.
    pub preferred_work_duration: u32,
    pub min_work_duration: u32,
    pub max_work_duration: u32,
    pub break_duration: u32,
    /// Hours of the day (0-23) when energy usually peaks.
    pub peak_energy_hours: Vec<u8>,
    pub avoid_hours: Vec<u8>,
    pub timezone: String,
    pub notifications_enabled: bool,
    pub break_reminders: bool,
    pub deadline_alerts: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            preferred_work_duration: 25,
            min_work_duration: 10,
            max_work_duration: 90,
            break_duration: 5,
            peak_energy_hours: vec![9, 10, 11],
            avoid_hours: Vec::new(),
            timezone: "UTC".to_string(),
            notifications_enabled: true,
            break_reminders: true,
            deadline_alerts: true,
        }
    }
}

impl UserPreferences {
    /// Returns a new value with the fields present in `update` overwritten.
    pub fn merged(&self, update: PreferencesUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(value) = update.preferred_work_duration {
            merged.preferred_work_duration = value;
        }
        if let Some(value) = update.min_work_duration {
            merged.min_work_duration = value;
        }
        if let Some(value) = update.max_work_duration {
            merged.max_work_duration = value;
        }
        if let Some(value) = update.break_duration {
            merged.break_duration = value;
        }
        if let Some(value) = update.peak_energy_hours {
            merged.peak_energy_hours = value;
        }
        if let Some(value) = update.avoid_hours {
            merged.avoid_hours = value;
        }
        if let Some(value) = update.timezone {
            merged.timezone = value;
        }
        if let Some(value) = update.notifications_enabled {
            merged.notifications_enabled = value;
        }
        if let Some(value) = update.break_reminders {
            merged.break_reminders = value;
        }
        if let Some(value) = update.deadline_alerts {
            merged.deadline_alerts = value;
        }
        merged
    }
}

/// Partial preferences. Unknown keys in the JSON form are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreferencesUpdate {
    pub preferred_work_duration: Option<u32>,
    pub min_work_duration: Option<u32>,
    pub max_work_duration: Option<u32>,
    pub break_duration: Option<u32>,
    pub peak_energy_hours: Option<Vec<u8>>,
    pub avoid_hours: Option<Vec<u8>>,
    pub timezone: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub break_reminders: Option<bool>,
    pub deadline_alerts: Option<bool>,
}

impl PreferencesUpdate {
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(fields))
            .map_err(|err| AppError::invalid_input(format!("invalid preferences: {err}")))
    }
}
