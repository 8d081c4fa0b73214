mod history;
mod preferences;
mod session;
mod task;

pub use history::{CompletionHistory, EnergyPattern};
pub use preferences::{PreferencesUpdate, UserPreferences};
pub use session::{CompletionReport, ProductivityStats, UserSession};
pub use task::{Task, TaskStatus, TaskUpdate};

use crate::error::{AppError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Lossless JSON form shared by every persisted entity.
pub trait Record: Serialize + DeserializeOwned {
    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| AppError::invalid_data(err.to_string()))
    }
}

impl Record for Task {}
impl Record for UserPreferences {}
impl Record for CompletionHistory {}
impl Record for EnergyPattern {}
impl Record for UserSession {}
