use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    #[serde(alias = "completed")]
    Done,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "done" | "completed" => Ok(Self::Done),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(AppError::invalid_input(format!("unknown status '{other}'"))),
        }
    }
}

/// A unit of work. Owns its subtask tree outright.
///
/// Optional fields always serialize, as explicit `null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(alias = "title")]
    pub heading: String,
    #[serde(default, alias = "description")]
    pub details: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deadline: Option<OffsetDateTime>,
    /// Minutes.
    #[serde(default)]
    pub time_estimate: Option<u32>,
    #[serde(default)]
    pub resource_link: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Task>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "unix_epoch", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "unix_epoch", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn unix_epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

impl Task {
    pub fn new(heading: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new_at(heading, details, OffsetDateTime::now_utc())
    }

    pub fn new_at(heading: impl Into<String>, details: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            heading: heading.into(),
            details: details.into(),
            status: TaskStatus::Pending,
            deadline: None,
            time_estimate: None,
            resource_link: None,
            subtasks: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_deadline(mut self, deadline: OffsetDateTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_time_estimate(mut self, minutes: u32) -> Self {
        self.time_estimate = Some(minutes);
        self
    }

    pub fn with_resource_link(mut self, link: impl Into<String>) -> Self {
        self.resource_link = Some(link.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn update(&mut self, update: TaskUpdate) {
        self.update_at(update, OffsetDateTime::now_utc());
    }

    /// Applies the fields present in `update`. Always bumps `updated_at`.
    pub fn update_at(&mut self, update: TaskUpdate, now: OffsetDateTime) {
        if let Some(heading) = update.heading {
            self.heading = heading;
        }
        if let Some(details) = update.details {
            self.details = details;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(deadline) = update.deadline {
            self.deadline = deadline;
        }
        if let Some(time_estimate) = update.time_estimate {
            self.time_estimate = time_estimate;
        }
        if let Some(resource_link) = update.resource_link {
            self.resource_link = resource_link;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        self.touch(now);
    }

    pub fn add_subtask(&mut self, subtask: Task) {
        self.add_subtask_at(subtask, OffsetDateTime::now_utc());
    }

    pub fn add_subtask_at(&mut self, subtask: Task, now: OffsetDateTime) {
        self.subtasks.push(subtask);
        self.touch(now);
    }

    pub fn remove_subtask(&mut self, subtask_id: &str) -> Option<Task> {
        self.remove_subtask_at(subtask_id, OffsetDateTime::now_utc())
    }

    /// Removes a direct child by id. A missing id leaves the task untouched.
    pub fn remove_subtask_at(&mut self, subtask_id: &str, now: OffsetDateTime) -> Option<Task> {
        let index = self
            .subtasks
            .iter()
            .position(|subtask| subtask.id == subtask_id)?;
        let removed = self.subtasks.remove(index);
        self.touch(now);
        Some(removed)
    }

    /// Depth-first search through the whole subtask tree.
    pub fn find_subtask(&self, subtask_id: &str) -> Option<&Task> {
        for subtask in &self.subtasks {
            if subtask.id == subtask_id {
                return Some(subtask);
            }
            if let Some(found) = subtask.find_subtask(subtask_id) {
                return Some(found);
            }
        }
        None
    }

    pub fn subtask_count(&self) -> usize {
        self.subtasks
            .iter()
            .map(|subtask| 1 + subtask.subtask_count())
            .sum()
    }

    pub fn is_overdue(&self, now: OffsetDateTime) -> bool {
        match self.deadline {
            Some(deadline) => {
                deadline < now && !matches!(self.status, TaskStatus::Done | TaskStatus::Cancelled)
            }
            None => false,
        }
    }

    pub fn matches_query(&self, needle_lowercase: &str) -> bool {
        self.heading.to_lowercase().contains(needle_lowercase)
            || self.details.to_lowercase().contains(needle_lowercase)
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now.max(self.created_at);
    }

    /// Lifts `updated_at` to `created_at` wherever an old record has it lower.
    pub(crate) fn normalize_timestamps(&mut self) {
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }
        for subtask in &mut self.subtasks {
            subtask.normalize_timestamps();
        }
    }
}

/// Field-wise partial update. `None` leaves a field alone; for the nullable
/// fields `Some(None)` clears it.
///
/// Deserializes from a loose JSON object; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    #[serde(alias = "title")]
    pub heading: Option<String>,
    #[serde(alias = "description")]
    pub details: Option<String>,
    pub status: Option<TaskStatus>,
    #[serde(deserialize_with = "nullable_datetime")]
    pub deadline: Option<Option<OffsetDateTime>>,
    #[serde(deserialize_with = "nullable")]
    pub time_estimate: Option<Option<u32>>,
    #[serde(deserialize_with = "nullable")]
    pub resource_link: Option<Option<String>>,
    pub metadata: Option<Map<String, Value>>,
}

impl TaskUpdate {
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(fields))
            .map_err(|err| AppError::invalid_input(format!("invalid task update: {err}")))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn nullable_datetime<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Option<OffsetDateTime>>, D::Error>
where
    D: Deserializer<'de>,
{
    time::serde::rfc3339::option::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskStatus, TaskUpdate};
    use crate::model::Record;
    use serde_json::json;
    use time::macros::datetime;

    fn tree(depth: usize) -> Task {
        let mut root = Task::new_at("root", "top", datetime!(2025-12-20 09:00:00.123456 UTC))
            .with_deadline(datetime!(2025-12-24 17:30 UTC))
            .with_time_estimate(45)
            .with_metadata("tags", json!(["deep", "work"]));
        if depth > 0 {
            let mut child = tree(depth - 1);
            child.heading = format!("level-{depth}");
            root.subtasks.push(child);
        }
        root
    }

    #[test]
    fn new_task_is_pending_with_matching_timestamps() {
        let task = Task::new("Learn X", "read the book");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, task.updated_at);
        assert!(!task.id.is_empty());
    }

    #[test]
    fn deep_tree_round_trips() {
        let task = tree(3);
        assert_eq!(task.subtask_count(), 3);

        let value = task.to_value().unwrap();
        let restored = Task::from_value(value).unwrap();
        assert_eq!(restored, task);
        assert_eq!(
            restored.subtasks[0].subtasks[0].subtasks[0].created_at,
            datetime!(2025-12-20 09:00:00.123456 UTC)
        );
    }

    #[test]
    fn absent_optionals_serialize_as_null() {
        let task = Task::new("plain", "");
        let value = task.to_value().unwrap();

        assert!(value["deadline"].is_null());
        assert!(value["time_estimate"].is_null());
        assert!(value["resource_link"].is_null());
        let object = value.as_object().unwrap();
        assert!(object.contains_key("deadline"));
        assert!(object.contains_key("resource_link"));
    }

    #[test]
    fn legacy_field_names_are_accepted() {
        let task = Task::from_value(json!({
            "id": "task-1",
            "title": "old shape",
            "description": "from before headings",
            "status": "in_progress",
            "created_at": "2025-12-20T00:00:00Z",
            "updated_at": "2025-12-20T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(task.heading, "old shape");
        assert_eq!(task.details, "from before headings");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.subtasks.is_empty());
    }

    #[test]
    fn update_applies_present_fields_and_bumps_updated_at() {
        let mut task = Task::new_at("a", "b", datetime!(2025-01-01 00:00 UTC))
            .with_resource_link("https://example.com");
        task.update(TaskUpdate {
            heading: Some("renamed".to_string()),
            resource_link: Some(None),
            ..TaskUpdate::default()
        });

        assert_eq!(task.heading, "renamed");
        assert_eq!(task.details, "b");
        assert_eq!(task.resource_link, None);
        assert!(task.updated_at > task.created_at);
    }

    #[test]
    fn update_from_fields_ignores_unknown_keys() {
        let fields = json!({
            "status": "cancelled",
            "deadline": null,
            "colour": "blue"
        });
        let update = TaskUpdate::from_fields(fields.as_object().unwrap().clone()).unwrap();

        assert_eq!(update.status, Some(TaskStatus::Cancelled));
        assert_eq!(update.deadline, Some(None));
        assert_eq!(update.heading, None);
        assert_eq!(update.time_estimate, None);
    }

    #[test]
    fn status_transitions_are_unrestricted() {
        let mut task = Task::new("x", "");
        for status in [TaskStatus::Cancelled, TaskStatus::Done, TaskStatus::Pending] {
            task.update(TaskUpdate {
                status: Some(status),
                ..TaskUpdate::default()
            });
            assert_eq!(task.status, status);
        }
    }

    #[test]
    fn remove_subtask_is_noop_when_missing() {
        let mut task = Task::new_at("parent", "", datetime!(2025-01-01 00:00 UTC));
        let before = task.updated_at;

        assert!(task.remove_subtask("nope").is_none());
        assert_eq!(task.updated_at, before);

        let child = Task::new("child", "");
        let child_id = child.id.clone();
        task.add_subtask(child);
        assert!(task.find_subtask(&child_id).is_some());
        assert_eq!(task.remove_subtask(&child_id).map(|t| t.heading), Some("child".to_string()));
        assert!(task.subtasks.is_empty());
    }

    #[test]
    fn find_subtask_searches_the_whole_tree() {
        let task = tree(3);
        let deepest = task.subtasks[0].subtasks[0].subtasks[0].id.clone();
        assert!(task.find_subtask(&deepest).is_some());
    }

    #[test]
    fn overdue_ignores_finished_tasks() {
        let now = datetime!(2025-12-25 00:00 UTC);
        let mut task = Task::new("late", "").with_deadline(datetime!(2025-12-24 00:00 UTC));
        assert!(task.is_overdue(now));
        task.status = TaskStatus::Done;
        assert!(!task.is_overdue(now));
    }

    #[test]
    fn status_parse_accepts_common_spellings() {
        assert_eq!(TaskStatus::parse("In-Progress").unwrap(), TaskStatus::InProgress);
        assert_eq!(TaskStatus::parse("canceled").unwrap(), TaskStatus::Cancelled);
        assert_eq!(TaskStatus::parse("bogus").unwrap_err().code(), "invalid_input");
    }
}
