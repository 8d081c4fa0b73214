//! The persisted snapshot: every user's state plus a system block, held and
//! written as one JSON document.
//!
//! Each user's root tasks live in exactly one place in memory, the ordered
//! list inside [`UserSession`]. The flat id→task registry that the file
//! format carries next to the session is emitted from that list on every
//! write and folded back into it on read, so the two views cannot drift.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::config::StoreConfig;
use crate::model::{Task, UserSession};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auto_backup: bool,
    pub backup_retention_days: u32,
    pub compression_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_backup: true,
            backup_retention_days: crate::config::DEFAULT_RETENTION_DAYS,
            compression_enabled: false,
        }
    }
}

impl From<&StoreConfig> for Settings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            auto_backup: config.auto_backup,
            backup_retention_days: config.backup_retention_days,
            compression_enabled: config.compression_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_backup: Option<OffsetDateTime>,
    #[serde(default)]
    pub settings: Settings,
}

impl SystemBlock {
    pub fn new(now: OffsetDateTime, settings: Settings) -> Self {
        Self {
            version: SCHEMA_VERSION,
            created_at: now,
            last_backup: None,
            settings,
        }
    }
}

/// A feedback event. Caller fields are kept verbatim next to the
/// server-assigned timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analytics {
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_session: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "StoredUserRecord")]
pub struct UserRecord {
    pub session: UserSession,
    pub feedback: Vec<FeedbackEntry>,
    pub analytics: Analytics,
}

impl UserRecord {
    pub fn new(session: UserSession) -> Self {
        Self {
            session,
            feedback: Vec::new(),
            analytics: Analytics::default(),
        }
    }

    /// The flat registry view: root tasks keyed by id.
    pub fn task_registry(&self) -> BTreeMap<&str, &Task> {
        self.session
            .tasks()
            .iter()
            .map(|task| (task.id.as_str(), task))
            .collect()
    }
}

#[derive(Serialize)]
struct UserRecordView<'a> {
    session: &'a UserSession,
    tasks: BTreeMap<&'a str, &'a Task>,
    feedback: &'a [FeedbackEntry],
    analytics: &'a Analytics,
}

impl Serialize for UserRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        UserRecordView {
            session: &self.session,
            tasks: self.task_registry(),
            feedback: &self.feedback,
            analytics: &self.analytics,
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
struct StoredUserRecord {
    session: UserSession,
    #[serde(default)]
    tasks: BTreeMap<String, Task>,
    #[serde(default)]
    feedback: Vec<FeedbackEntry>,
    #[serde(default)]
    analytics: Analytics,
}

impl From<StoredUserRecord> for UserRecord {
    /// Folds the registry into the session's root list. Registry content
    /// wins for shared ids, session order is kept, registry-only tasks are
    /// appended oldest first.
    fn from(stored: StoredUserRecord) -> Self {
        let StoredUserRecord {
            mut session,
            mut tasks,
            feedback,
            analytics,
        } = stored;

        let mut roots: Vec<Task> = session
            .take_tasks()
            .into_iter()
            .map(|task| tasks.remove(&task.id).unwrap_or(task))
            .collect();

        let mut registry_only: Vec<Task> = tasks
            .into_iter()
            .map(|(id, mut task)| {
                if task.id != id {
                    tracing::warn!(key = %id, task_id = %task.id, "registry key does not match task id; using key");
                    task.id = id;
                }
                task
            })
            .collect();
        registry_only.sort_by_key(|task| task.created_at);
        roots.extend(registry_only);
        for task in &mut roots {
            task.normalize_timestamps();
        }

        session.replace_tasks(roots);
        Self {
            session,
            feedback,
            analytics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    pub system: SystemBlock,
}

impl Document {
    pub fn new(now: OffsetDateTime, settings: Settings) -> Self {
        Self {
            users: BTreeMap::new(),
            system: SystemBlock::new(now, settings),
        }
    }

    pub fn user(&self, user_id: &str) -> Option<&UserRecord> {
        self.users.get(user_id)
    }

    pub fn user_mut(&mut self, user_id: &str) -> Option<&mut UserRecord> {
        self.users.get_mut(user_id)
    }
}

/// `system.version` as written in a raw document, if present.
pub fn declared_version(value: &Value) -> Option<u64> {
    value.get("system")?.get("version")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::{Document, Settings, UserRecord};
    use crate::model::{Task, UserSession};
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn registry_is_written_from_the_root_list() {
        let mut session = UserSession::new("u1");
        let mut parent = Task::new("parent", "");
        parent.add_subtask(Task::new("child", ""));
        let parent_id = parent.id.clone();
        session.add_task(parent);

        let mut doc = Document::new(datetime!(2025-12-20 00:00 UTC), Settings::default());
        doc.users.insert("u1".to_string(), UserRecord::new(session));

        let value = serde_json::to_value(&doc).unwrap();
        let registry = value["users"]["u1"]["tasks"].as_object().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[&parent_id]["heading"], "parent");
        assert_eq!(value["users"]["u1"]["session"]["tasks"][0]["id"], parent_id.as_str());

        let restored: Document = serde_json::from_value(value).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn reading_reconciles_both_views() {
        let raw = json!({
            "session": {
                "user_id": "u1",
                "created_at": "2025-12-01T00:00:00Z",
                "last_updated": "2025-12-01T00:00:00Z",
                "tasks": [
                    { "id": "a", "heading": "stale copy", "created_at": "2025-12-01T00:00:00Z", "updated_at": "2025-12-01T00:00:00Z" },
                    { "id": "b", "heading": "session only", "created_at": "2025-12-01T00:00:00Z", "updated_at": "2025-12-01T00:00:00Z" }
                ]
            },
            "tasks": {
                "a": { "id": "a", "heading": "fresh copy", "created_at": "2025-12-01T00:00:00Z", "updated_at": "2025-12-02T00:00:00Z" },
                "c": { "id": "c", "heading": "registry only", "created_at": "2025-12-03T00:00:00Z", "updated_at": "2025-12-03T00:00:00Z" }
            }
        });

        let record: UserRecord = serde_json::from_value(raw).unwrap();
        let headings: Vec<&str> = record
            .session
            .tasks()
            .iter()
            .map(|task| task.heading.as_str())
            .collect();

        assert_eq!(headings, vec!["fresh copy", "session only", "registry only"]);
        assert_eq!(record.task_registry().len(), 3);
        assert!(record.feedback.is_empty());
        assert_eq!(record.analytics.total_sessions, 0);
    }

    #[test]
    fn feedback_keeps_caller_fields() {
        let raw = json!({
            "session": {
                "user_id": "u1",
                "created_at": "2025-12-01T00:00:00Z",
                "last_updated": "2025-12-01T00:00:00Z"
            },
            "feedback": [ { "timestamp": "2025-12-01T10:00:00Z", "rating": 4, "comment": "nice plan" } ]
        });

        let record: UserRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.feedback.len(), 1);
        assert_eq!(record.feedback[0].fields["rating"], 4);
        assert_eq!(record.feedback[0].timestamp, datetime!(2025-12-01 10:00 UTC));
    }
}
