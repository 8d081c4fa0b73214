//! The single-document store.
//!
//! Opening walks the startup path once: bootstrap a missing file, migrate a
//! legacy one, or quarantine an unreadable one and refuse to start. After
//! that every mutation runs under one lock against a draft copy of the
//! whole document: apply, take the pre-write backup, write the full
//! document, and only then swap the draft in. A failed write leaves the
//! in-memory state as it was.
//!
//! Each write is O(document size). There is no cross-process locking; two
//! processes pointed at the same file will overwrite each other.

use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::analytics::{AnalyticsReport, build_report};
use super::backup::{self, BackupInfo, REASON_AUTO, REASON_CORRUPTED, REASON_PRE_RESTORE};
use super::document::{self, Document, FeedbackEntry, SCHEMA_VERSION, Settings, SystemBlock, UserRecord};
use super::migrate::{self, MigrationContext};
use super::transfer::{self, EXPORT_VERSION, UserExport};
use super::write_json_atomic;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::model::{CompletionReport, Task, TaskStatus, TaskUpdate, UserSession};

/// How the document came to be in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file existed; an empty document was written.
    Bootstrapped,
    Loaded,
    /// A legacy or incomplete shape was rewritten in memory. It reaches
    /// disk with the next write.
    Migrated,
}

pub struct SnapshotStore {
    config: StoreConfig,
    backup_dir: PathBuf,
    clock: Box<dyn Clock>,
    outcome: LoadOutcome,
    document: Mutex<Document>,
}

enum DecodeFailure {
    Unreadable(String),
    Unsupported(u64),
}

struct Decoded {
    document: Document,
    migrated: bool,
}

fn decode(raw: &[u8], config: &StoreConfig, now: OffsetDateTime) -> std::result::Result<Decoded, DecodeFailure> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|err| DecodeFailure::Unreadable(err.to_string()))?;

    if let Some(version) = document::declared_version(&value)
        && version > u64::from(SCHEMA_VERSION)
    {
        return Err(DecodeFailure::Unsupported(version));
    }

    let settings = Settings::from(config);
    let ctx = MigrationContext {
        default_user_id: &config.default_user_id,
        now,
        settings: &settings,
    };
    let migrated = migrate::migrate(value, &ctx).map_err(|err| DecodeFailure::Unreadable(err.message()))?;
    let mut document: Document = serde_json::from_value(migrated.value)
        .map_err(|err| DecodeFailure::Unreadable(err.to_string()))?;

    let upgraded = document.system.version < SCHEMA_VERSION;
    if upgraded {
        document.system.version = SCHEMA_VERSION;
    }

    Ok(Decoded {
        document,
        migrated: migrated.changed || upgraded,
    })
}

fn provision<'a>(doc: &'a mut Document, user_id: &str, now: OffsetDateTime) -> &'a mut UserRecord {
    match doc.users.entry(user_id.to_string()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            tracing::info!(user_id, "provisioned user session");
            let mut record = UserRecord::new(UserSession::new_at(user_id, now));
            record.analytics.total_sessions = 1;
            entry.insert(record)
        }
    }
}

impl SnapshotStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_clock(config, Box::new(SystemClock))
    }

    /// Fails with [`AppError::Corrupted`] when the primary file exists but
    /// cannot be read back; a copy is quarantined into the backup directory
    /// first.
    pub fn open_with_clock(config: StoreConfig, clock: Box<dyn Clock>) -> Result<Self> {
        let backup_dir = config.backup_dir();
        let path = config.data_file.clone();
        let now = clock.now();

        let (document, outcome) = if !path.exists() {
            let document = Document::new(now, Settings::from(&config));
            write_json_atomic(&path, &document)?;
            tracing::info!(path = %path.display(), "bootstrapped empty document");
            (document, LoadOutcome::Bootstrapped)
        } else {
            let raw = std::fs::read(&path).map_err(|err| AppError::io_at(&path, err))?;
            match decode(&raw, &config, now) {
                Ok(Decoded { document, migrated }) => {
                    let outcome = if migrated {
                        tracing::info!(path = %path.display(), "document migrated in memory");
                        LoadOutcome::Migrated
                    } else {
                        LoadOutcome::Loaded
                    };
                    (document, outcome)
                }
                Err(DecodeFailure::Unsupported(version)) => {
                    return Err(AppError::invalid_data(format!(
                        "document version {version} is newer than supported {SCHEMA_VERSION}"
                    )));
                }
                Err(DecodeFailure::Unreadable(message)) => {
                    let quarantined_to =
                        match backup::create_backup(&path, &backup_dir, REASON_CORRUPTED, now) {
                            Ok(info) => Some(info.path),
                            Err(err) => {
                                tracing::warn!(path = %path.display(), error = %err, "could not quarantine corrupted document");
                                None
                            }
                        };
                    tracing::error!(path = %path.display(), error = %message, "primary document is unreadable");
                    return Err(AppError::Corrupted {
                        path,
                        quarantined_to,
                        message,
                    });
                }
            }
        };

        Ok(Self {
            config,
            backup_dir,
            clock,
            outcome,
            document: Mutex::new(document),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_file(&self) -> &Path {
        &self.config.data_file
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn load_outcome(&self) -> LoadOutcome {
        self.outcome
    }

    pub fn system(&self) -> SystemBlock {
        self.lock().system.clone()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.lock().users.keys().cloned().collect()
    }

    // ---------------------------------------------------------------------
    // sessions
    // ---------------------------------------------------------------------

    /// Never fails. If the freshly provisioned session cannot be written it
    /// is still returned, unsaved.
    pub fn get_or_create_user_session(&self, user_id: &str) -> UserSession {
        if let Some(session) = self.get_user_session(user_id) {
            return session;
        }
        let key = self.user_key(user_id);

        match self.mutate("get_or_create_user_session", |doc, now| {
            provision(doc, key, now).session.clone()
        }) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(user_id = key, error = %err, "returning unsaved session");
                UserSession::new_at(key, self.clock.now())
            }
        }
    }

    /// Pure read; unlike [`Self::get_or_create_user_session`] it never
    /// provisions.
    pub fn get_user_session(&self, user_id: &str) -> Option<UserSession> {
        let key = self.user_key(user_id);
        self.lock().user(key).map(|record| record.session.clone())
    }

    /// Replaces the user's whole session block and stamps `last_session`.
    pub fn save_user_session(&self, session: &UserSession) -> Result<()> {
        let key = self.user_key(session.user_id());
        self.mutate("save_user_session", |doc, now| {
            let record = provision(doc, key, now);
            record.session = session.clone();
            record.analytics.last_session = Some(now);
        })
    }

    /// Runs `op` on the user's session inside one locked read-modify-write.
    /// `op` receives the store clock's `now` for the `_at` session intents.
    pub fn with_session<R>(
        &self,
        user_id: &str,
        op: impl FnOnce(&mut UserSession, OffsetDateTime) -> R,
    ) -> Result<R> {
        let key = self.user_key(user_id);
        self.mutate("with_session", |doc, now| {
            let record = provision(doc, key, now);
            record.analytics.last_session = Some(now);
            op(&mut record.session, now)
        })
    }

    pub fn mark_task_done(&self, user_id: &str, task_id: &str, report: CompletionReport) -> Result<bool> {
        let key = self.user_key(user_id);
        let done = self.mutate_if("mark_task_done", |doc, now| {
            let record = doc.user_mut(key)?;
            record.session.mark_task_done_at(task_id, report, now).then_some(())
        })?;
        Ok(done.is_some())
    }

    // ---------------------------------------------------------------------
    // tasks
    // ---------------------------------------------------------------------

    /// Adds a root task, or replaces the root task with the same id.
    pub fn add_task(&self, user_id: &str, task: Task) -> Result<Task> {
        let key = self.user_key(user_id);
        self.mutate("add_task", |doc, now| {
            let session = &mut provision(doc, key, now).session;
            let stored = task.clone();
            match session.task_mut(&task.id) {
                Some(existing) => {
                    *existing = task;
                    session.touch(now);
                }
                None => session.add_task_at(task, now),
            }
            stored
        })
    }

    /// Nests `subtask` under the root task `parent_id`. `Ok(None)` when the
    /// parent is not a root task of this user.
    pub fn add_subtask(&self, user_id: &str, parent_id: &str, subtask: Task) -> Result<Option<Task>> {
        let key = self.user_key(user_id);
        self.mutate_if("add_subtask", |doc, now| {
            let session = &mut doc.user_mut(key)?.session;
            let parent = session.task_mut(parent_id)?;
            parent.add_subtask_at(subtask, now);
            let updated = parent.clone();
            session.touch(now);
            Some(updated)
        })
    }

    pub fn get_task(&self, user_id: &str, task_id: &str) -> Option<Task> {
        let key = self.user_key(user_id);
        self.lock()
            .user(key)
            .and_then(|record| record.session.get_task(task_id))
            .cloned()
    }

    pub fn update_task(&self, user_id: &str, task_id: &str, update: TaskUpdate) -> Result<Option<Task>> {
        let key = self.user_key(user_id);
        self.mutate_if("update_task", |doc, now| {
            let session = &mut doc.user_mut(key)?.session;
            let task = session.task_mut(task_id)?;
            task.update_at(update, now);
            let updated = task.clone();
            session.touch(now);
            Some(updated)
        })
    }

    pub fn delete_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>> {
        let key = self.user_key(user_id);
        self.mutate_if("delete_task", |doc, now| {
            doc.user_mut(key)?.session.remove_task_at(task_id, now)
        })
    }

    pub fn list_tasks(&self, user_id: &str) -> Vec<Task> {
        self.select_tasks(user_id, |_| true)
    }

    pub fn list_tasks_by_status(&self, user_id: &str, status: TaskStatus) -> Vec<Task> {
        self.select_tasks(user_id, |task| task.status == status)
    }

    /// Case-insensitive substring match over heading and details.
    pub fn search_tasks(&self, user_id: &str, query: &str) -> Vec<Task> {
        let needle = query.trim().to_lowercase();
        self.select_tasks(user_id, |task| task.matches_query(&needle))
    }

    fn select_tasks(&self, user_id: &str, keep: impl Fn(&Task) -> bool) -> Vec<Task> {
        let key = self.user_key(user_id);
        self.lock()
            .user(key)
            .map(|record| {
                record
                    .session
                    .tasks()
                    .iter()
                    .filter(|task| keep(task))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // feedback and analytics
    // ---------------------------------------------------------------------

    /// Appends a feedback event. Any caller-supplied `timestamp` is replaced.
    pub fn add_feedback(&self, user_id: &str, mut fields: Map<String, Value>) -> Result<FeedbackEntry> {
        let key = self.user_key(user_id);
        fields.remove("timestamp");
        self.mutate("add_feedback", |doc, now| {
            let entry = FeedbackEntry {
                timestamp: now,
                fields,
            };
            provision(doc, key, now).feedback.push(entry.clone());
            entry
        })
    }

    /// The most recent `limit` events in insertion order, or all of them.
    pub fn get_feedback(&self, user_id: &str, limit: Option<usize>) -> Vec<FeedbackEntry> {
        let key = self.user_key(user_id);
        let guard = self.lock();
        let Some(record) = guard.user(key) else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |limit| record.feedback.len().saturating_sub(limit));
        record.feedback[skip..].to_vec()
    }

    pub fn get_analytics(&self, user_id: &str) -> Option<AnalyticsReport> {
        let key = self.user_key(user_id);
        let now = self.clock.now();
        self.lock()
            .user(key)
            .map(|record| build_report(key, record, now))
    }

    // ---------------------------------------------------------------------
    // backups
    // ---------------------------------------------------------------------

    pub fn create_backup(&self, reason: &str) -> Result<BackupInfo> {
        let mut guard = self.lock();
        let now = self.clock.now();
        let path = &self.config.data_file;

        if !path.exists() {
            write_json_atomic(path, &*guard)?;
        }
        let info = backup::create_backup(path, &self.backup_dir, reason, now)?;
        self.prune(guard.system.settings.backup_retention_days, now);

        let mut draft = guard.clone();
        draft.system.last_backup = Some(now);
        match write_json_atomic(path, &draft) {
            Ok(()) => *guard = draft,
            Err(err) => {
                tracing::warn!(error = %err, "backup written but last_backup not recorded");
            }
        }

        tracing::info!(file = %info.file_name, reason = %info.reason, "backup created");
        Ok(info)
    }

    /// Newest first. Listing problems are logged and yield an empty list.
    pub fn list_backups(&self) -> Vec<BackupInfo> {
        backup::list_backups(&self.backup_dir).unwrap_or_else(|err| {
            tracing::warn!(dir = %self.backup_dir.display(), error = %err, "could not list backups");
            Vec::new()
        })
    }

    /// Replaces the whole document with a backup, running the same
    /// validate/migrate path as startup. `Ok(false)` when no such backup
    /// exists; a backup that fails validation leaves the store untouched.
    pub fn restore_from_backup(&self, file_name: &str) -> Result<bool> {
        let Some(path) = backup::resolve_backup(&self.backup_dir, file_name) else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let raw = std::fs::read(&path).map_err(|err| AppError::io_at(&path, err))?;
        let now = self.clock.now();
        let mut restored = match decode(&raw, &self.config, now) {
            Ok(decoded) => decoded.document,
            Err(DecodeFailure::Unreadable(message)) => {
                return Err(AppError::invalid_data(format!(
                    "backup {file_name} is unreadable: {message}"
                )));
            }
            Err(DecodeFailure::Unsupported(version)) => {
                return Err(AppError::invalid_data(format!(
                    "backup {file_name} has unsupported version {version}"
                )));
            }
        };

        let mut guard = self.lock();
        if guard.system.settings.auto_backup {
            self.backup_best_effort(&mut restored.system, REASON_PRE_RESTORE, now);
        }
        if let Err(err) = write_json_atomic(&self.config.data_file, &restored) {
            tracing::error!(file = file_name, error = %err, "restore write failed");
            return Err(err);
        }
        *guard = restored;

        tracing::info!(file = file_name, "document restored from backup");
        Ok(true)
    }

    pub fn set_backup_settings(&self, auto_backup: Option<bool>, retention_days: Option<u32>) -> Result<Settings> {
        self.mutate("set_backup_settings", |doc, _| {
            if let Some(auto_backup) = auto_backup {
                doc.system.settings.auto_backup = auto_backup;
            }
            if let Some(days) = retention_days {
                doc.system.settings.backup_retention_days = days;
            }
            doc.system.settings.clone()
        })
    }

    // ---------------------------------------------------------------------
    // export / import / clear
    // ---------------------------------------------------------------------

    /// `Ok(false)` when the user does not exist.
    pub fn export_user_data(&self, user_id: &str, path: &Path) -> Result<bool> {
        let key = self.user_key(user_id);
        let Some(record) = self.lock().user(key).cloned() else {
            return Ok(false);
        };

        let export = UserExport {
            export_version: EXPORT_VERSION,
            exported_at: self.clock.now(),
            user_id: key.to_string(),
            data: record,
        };
        transfer::write_export(path, &export)?;
        tracing::info!(user_id = key, path = %path.display(), "user data exported");
        Ok(true)
    }

    /// Replaces the exported user wholesale and returns its id.
    pub fn import_user_data(&self, path: &Path) -> Result<String> {
        let export = transfer::read_export(path)?;
        let user_id = self.user_key(&export.user_id).to_string();
        if export.data.session.user_id() != user_id {
            tracing::warn!(
                user_id = %user_id,
                session_user_id = export.data.session.user_id(),
                "export session belongs to a different user id"
            );
        }

        let data = export.data;
        self.mutate("import_user_data", |doc, _| {
            doc.users.insert(user_id.clone(), data);
        })?;
        tracing::info!(user_id = %user_id, path = %path.display(), "user data imported");
        Ok(user_id)
    }

    /// Wipes one user, or every user when `user_id` is `None`. Returns how
    /// many users were removed.
    pub fn clear_all_data(&self, user_id: Option<&str>) -> Result<usize> {
        let removed = match user_id {
            Some(user_id) => {
                let key = self.user_key(user_id);
                self.mutate_if("clear_user", |doc, _| doc.users.remove(key).map(|_| 1))?
                    .unwrap_or(0)
            }
            None => self.mutate("clear_all", |doc, _| {
                let removed = doc.users.len();
                doc.users.clear();
                removed
            })?,
        };
        tracing::info!(removed, "cleared user data");
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // internals
    // ---------------------------------------------------------------------

    fn user_key<'a>(&'a self, user_id: &'a str) -> &'a str {
        let trimmed = user_id.trim();
        if trimmed.is_empty() {
            &self.config.default_user_id
        } else {
            trimmed
        }
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<R>(&self, action: &str, op: impl FnOnce(&mut Document, OffsetDateTime) -> R) -> Result<R> {
        let mut guard = self.lock();
        let now = self.clock.now();
        let mut draft = guard.clone();
        let out = op(&mut draft, now);
        self.commit(&mut guard, draft, now, action)?;
        Ok(out)
    }

    /// Like `mutate`, but `None` from `op` means nothing changed and
    /// nothing is written.
    fn mutate_if<R>(
        &self,
        action: &str,
        op: impl FnOnce(&mut Document, OffsetDateTime) -> Option<R>,
    ) -> Result<Option<R>> {
        let mut guard = self.lock();
        let now = self.clock.now();
        let mut draft = guard.clone();
        let Some(out) = op(&mut draft, now) else {
            return Ok(None);
        };
        self.commit(&mut guard, draft, now, action)?;
        Ok(Some(out))
    }

    fn commit(
        &self,
        guard: &mut MutexGuard<'_, Document>,
        mut draft: Document,
        now: OffsetDateTime,
        action: &str,
    ) -> Result<()> {
        if draft.system.settings.auto_backup {
            self.backup_best_effort(&mut draft.system, REASON_AUTO, now);
        }
        if let Err(err) = write_json_atomic(&self.config.data_file, &draft) {
            tracing::error!(action, error = %err, "document write failed; change discarded");
            return Err(err);
        }
        **guard = draft;
        tracing::debug!(action, "document saved");
        Ok(())
    }

    /// Copies the current primary file aside. Never fails the caller.
    fn backup_best_effort(&self, system: &mut SystemBlock, reason: &str, now: OffsetDateTime) {
        if !self.config.data_file.exists() {
            return;
        }
        match backup::create_backup(&self.config.data_file, &self.backup_dir, reason, now) {
            Ok(_) => {
                system.last_backup = Some(now);
                self.prune(system.settings.backup_retention_days, now);
            }
            Err(err) => {
                tracing::warn!(reason, error = %err, "backup failed; continuing with write");
            }
        }
    }

    fn prune(&self, retention_days: u32, now: OffsetDateTime) {
        if let Err(err) = backup::prune_backups(&self.backup_dir, retention_days, now) {
            tracing::warn!(dir = %self.backup_dir.display(), error = %err, "backup pruning failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadOutcome, SnapshotStore};
    use crate::clock::FixedClock;
    use crate::config::StoreConfig;
    use crate::model::Task;
    use time::macros::datetime;

    fn store_in(dir: &std::path::Path) -> SnapshotStore {
        let clock = FixedClock::new(datetime!(2025-12-20 09:00 UTC));
        SnapshotStore::open_with_clock(StoreConfig::in_dir(dir), Box::new(clock)).unwrap()
    }

    #[test]
    fn missing_file_bootstraps_and_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        assert_eq!(store.load_outcome(), LoadOutcome::Bootstrapped);
        assert!(store.data_file().exists());
        assert!(store.user_ids().is_empty());
    }

    #[test]
    fn reads_never_provision() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        assert!(store.get_task("ghost", "t").is_none());
        assert!(store.list_tasks("ghost").is_empty());
        assert!(store.get_feedback("ghost", None).is_empty());
        assert!(store.get_analytics("ghost").is_none());
        assert!(store.user_ids().is_empty());
    }

    #[test]
    fn blank_user_maps_to_default_user() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        let task = store.add_task("  ", Task::new("x", "")).unwrap();
        assert!(store.get_task("default_user", &task.id).is_some());
    }

    #[test]
    fn add_task_with_existing_id_replaces_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());

        let mut task = store.add_task("u1", Task::new("first", "")).unwrap();
        store.add_task("u1", Task::new("second", "")).unwrap();
        task.heading = "first, edited".to_string();
        store.add_task("u1", task.clone()).unwrap();

        let headings: Vec<String> = store.list_tasks("u1").into_iter().map(|t| t.heading).collect();
        assert_eq!(headings, vec!["first, edited".to_string(), "second".to_string()]);
    }

    #[test]
    fn no_op_mutations_do_not_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(dir.path());
        let before = std::fs::read_to_string(store.data_file()).unwrap();

        assert!(store.update_task("u1", "missing", Default::default()).unwrap().is_none());
        assert!(store.delete_task("u1", "missing").unwrap().is_none());
        assert_eq!(store.clear_all_data(Some("u1")).unwrap(), 0);

        assert_eq!(std::fs::read_to_string(store.data_file()).unwrap(), before);
        assert!(store.list_backups().is_empty());
    }
}
