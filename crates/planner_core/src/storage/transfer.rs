//! Portable single-user export files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use time::OffsetDateTime;

use super::document::UserRecord;
use super::write_json_atomic;
use crate::error::{AppError, Result};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserExport {
    pub export_version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub user_id: String,
    pub data: UserRecord,
}

pub fn write_export(path: &Path, export: &UserExport) -> Result<()> {
    write_json_atomic(path, export)
}

pub fn read_export(path: &Path) -> Result<UserExport> {
    let content = std::fs::read_to_string(path).map_err(|err| AppError::io_at(path, err))?;
    let export: UserExport = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid export {}: {}", path.display(), err))
    })?;

    if export.export_version > EXPORT_VERSION {
        return Err(AppError::invalid_data(format!(
            "export_version {} is newer than supported {}",
            export.export_version, EXPORT_VERSION
        )));
    }
    if export.user_id.trim().is_empty() {
        return Err(AppError::invalid_data("export has no user_id"));
    }
    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::{EXPORT_VERSION, UserExport, read_export, write_export};
    use crate::model::{Task, UserSession};
    use crate::storage::document::UserRecord;
    use time::macros::datetime;

    #[test]
    fn export_file_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alice.json");

        let mut session = UserSession::new("alice");
        session.add_task(Task::new("pack", "for the trip"));
        let export = UserExport {
            export_version: EXPORT_VERSION,
            exported_at: datetime!(2025-12-20 18:00 UTC),
            user_id: "alice".to_string(),
            data: UserRecord::new(session),
        };

        write_export(&path, &export).unwrap();
        assert_eq!(read_export(&path).unwrap(), export);
    }

    #[test]
    fn newer_export_versions_are_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("future.json");
        let content = serde_json::json!({
            "export_version": EXPORT_VERSION + 1,
            "exported_at": "2025-12-20T18:00:00Z",
            "user_id": "alice",
            "data": {
                "session": {
                    "user_id": "alice",
                    "created_at": "2025-12-20T18:00:00Z",
                    "last_updated": "2025-12-20T18:00:00Z"
                }
            }
        });
        std::fs::write(&path, content.to_string()).unwrap();

        assert_eq!(read_export(&path).unwrap_err().code(), "invalid_data");
    }

    #[test]
    fn garbage_is_invalid_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, "not json").unwrap();

        assert_eq!(read_export(&path).unwrap_err().code(), "invalid_data");
    }
}
