//! Timestamped, reason-tagged copies of the primary document.
//!
//! File names carry their own creation time
//! (`backup_YYYYMMDD_HHMMSS_micros_<reason>.json`) so ordering and retention
//! never depend on filesystem mtimes.

use std::path::{Path, PathBuf};

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::error::{AppError, Result};

const BACKUP_PREFIX: &str = "backup_";
const BACKUP_EXT: &str = ".json";
const STAMP_LEN: usize = 22;
const STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:6]");

pub const REASON_AUTO: &str = "auto";
pub const REASON_MANUAL: &str = "manual";
pub const REASON_CORRUPTED: &str = "corrupted";
pub const REASON_PRE_RESTORE: &str = "pre-restore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub reason: String,
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
}

fn sanitize_reason(reason: &str) -> String {
    let mut cleaned = String::new();
    let mut previous_dash = false;

    for ch in reason.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_dash = false;
        } else if !previous_dash && !cleaned.is_empty() {
            cleaned.push('-');
            previous_dash = true;
        }
    }

    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        REASON_MANUAL.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn backup_file_name(reason: &str, at: OffsetDateTime) -> Result<String> {
    let utc = at.to_offset(time::UtcOffset::UTC);
    let stamp = utc
        .format(STAMP_FORMAT)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    Ok(format!(
        "{BACKUP_PREFIX}{stamp}_{}{BACKUP_EXT}",
        sanitize_reason(reason)
    ))
}

/// Splits a backup file name into its creation time and reason.
pub fn parse_backup_file_name(file_name: &str) -> Option<(OffsetDateTime, String)> {
    let body = file_name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_EXT)?;
    let stamp = body.get(..STAMP_LEN)?;
    let reason = body.get(STAMP_LEN..)?.strip_prefix('_')?;
    if reason.is_empty() {
        return None;
    }
    let created_at = PrimitiveDateTime::parse(stamp, STAMP_FORMAT)
        .ok()?
        .assume_utc();
    Some((created_at, reason.to_string()))
}

/// Copies `source` into `backup_dir`, creating the directory on demand.
/// An existing backup is never overwritten: a taken name moves the stamp
/// forward one microsecond at a time.
pub fn create_backup(
    source: &Path,
    backup_dir: &Path,
    reason: &str,
    at: OffsetDateTime,
) -> Result<BackupInfo> {
    std::fs::create_dir_all(backup_dir).map_err(|err| AppError::io_at(backup_dir, err))?;

    let mut stamp = at;
    let mut file_name = backup_file_name(reason, stamp)?;
    while backup_dir.join(&file_name).exists() {
        stamp += Duration::microseconds(1);
        file_name = backup_file_name(reason, stamp)?;
    }
    let path = backup_dir.join(&file_name);
    let size_bytes = std::fs::copy(source, &path).map_err(|err| AppError::io_at(source, err))?;
    let (created_at, reason) = parse_backup_file_name(&file_name)
        .ok_or_else(|| AppError::invalid_data(format!("unparseable backup name {file_name}")))?;

    tracing::debug!(path = %path.display(), reason = %reason, "backup written");
    Ok(BackupInfo {
        file_name,
        path,
        reason,
        created_at,
        size_bytes,
    })
}

/// Every recognizable backup in `backup_dir`, newest first. Foreign files
/// are skipped.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupInfo>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(backup_dir).map_err(|err| AppError::io_at(backup_dir, err))?;
    let mut backups: Vec<BackupInfo> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let (created_at, reason) = parse_backup_file_name(&file_name)?;
            let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            Some(BackupInfo {
                path: entry.path(),
                file_name,
                reason,
                created_at,
                size_bytes,
            })
        })
        .collect();

    backups.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(backups)
}

/// Deletes backups created before `now - retention_days`. Returns how many
/// were removed; individual delete failures are logged and skipped. A
/// window reaching past the earliest representable date keeps everything.
pub fn prune_backups(backup_dir: &Path, retention_days: u32, now: OffsetDateTime) -> Result<usize> {
    let Some(cutoff) = now.checked_sub(Duration::days(i64::from(retention_days))) else {
        return Ok(0);
    };
    let mut deleted = 0;

    for backup in list_backups(backup_dir)? {
        if backup.created_at >= cutoff {
            continue;
        }
        match std::fs::remove_file(&backup.path) {
            Ok(()) => deleted += 1,
            Err(err) => {
                tracing::warn!(path = %backup.path.display(), error = %err, "failed to delete old backup");
            }
        }
    }

    if deleted > 0 {
        tracing::info!(deleted, retention_days, "pruned old backups");
    }
    Ok(deleted)
}

/// Resolves a bare backup file name inside `backup_dir`. Names that try to
/// leave the directory or do not follow the naming scheme yield `None`.
pub fn resolve_backup(backup_dir: &Path, file_name: &str) -> Option<PathBuf> {
    let trimmed = file_name.trim();
    if trimmed.contains('/') || trimmed.contains('\\') {
        return None;
    }
    parse_backup_file_name(trimmed)?;
    Some(backup_dir.join(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn file_name_round_trips() {
        let at = datetime!(2025-12-20 09:30:15.123456 UTC);
        let name = backup_file_name("Before Restore!", at).unwrap();

        assert_eq!(name, "backup_20251220_093015_123456_before-restore.json");
        let (parsed_at, reason) = parse_backup_file_name(&name).unwrap();
        assert_eq!(parsed_at, at);
        assert_eq!(reason, "before-restore");
    }

    #[test]
    fn blank_reason_becomes_manual() {
        let name = backup_file_name("  ", datetime!(2025-12-20 09:30 UTC)).unwrap();
        assert!(name.ends_with("_manual.json"));
    }

    #[test]
    fn foreign_names_are_not_backups() {
        assert!(parse_backup_file_name("notes.txt").is_none());
        assert!(parse_backup_file_name("backup_garbage.json").is_none());
        assert!(parse_backup_file_name("backup_20251220_093015_123456_.json").is_none());
    }

    #[test]
    fn list_is_newest_first_and_skips_other_files() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let source = dir.path().join("data.json");
        std::fs::write(&source, "{}").expect("write");
        let backups = dir.path().join("backups");

        create_backup(&source, &backups, "auto", datetime!(2025-12-01 10:00 UTC)).expect("backup");
        create_backup(&source, &backups, "manual", datetime!(2025-12-03 10:00 UTC)).expect("backup");
        create_backup(&source, &backups, "auto", datetime!(2025-12-02 10:00 UTC)).expect("backup");
        std::fs::write(backups.join("README"), "hello").expect("write");

        let listed = list_backups(&backups).expect("list");
        let days: Vec<u8> = listed.iter().map(|b| b.created_at.day()).collect();
        assert_eq!(days, vec![3, 2, 1]);
        assert_eq!(listed[0].reason, "manual");
        assert_eq!(listed[0].size_bytes, 2);
    }

    #[test]
    fn prune_removes_only_backups_outside_the_window() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let source = dir.path().join("data.json");
        std::fs::write(&source, "{}").expect("write");
        let backups = dir.path().join("backups");
        let now = datetime!(2025-12-31 12:00 UTC);

        for days_ago in [1, 5, 29, 31, 60] {
            create_backup(&source, &backups, "auto", now - Duration::days(days_ago)).expect("backup");
        }

        let deleted = prune_backups(&backups, 30, now).expect("prune");
        assert_eq!(deleted, 2);

        let remaining = list_backups(&backups).expect("list");
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|b| b.created_at >= now - Duration::days(30)));
    }

    #[test]
    fn prune_with_unbounded_retention_keeps_everything() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let source = dir.path().join("data.json");
        std::fs::write(&source, "{}").expect("write");
        let backups = dir.path().join("backups");
        let now = datetime!(2025-12-31 12:00 UTC);
        create_backup(&source, &backups, "auto", now - Duration::days(400)).expect("backup");

        assert_eq!(prune_backups(&backups, u32::MAX, now).expect("prune"), 0);
        assert_eq!(list_backups(&backups).expect("list").len(), 1);
    }

    #[test]
    fn same_stamp_and_reason_does_not_overwrite() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let source = dir.path().join("data.json");
        let backups = dir.path().join("backups");
        let at = datetime!(2025-12-20 09:00 UTC);

        std::fs::write(&source, "first").expect("write");
        let first = create_backup(&source, &backups, "auto", at).expect("backup");
        std::fs::write(&source, "second").expect("write");
        let second = create_backup(&source, &backups, "auto", at).expect("backup");

        assert_ne!(first.file_name, second.file_name);
        assert_eq!(second.created_at, at + Duration::microseconds(1));
        assert_eq!(std::fs::read_to_string(&first.path).expect("read"), "first");
        assert_eq!(std::fs::read_to_string(&second.path).expect("read"), "second");
    }

    #[test]
    fn prune_on_missing_dir_is_zero() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let deleted = prune_backups(&dir.path().join("nope"), 7, datetime!(2025-12-31 00:00 UTC));
        assert_eq!(deleted.expect("prune"), 0);
    }

    #[test]
    fn resolve_rejects_path_escapes() {
        let dir = Path::new("/var/backups");
        assert!(resolve_backup(dir, "../planner_data.json").is_none());
        assert!(resolve_backup(dir, "backup_20251220_093015_123456_auto.json").is_some());
    }
}
