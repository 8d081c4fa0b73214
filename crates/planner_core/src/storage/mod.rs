pub mod analytics;
pub mod backup;
pub mod document;
pub mod migrate;
pub mod snapshot_store;
pub mod transfer;

use crate::error::{AppError, Result};
use serde::Serialize;
use std::path::Path;

/// Writes `value` as pretty JSON through a sibling temp file and a rename,
/// so readers never observe a half-written document.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| AppError::io_at(parent, err))?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    std::fs::write(tmp_path, content).map_err(|err| AppError::io_at(tmp_path, err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(tmp_path, permissions)
            .map_err(|err| AppError::io_at(tmp_path, err))?;
    }

    std::fs::rename(tmp_path, path).map_err(|err| AppError::io_at(path, err))?;
    Ok(())
}
