pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::StoreConfig;
pub use error::AppError;
pub use storage::backup::BackupInfo;
pub use storage::snapshot_store::{LoadOutcome, SnapshotStore};
