use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),

    #[error("invalid_data - {0}")]
    InvalidData(String),

    /// The primary document exists but cannot be read back. Startup must halt.
    #[error("corrupted_store - {message} ({})", .path.display())]
    Corrupted {
        path: PathBuf,
        quarantined_to: Option<PathBuf>,
        message: String,
    },

    #[error("io_error - {0}")]
    Io(String),

    #[error("serialization_error - {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn io_at(path: &Path, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", path.display(), err))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::Corrupted { .. } => "corrupted_store",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput(message) | Self::InvalidData(message) | Self::Io(message) => {
                message.clone()
            }
            Self::Corrupted { message, .. } => message.clone(),
            Self::Serialization(err) => err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
