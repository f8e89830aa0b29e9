use thiserror::Error;

use tickval_core::{BatchError, ConfigError, StoreError, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("result store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Usage(_) => 2,
            Self::Batch(BatchError::StoreUnavailable(_)) => 6,
            Self::Batch(_) => 2,
            Self::Store(_) => 6,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
