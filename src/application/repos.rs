//! Repository traits describing persistence adapters.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entries::Entry;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("data file `{}` does not exist", path.display())]
    NotFound { path: PathBuf },
    #[error("data file `{}` could not be decoded: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    #[error("failed to write data file `{}`: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

impl PersistError {
    pub fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Write {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Durable home of the entry list.
///
/// `load` must never modify what it reads; `save` must replace the stored
/// list as a whole so a concurrent reader sees either the old or the new one.
#[async_trait]
pub trait SnapshotRepo: Send + Sync {
    async fn load(&self) -> Result<Vec<Entry>, PersistError>;

    async fn save(&self, entries: &[Entry]) -> Result<(), PersistError>;

    /// Human-readable location used in logs.
    fn describe(&self) -> String;
}
