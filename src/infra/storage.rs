//! JSON data file backing the entry store.

use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::fs;

use crate::{
    application::repos::{PersistError, SnapshotRepo},
    domain::entries::Entry,
};

/// On-disk document. Older files use `Entries` and may carry `null` for an
/// empty list.
#[derive(Debug, Deserialize)]
struct DataFileIn {
    #[serde(alias = "Entries", default)]
    entries: Option<Vec<Entry>>,
}

#[derive(Debug, Serialize)]
struct DataFileOut<'a> {
    entries: &'a [Entry],
}

/// Stores the entry list as a single pretty-printed JSON document.
///
/// Writes go to a temporary file in the same directory which is synced and
/// then renamed over the target, so the data file is always either the
/// previous or the new version.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotRepo for JsonFileRepository {
    async fn load(&self) -> Result<Vec<Entry>, PersistError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PersistError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(err) => {
                return Err(PersistError::decode(
                    &self.path,
                    format!("read failed: {err}"),
                ));
            }
        };

        let document: DataFileIn = serde_json::from_slice(&bytes)
            .map_err(|err| PersistError::decode(&self.path, err))?;
        Ok(document.entries.unwrap_or_default())
    }

    async fn save(&self, entries: &[Entry]) -> Result<(), PersistError> {
        let mut encoded = serde_json::to_vec_pretty(&DataFileOut { entries })
            .map_err(|err| PersistError::write(&self.path, err))?;
        encoded.push(b'\n');

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &encoded))
            .await
            .map_err(|err| PersistError::write(&self.path, format!("writer task failed: {err}")))?
            .map_err(|err| PersistError::write(&self.path, err))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;

    let mut staged = NamedTempFile::new_in(directory)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}
