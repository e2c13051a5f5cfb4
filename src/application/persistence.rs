//! Load/save boundary between the entry store and durable storage.
//!
//! The process moves through `Uninitialized -> Loaded -> Running -> Saved ->
//! Terminated`. Saves are not issued per request unless `save_on_write` is
//! set; the guaranteed save happens during shutdown. Anything created after
//! the last successful save is lost if the process dies without reaching
//! `Saved`, and that is logged when serving starts.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use tokio::{
    sync::Mutex as AsyncMutex,
    task::{JoinError, JoinHandle},
    time::timeout,
};
use tracing::{error, info, warn};

use crate::{
    application::{
        error::AppError,
        repos::{PersistError, SnapshotRepo},
    },
    domain::entries::EntryStore,
    util::lock::mutex_lock,
};

const SOURCE: &str = "application::persistence";
const METRIC_STORE_SAVE: &str = "quill_store_save_total";
const METRIC_STORE_SAVE_FAILURES: &str = "quill_store_save_failures_total";
const METRIC_STORE_SAVE_MS: &str = "quill_store_save_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Loaded,
    Running,
    Saved,
    Terminated,
}

/// What to do when the data file does not exist at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingFilePolicy {
    /// Start with an empty store; the file is created by the first save.
    #[default]
    StartEmpty,
    /// Refuse to start.
    Abort,
}

impl FromStr for MissingFilePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "empty" => Ok(Self::StartEmpty),
            "abort" => Ok(Self::Abort),
            other => Err(format!("expected `empty` or `abort`, got `{other}`")),
        }
    }
}

impl fmt::Display for MissingFilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartEmpty => f.write_str("empty"),
            Self::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub missing_file: MissingFilePolicy,
    pub save_on_write: bool,
    pub save_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            missing_file: MissingFilePolicy::default(),
            save_on_write: false,
            save_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Persistence {
    repo: Arc<dyn SnapshotRepo>,
    config: PersistenceConfig,
    state: Mutex<LifecycleState>,
    save_lock: Arc<AsyncMutex<()>>,
    /// Entry count of the newest snapshot known to be durable.
    saved_len: AtomicUsize,
}

impl Persistence {
    pub fn new(repo: Arc<dyn SnapshotRepo>, config: PersistenceConfig) -> Self {
        Self {
            repo,
            config,
            state: Mutex::new(LifecycleState::Uninitialized),
            save_lock: Arc::new(AsyncMutex::new(())),
            saved_len: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *mutex_lock(&self.state, SOURCE, "state")
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Build the store from durable state.
    ///
    /// This is the only place the missing-file policy is applied. Decode
    /// failures are always fatal and never yield a partial store.
    pub async fn load(&self) -> Result<EntryStore, AppError> {
        self.transition(LifecycleState::Uninitialized, LifecycleState::Loaded)?;

        let entries = match self.repo.load().await {
            Ok(entries) => entries,
            Err(PersistError::NotFound { path })
                if self.config.missing_file == MissingFilePolicy::StartEmpty =>
            {
                warn!(
                    target = "quill::persistence",
                    path = %path.display(),
                    "data file not found; starting with an empty store"
                );
                Vec::new()
            }
            Err(err) => {
                self.set_state(LifecycleState::Uninitialized);
                return Err(err.into());
            }
        };

        let store = EntryStore::from_entries(entries).inspect_err(|_| {
            self.set_state(LifecycleState::Uninitialized);
        })?;
        self.saved_len.store(store.len(), Ordering::SeqCst);

        info!(
            target = "quill::persistence",
            location = %self.repo.describe(),
            entries = store.len(),
            "loaded entries"
        );
        Ok(store)
    }

    /// Enter the serving phase.
    pub fn mark_running(&self) -> Result<(), AppError> {
        self.transition(LifecycleState::Loaded, LifecycleState::Running)?;

        if self.config.save_on_write {
            info!(
                target = "quill::persistence",
                location = %self.repo.describe(),
                "saving after every new entry"
            );
        } else {
            warn!(
                target = "quill::persistence",
                location = %self.repo.describe(),
                "entries are saved on shutdown only; a crash or SIGKILL loses entries created since the last save"
            );
        }
        Ok(())
    }

    /// Write a snapshot of `store`.
    ///
    /// Saves are serialized, and each snapshot is taken after the previous
    /// write finished, so the file never regresses to an older state. The
    /// write runs in its own task holding the save lock: a save that times
    /// out is reported as a failure, but the next save still waits for it to
    /// land. Failures are logged here and returned to the caller.
    pub async fn save(&self, store: &EntryStore) -> Result<(), PersistError> {
        let serialized = Arc::clone(&self.save_lock).lock_owned().await;

        let entries = store.snapshot();
        let count = entries.len();
        let started = Instant::now();
        counter!(METRIC_STORE_SAVE).increment(1);

        let repo = Arc::clone(&self.repo);
        let mut write = tokio::spawn(async move {
            let outcome = repo.save(&entries).await;
            drop(serialized);
            outcome
        });

        let result = match timeout(self.config.save_timeout, &mut write).await {
            Ok(joined) => joined.unwrap_or_else(|err| Err(self.task_failure(&err))),
            Err(_) => {
                self.watch_late_write(write, count);
                Err(PersistError::write(
                    self.repo.describe(),
                    format!("timed out after {:?}", self.config.save_timeout),
                ))
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_STORE_SAVE_MS).record(elapsed_ms);

        match &result {
            Ok(()) => {
                self.saved_len.fetch_max(count, Ordering::SeqCst);
                info!(
                    target = "quill::persistence",
                    location = %self.repo.describe(),
                    entries = count,
                    elapsed_ms,
                    "saved entries"
                );
            }
            Err(err) => {
                counter!(METRIC_STORE_SAVE_FAILURES).increment(1);
                error!(
                    target = "quill::persistence",
                    location = %self.repo.describe(),
                    entries = count,
                    error = %err,
                    "failed to save entries"
                );
            }
        }

        result
    }

    /// Hook invoked after a successful mutation.
    ///
    /// With `save_on_write` the outcome of the save is returned; the entry
    /// stays in memory either way and is retried by the next save.
    pub async fn after_write(&self, store: &EntryStore) -> Result<(), PersistError> {
        if !self.config.save_on_write {
            return Ok(());
        }
        self.save(store).await
    }

    /// Entries in `store` that no successful save or the initial load covers.
    pub fn unsaved_entries(&self, store: &EntryStore) -> usize {
        store
            .len()
            .saturating_sub(self.saved_len.load(Ordering::SeqCst))
    }

    /// Final save before exit. The state ends in `Terminated` either way.
    pub async fn shutdown(&self, store: &EntryStore) -> Result<(), PersistError> {
        info!(
            target = "quill::persistence",
            entries = store.len(),
            "performing final save"
        );

        let result = self.save(store).await;
        if result.is_ok() {
            self.set_state(LifecycleState::Saved);
        }
        self.set_state(LifecycleState::Terminated);
        result
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), AppError> {
        let mut state = mutex_lock(&self.state, SOURCE, "transition");
        if *state != from {
            return Err(AppError::unexpected(format!(
                "persistence cannot move to {to:?} from {:?}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: LifecycleState) {
        *mutex_lock(&self.state, SOURCE, "set_state") = to;
    }

    fn task_failure(&self, err: &JoinError) -> PersistError {
        PersistError::write(self.repo.describe(), format!("save task failed: {err}"))
    }

    /// Report how a write that outlived its timeout eventually ended.
    fn watch_late_write(&self, write: JoinHandle<Result<(), PersistError>>, entries: usize) {
        let location = self.repo.describe();
        tokio::spawn(async move {
            match write.await {
                Ok(Ok(())) => warn!(
                    target = "quill::persistence",
                    location = %location,
                    entries,
                    "timed-out save completed late"
                ),
                Ok(Err(err)) => error!(
                    target = "quill::persistence",
                    location = %location,
                    entries,
                    error = %err,
                    "timed-out save failed"
                ),
                Err(err) => error!(
                    target = "quill::persistence",
                    location = %location,
                    error = %err,
                    "timed-out save task failed"
                ),
            }
        });
    }
}
