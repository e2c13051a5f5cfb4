//! Blog entries and the in-memory store that owns them.

use std::collections::HashSet;
use std::sync::RwLock;

use metrics::counter;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::util::lock::{rw_read, rw_write};

use super::error::DomainError;

const SOURCE: &str = "domain::entries";
const METRIC_ENTRIES_CREATED: &str = "quill_entries_created_total";

/// A single published post.
///
/// The capitalised aliases accept legacy data files that used exported
/// field names (`ID`, `Title`, `Content`, `Date`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(alias = "ID")]
    pub id: u64,
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(alias = "Content")]
    pub content: String,
    #[serde(alias = "Date", with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// Validated input for a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    title: String,
    content: String,
}

impl EntryDraft {
    /// Both fields must contain something other than whitespace.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Result<Self, DomainError> {
        let title = title.into();
        let content = content.into();

        if title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        if content.trim().is_empty() {
            return Err(DomainError::validation("content must not be empty"));
        }

        Ok(Self { title, content })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered collection of entries, newest first.
///
/// All mutation goes through the write lock so id assignment and re-sorting
/// are observed as one step. Readers clone a snapshot under the read lock and
/// never hold it across an await point.
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: RwLock<Vec<Entry>>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously persisted entries.
    ///
    /// Duplicate ids are rejected rather than repaired.
    pub fn from_entries(mut entries: Vec<Entry>) -> Result<Self, DomainError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.id) {
                return Err(DomainError::invariant(format!(
                    "duplicate entry id {}",
                    entry.id
                )));
            }
        }

        sort_newest_first(&mut entries);
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Create an entry stamped with `now` and re-establish date ordering.
    pub fn add(&self, draft: EntryDraft, now: OffsetDateTime) -> Entry {
        let mut entries = rw_write(&self.entries, SOURCE, "add");

        let id = entries.iter().map(|entry| entry.id).max().unwrap_or(0) + 1;
        let EntryDraft { title, content } = draft;
        let entry = Entry {
            id,
            title,
            content,
            date: now,
        };

        entries.push(entry.clone());
        sort_newest_first(&mut entries);
        drop(entries);

        counter!(METRIC_ENTRIES_CREATED).increment(1);
        entry
    }

    /// Snapshot of every entry, newest first.
    pub fn all_by_date(&self) -> Vec<Entry> {
        rw_read(&self.entries, SOURCE, "all_by_date").clone()
    }

    /// Consistent copy taken for persistence; equal to [`Self::all_by_date`].
    pub fn snapshot(&self) -> Vec<Entry> {
        self.all_by_date()
    }

    pub fn get(&self, id: u64) -> Option<Entry> {
        rw_read(&self.entries, SOURCE, "get")
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descending by date. Ids grow in creation order, so the id tie-break keeps
/// equal timestamps in insertion order regardless of how the input was laid out.
fn sort_newest_first(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
}
