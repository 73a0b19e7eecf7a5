//! Thread registry: names and timestamps for every conversation.

use crate::types::{Thread, ThreadId};
use chrono::{DateTime, Utc};
use colloquy_rs_store::{JsonlStore, StoreError};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::path::Path;

/// Registry of conversation threads.
pub trait ThreadRegistry: Send + Sync {
    /// Create and persist a new thread; a blank name gets the default.
    fn create_thread(&self, name: Option<String>) -> Result<Thread, StoreError>;

    fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>, StoreError>;

    /// Threads by `modified_at` descending; never-modified threads come last.
    fn list_threads(&self) -> Result<Vec<Thread>, StoreError>;

    /// Record a successful message write. Unknown ids are adopted.
    fn touch_modified(&self, thread_id: ThreadId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Rename a thread. Blank names leave it unchanged. Returns `None` for
    /// unknown ids.
    fn rename_thread(&self, thread_id: ThreadId, name: &str)
    -> Result<Option<Thread>, StoreError>;

    fn delete_thread(&self, thread_id: ThreadId) -> Result<bool, StoreError>;
}

/// Registry persisted as one JSONL file of [`Thread`] records.
#[derive(Debug)]
pub struct JsonlThreadRegistry {
    store: JsonlStore<Thread>,
}

impl JsonlThreadRegistry {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = JsonlStore::new(path)?;
        info!(
            "initialized thread registry (path={})",
            store.path().display()
        );
        Ok(Self { store })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

impl ThreadRegistry for JsonlThreadRegistry {
    fn create_thread(&self, name: Option<String>) -> Result<Thread, StoreError> {
        let thread = Thread::new(name);
        self.store.save(&thread)?;
        info!("created thread (thread_id={}, name={})", thread.id, thread.name);
        Ok(thread)
    }

    fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>, StoreError> {
        self.store.find_by_id(&thread_id)
    }

    fn list_threads(&self) -> Result<Vec<Thread>, StoreError> {
        let mut threads = self.store.find_all()?;
        threads.sort_by(compare_recency);
        Ok(threads)
    }

    fn touch_modified(&self, thread_id: ThreadId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.update(&thread_id, |existing| match existing {
            Some(thread) if thread.modified_at.is_some_and(|modified| modified >= at) => None,
            Some(mut thread) => {
                thread.modified_at = Some(at);
                Some(thread)
            }
            None => {
                debug!("adopting unregistered thread (thread_id={})", thread_id);
                Some(Thread {
                    id: thread_id,
                    name: thread_id.to_string(),
                    created_at: at,
                    modified_at: Some(at),
                })
            }
        })?;
        Ok(())
    }

    fn rename_thread(
        &self,
        thread_id: ThreadId,
        name: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            warn!("ignoring blank thread name (thread_id={})", thread_id);
            return self.store.find_by_id(&thread_id);
        }
        let renamed = self.store.update(&thread_id, |existing| {
            existing.map(|mut thread| {
                thread.name = name.to_string();
                thread
            })
        })?;
        if renamed.is_some() {
            info!("renamed thread (thread_id={}, name={})", thread_id, name);
        }
        Ok(renamed)
    }

    fn delete_thread(&self, thread_id: ThreadId) -> Result<bool, StoreError> {
        self.store.delete_by_id(&thread_id)
    }
}

/// Most recently modified first, unmodified last, then newest created first.
fn compare_recency(a: &Thread, b: &Thread) -> Ordering {
    match (a.modified_at, b.modified_at) {
        (Some(a_modified), Some(b_modified)) => b_modified.cmp(&a_modified),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.created_at.cmp(&a.created_at))
}
