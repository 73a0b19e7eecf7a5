//! Per-thread message logs on top of the JSONL record store.

use crate::types::{Message, MessageId, Role, ThreadId};
use colloquy_rs_store::{JsonlStore, StoreError};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maps each thread to `<dir>/<thread_id>.jsonl`.
///
/// One store instance is cached per written thread so its write lock is the
/// only writer of that file in this process. Reads of a thread with no file
/// leave the cache alone.
#[derive(Debug)]
pub struct ConversationStore {
    dir: PathBuf,
    stores: RwLock<HashMap<ThreadId, Arc<JsonlStore<Message>>>>,
}

impl ConversationStore {
    /// Open (and create) the conversations directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("initialized conversation store (dir={})", dir.display());
        Ok(Self {
            dir,
            stores: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backing file for a thread.
    pub fn thread_path(&self, thread_id: ThreadId) -> PathBuf {
        self.dir.join(format!("{thread_id}.jsonl"))
    }

    fn store(&self, thread_id: ThreadId) -> Result<Arc<JsonlStore<Message>>, StoreError> {
        if let Some(store) = self.cached(thread_id) {
            return Ok(store);
        }
        let mut stores = self.stores.write();
        if let Some(store) = stores.get(&thread_id) {
            return Ok(store.clone());
        }
        let store = Arc::new(JsonlStore::new(self.thread_path(thread_id))?);
        stores.insert(thread_id, store.clone());
        Ok(store)
    }

    fn cached(&self, thread_id: ThreadId) -> Option<Arc<JsonlStore<Message>>> {
        self.stores.read().get(&thread_id).cloned()
    }

    /// Store for an existing thread; `None` when nothing was ever written.
    fn existing(&self, thread_id: ThreadId) -> Result<Option<Arc<JsonlStore<Message>>>, StoreError> {
        if let Some(store) = self.cached(thread_id) {
            return Ok(Some(store));
        }
        if !self.thread_path(thread_id).exists() {
            return Ok(None);
        }
        self.store(thread_id).map(Some)
    }

    /// Append a new message or replace an existing one by id. Replacing a
    /// message may change its content and style but never its role or thread.
    pub fn save(&self, message: &Message) -> Result<(), StoreError> {
        self.store(message.thread_id)?
            .save_checked(message, |existing, replacement| {
                let field = if existing.role != replacement.role {
                    "role"
                } else if existing.thread_id != replacement.thread_id {
                    "thread_id"
                } else {
                    return Ok(());
                };
                Err(StoreError::Immutable {
                    id: existing.id.to_string(),
                    field,
                })
            })
    }

    /// Every message of a thread in file order.
    pub fn find_all(&self, thread_id: ThreadId) -> Result<Vec<Message>, StoreError> {
        match self.existing(thread_id)? {
            Some(store) => store.find_all(),
            None => Ok(Vec::new()),
        }
    }

    pub fn find_by_id(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
    ) -> Result<Option<Message>, StoreError> {
        match self.existing(thread_id)? {
            Some(store) => store.find_by_id(&message_id),
            None => Ok(None),
        }
    }

    /// Messages a human reader should see, in file order.
    pub fn find_displayable(&self, thread_id: ThreadId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .find_all(thread_id)?
            .into_iter()
            .filter(Message::is_displayable)
            .collect())
    }

    /// The `page_size` most recent messages with a role in `roles`,
    /// oldest first.
    pub fn find_context_window(
        &self,
        thread_id: ThreadId,
        roles: &[Role],
        page_size: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.find_page(thread_id, roles, 0, page_size)
    }

    /// Page through the newest-first filtered history; the page itself is
    /// returned oldest first.
    pub fn find_page(
        &self,
        thread_id: ThreadId,
        roles: &[Role],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.find_all(thread_id)?;
        let page = select_page(&messages, roles, offset, limit);
        debug!(
            "selected page (thread_id={}, offset={}, limit={}, returned={})",
            thread_id,
            offset,
            limit,
            page.len()
        );
        Ok(page)
    }

    /// True when the thread has at least one well-formed message.
    pub fn exists(&self, thread_id: ThreadId) -> Result<bool, StoreError> {
        match self.existing(thread_id)? {
            Some(store) => Ok(store.count()? > 0),
            None => Ok(false),
        }
    }

    /// Remove the thread log and drop the cached store.
    pub fn delete_thread(&self, thread_id: ThreadId) -> Result<bool, StoreError> {
        let removed = match self.existing(thread_id)? {
            Some(store) => store.delete_all()?,
            None => false,
        };
        self.stores.write().remove(&thread_id);
        Ok(removed)
    }

    pub fn delete_message(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
    ) -> Result<bool, StoreError> {
        match self.existing(thread_id)? {
            Some(store) => store.delete_by_id(&message_id),
            None => Ok(false),
        }
    }
}

/// Select `limit` messages after skipping `offset` from the newest end.
///
/// Ordering is by `created_at`; the sort is stable so equal timestamps keep
/// file order.
pub fn select_page(messages: &[Message], roles: &[Role], offset: usize, limit: usize) -> Vec<Message> {
    let mut filtered: Vec<&Message> = messages
        .iter()
        .filter(|message| roles.contains(&message.role))
        .collect();
    filtered.sort_by_key(|message| message.created_at);
    let end = filtered.len().saturating_sub(offset);
    let start = end.saturating_sub(limit);
    filtered[start..end]
        .iter()
        .map(|message| (*message).clone())
        .collect()
}
