//! Registry of in-flight generations and their cancellation signals.

use crate::types::{GenerationId, ThreadId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

/// Why a generation was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelReason {
    /// Explicit cancel; observers get a `Cancelled` event.
    Requested,
    /// A newer send or regenerate took over the thread.
    Superseded,
    /// The thread is being deleted; nothing may be written.
    ThreadDeleted,
}

pub(crate) type CancelSignal = watch::Receiver<Option<CancelReason>>;

struct ActiveGeneration {
    generation_id: GenerationId,
    signal: watch::Sender<Option<CancelReason>>,
}

/// At most one active generation per thread.
#[derive(Default)]
pub(crate) struct ActiveGenerations {
    entries: Mutex<HashMap<ThreadId, ActiveGeneration>>,
}

impl ActiveGenerations {
    /// Register a generation, superseding any previous one on the thread.
    pub(crate) fn start(&self, thread_id: ThreadId, generation_id: GenerationId) -> CancelSignal {
        let (signal, receiver) = watch::channel(None);
        let previous = self.entries.lock().insert(
            thread_id,
            ActiveGeneration {
                generation_id,
                signal,
            },
        );
        if let Some(previous) = previous {
            previous.signal.send_replace(Some(CancelReason::Superseded));
        }
        receiver
    }

    /// Signal and forget the thread's generation, returning its id.
    pub(crate) fn cancel(&self, thread_id: ThreadId, reason: CancelReason) -> Option<GenerationId> {
        let entry = self.entries.lock().remove(&thread_id)?;
        entry.signal.send_replace(Some(reason));
        Some(entry.generation_id)
    }

    /// Clear the entry only if it still belongs to `generation_id`.
    pub(crate) fn finish(&self, thread_id: ThreadId, generation_id: GenerationId) {
        let mut entries = self.entries.lock();
        if entries
            .get(&thread_id)
            .is_some_and(|entry| entry.generation_id == generation_id)
        {
            entries.remove(&thread_id);
        }
    }

    pub(crate) fn current(&self, thread_id: ThreadId) -> Option<GenerationId> {
        self.entries
            .lock()
            .get(&thread_id)
            .map(|entry| entry.generation_id)
    }
}

/// Resolve once the signal carries a reason. A dropped sender never cancels.
pub(crate) async fn cancelled(signal: &mut CancelSignal) -> CancelReason {
    loop {
        let current = *signal.borrow_and_update();
        if let Some(reason) = current {
            return reason;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
