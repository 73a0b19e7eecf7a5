//! Streaming worker: forwards tokens, then persists or discards the result.

use super::GenerationOutcome;
use super::active::{ActiveGenerations, CancelReason, CancelSignal, cancelled};
use super::locks::ThreadLocks;
use crate::conversation::ConversationStore;
use crate::error::CoreError;
use crate::generation::{ContextMessage, GenerationError, Generator};
use crate::threads::ThreadRegistry;
use crate::types::{GenerationId, Message, Role, StyleType, ThreadId};
use chrono::{DateTime, Utc};
use colloquy_rs_protocol::{EventMsg, EventPayload, EventSink};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// What the worker does with the finished text.
pub(crate) enum JobKind {
    /// Append a new assistant message no earlier than `not_before`.
    Reply { not_before: DateTime<Utc> },
    /// Overwrite `snapshot` in place. The stored record is not touched
    /// before completion, so a cancelled or failed run leaves it as-is.
    Regenerate { snapshot: Message },
}

pub(crate) struct GenerationJob {
    pub(crate) thread_id: ThreadId,
    pub(crate) generation_id: GenerationId,
    pub(crate) input: Vec<ContextMessage>,
    pub(crate) kind: JobKind,
}

enum StreamEnd {
    Finished(String),
    Cancelled(CancelReason),
    Failed(GenerationError),
}

/// Shared state for orchestrator calls and spawned workers.
pub(crate) struct GenerationExecutor {
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) conversations: Arc<ConversationStore>,
    pub(crate) registry: Arc<dyn ThreadRegistry>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) locks: ThreadLocks,
    pub(crate) active: ActiveGenerations,
}

impl GenerationExecutor {
    /// Drive one streaming generation to a terminal state.
    pub(crate) async fn run(
        &self,
        job: GenerationJob,
        mut signal: CancelSignal,
    ) -> Result<GenerationOutcome, CoreError> {
        let GenerationJob {
            thread_id,
            generation_id,
            input,
            kind,
        } = job;
        debug!(
            "generation started (thread_id={}, generation_id={}, context={})",
            thread_id,
            generation_id,
            input.len()
        );
        let end = self
            .stream(thread_id, generation_id, &input, &mut signal)
            .await;

        let _guard = self.locks.lock(thread_id).await;
        self.active.finish(thread_id, generation_id);
        let late_cancel = *signal.borrow();
        let end = match (end, late_cancel) {
            (StreamEnd::Finished(_), Some(reason)) => StreamEnd::Cancelled(reason),
            (end, _) => end,
        };

        match end {
            StreamEnd::Finished(text) => match self.complete(thread_id, &kind, text) {
                Ok(message) => {
                    info!(
                        "generation completed (thread_id={}, generation_id={}, message_id={}, len={})",
                        thread_id,
                        generation_id,
                        message.id,
                        message.model_content.len()
                    );
                    self.emit(
                        thread_id,
                        EventPayload::Complete {
                            generation_id,
                            message_id: message.id,
                            content: message.model_content.clone(),
                        },
                    );
                    Ok(GenerationOutcome::Completed(message))
                }
                Err(err) => {
                    error!(
                        "failed to persist generation (thread_id={}, generation_id={}, error={})",
                        thread_id, generation_id, err
                    );
                    self.emit(
                        thread_id,
                        EventPayload::Error {
                            generation_id: Some(generation_id),
                            message: err.to_string(),
                        },
                    );
                    Err(err)
                }
            },
            StreamEnd::Cancelled(reason) => {
                info!(
                    "generation cancelled (thread_id={}, generation_id={}, reason={:?})",
                    thread_id, generation_id, reason
                );
                if reason == CancelReason::Requested {
                    self.emit(
                        thread_id,
                        EventPayload::Cancelled {
                            generation_id: Some(generation_id),
                        },
                    );
                }
                Ok(GenerationOutcome::Cancelled)
            }
            StreamEnd::Failed(err) => {
                error!(
                    "generation failed (thread_id={}, generation_id={}, error={})",
                    thread_id, generation_id, err
                );
                let message = err.to_string();
                self.emit(
                    thread_id,
                    EventPayload::Error {
                        generation_id: Some(generation_id),
                        message: message.clone(),
                    },
                );
                Ok(GenerationOutcome::Failed(message))
            }
        }
    }

    /// Forward tokens until the stream ends, fails, or is cancelled.
    async fn stream(
        &self,
        thread_id: ThreadId,
        generation_id: GenerationId,
        input: &[ContextMessage],
        signal: &mut CancelSignal,
    ) -> StreamEnd {
        let mut tokens = tokio::select! {
            biased;
            reason = cancelled(signal) => return StreamEnd::Cancelled(reason),
            started = self.generator.generate_stream(input) => match started {
                Ok(tokens) => tokens,
                Err(err) => return StreamEnd::Failed(err),
            },
        };

        let mut text = String::new();
        loop {
            tokio::select! {
                biased;
                reason = cancelled(signal) => return StreamEnd::Cancelled(reason),
                next = tokens.next() => match next {
                    Some(Ok(token)) => {
                        if token.is_empty() {
                            continue;
                        }
                        text.push_str(&token);
                        self.emit(
                            thread_id,
                            EventPayload::Token {
                                generation_id,
                                text: token,
                            },
                        );
                    }
                    Some(Err(err)) => return StreamEnd::Failed(err),
                    None => return StreamEnd::Finished(text),
                },
            }
        }
    }

    fn complete(&self, thread_id: ThreadId, kind: &JobKind, text: String) -> Result<Message, CoreError> {
        let message = match kind {
            JobKind::Reply { not_before } => Message::new(thread_id, Role::Assistant, text)
                .with_created_at(next_timestamp(Some(*not_before))),
            JobKind::Regenerate { snapshot } => {
                if self
                    .conversations
                    .find_by_id(thread_id, snapshot.id)?
                    .is_none()
                {
                    warn!(
                        "regeneration target vanished (thread_id={}, message_id={})",
                        thread_id, snapshot.id
                    );
                    return Err(CoreError::NothingToRegenerate(thread_id));
                }
                let mut message = snapshot.clone();
                message.display_content = text.clone();
                message.model_content = text;
                message.style_type = StyleType::None;
                message
            }
        };
        self.persist(&message)?;
        Ok(message)
    }

    /// Save a message and bump the thread's modification time.
    ///
    /// Only the save can fail; a registry error leaves the message persisted
    /// with a stale `modified_at`.
    pub(crate) fn persist(&self, message: &Message) -> Result<(), CoreError> {
        self.conversations.save(message)?;
        let at = next_timestamp(Some(message.created_at));
        if let Err(err) = self.registry.touch_modified(message.thread_id, at) {
            warn!(
                "failed to touch thread (thread_id={}, message_id={}, error={})",
                message.thread_id, message.id, err
            );
        }
        Ok(())
    }

    pub(crate) fn emit(&self, thread_id: ThreadId, payload: EventPayload) {
        self.sink.emit(EventMsg::new(thread_id, payload));
    }
}

/// Now, clamped so timestamps never run backwards within a thread.
pub(crate) fn next_timestamp(not_before: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    not_before.map_or(now, |floor| floor.max(now))
}

#[cfg(test)]
mod tests {
    use super::next_timestamp;
    use chrono::{Duration, Utc};

    #[test]
    fn next_timestamp_never_precedes_floor() {
        let future = Utc::now() + Duration::seconds(30);
        assert_eq!(next_timestamp(Some(future)), future);
        let past = Utc::now() - Duration::seconds(30);
        assert!(next_timestamp(Some(past)) > past);
    }
}
