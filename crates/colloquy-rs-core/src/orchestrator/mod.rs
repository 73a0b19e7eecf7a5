//! Message orchestrator: context windows, streaming generation, cancellation,
//! and regeneration over the conversation store.

mod active;
mod executor;
mod locks;

use crate::conversation::{ConversationStore, select_page};
use crate::error::CoreError;
use crate::events::{EventBus, EventStream, FanoutEventSink};
use crate::generation::{ContextMessage, Generator};
use crate::templates::{FileTemplateProvider, TemplateProvider, apply_template};
use crate::threads::{JsonlThreadRegistry, ThreadRegistry};
use crate::types::{GenerationId, Message, Role, Thread, ThreadId};
use colloquy_rs_config::ColloquyConfig;
use colloquy_rs_protocol::{EventPayload, EventSink};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use active::{ActiveGenerations, CancelReason};
use executor::{GenerationExecutor, GenerationJob, JobKind, next_timestamp};
use locks::ThreadLocks;

/// Result of a blocking send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub thread_id: ThreadId,
    /// The persisted assistant message.
    pub message: Message,
}

/// Terminal state of a streaming generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// The text was persisted as this message.
    Completed(Message),
    /// Stopped before completion; nothing was persisted.
    Cancelled,
    /// The generator failed with this upstream message.
    Failed(String),
}

/// Handle for an in-flight streaming generation.
pub struct GenerationHandle {
    pub thread_id: ThreadId,
    pub generation_id: GenerationId,
    /// User message persisted for this turn; `None` when regenerating.
    pub user_message: Option<Message>,
    /// Events of this generation. Ends after its terminal event; a silently
    /// superseded generation has none, so prefer [`GenerationHandle::finish`]
    /// to wait for completion.
    pub events: EventStream,
    handle: JoinHandle<Result<GenerationOutcome, CoreError>>,
}

impl GenerationHandle {
    /// Await the worker and return how the generation ended.
    pub async fn finish(self) -> Result<GenerationOutcome, CoreError> {
        self.handle
            .await
            .map_err(|err| CoreError::Executor(err.to_string()))?
    }
}

/// A user turn that has been persisted and is ready to generate from.
struct PreparedTurn {
    user: Message,
    input: Vec<ContextMessage>,
}

/// Main façade: owns the stores, the bus, and the per-thread generation state.
pub struct Orchestrator {
    config: Arc<ColloquyConfig>,
    root: PathBuf,
    templates: Arc<dyn TemplateProvider>,
    bus: EventBus,
    executor: Arc<GenerationExecutor>,
}

impl Orchestrator {
    /// Construct an orchestrator with optional overrides.
    ///
    /// Storage resolves from `config.storage` against the current directory.
    /// Without overrides, templates come from `config.commands` and the
    /// registry lives at the configured threads file.
    pub fn new(
        config: ColloquyConfig,
        generator: Arc<dyn Generator>,
        templates: Option<Arc<dyn TemplateProvider>>,
        registry: Option<Arc<dyn ThreadRegistry>>,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self, CoreError> {
        info!("initializing orchestrator");
        config.validate()?;
        let cwd = std::env::current_dir().map_err(colloquy_rs_store::StoreError::from)?;
        let root = config.storage.resolve_root(&cwd);
        debug!(
            "orchestrator settings (root={}, window_size={}, roles={:?})",
            root.display(),
            config.context.window_size,
            config.context.roles
        );

        let conversations = Arc::new(ConversationStore::new(
            config.storage.conversations_path(&root),
        )?);
        let registry: Arc<dyn ThreadRegistry> = match registry {
            Some(registry) => registry,
            None => Arc::new(JsonlThreadRegistry::new(config.storage.threads_path(&root))?),
        };
        let templates: Arc<dyn TemplateProvider> = match templates {
            Some(templates) => templates,
            None => Arc::new(FileTemplateProvider::new(config.commands.resolve_dir(&root))),
        };
        let bus = EventBus::new(config.events.buffer);
        let sink: Arc<dyn EventSink> = Arc::new(FanoutEventSink {
            primary: event_sink,
            bus: bus.clone(),
        });
        let executor = Arc::new(GenerationExecutor {
            generator,
            conversations,
            registry,
            sink,
            locks: ThreadLocks::default(),
            active: ActiveGenerations::default(),
        });

        info!("orchestrator initialized (root={})", root.display());
        Ok(Self {
            config: Arc::new(config),
            root,
            templates,
            bus,
            executor,
        })
    }

    pub fn config(&self) -> &ColloquyConfig {
        &self.config
    }

    /// Resolved storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.executor.conversations
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to events for one thread.
    pub fn subscribe_thread(&self, thread_id: ThreadId) -> EventStream {
        self.bus.subscribe_thread(thread_id)
    }

    /// Create an empty thread.
    pub fn create_thread(&self, name: Option<String>) -> Result<Thread, CoreError> {
        Ok(self.executor.registry.create_thread(name)?)
    }

    /// Send a user message and wait for the full response.
    ///
    /// Holds the thread lock until the assistant message is persisted. This
    /// path is not cancellable.
    pub async fn send_message(
        &self,
        thread_id: Option<ThreadId>,
        text: &str,
        command_id: Option<&str>,
    ) -> Result<SendResult, CoreError> {
        let thread_id = self.resolve_thread(thread_id)?;
        let _guard = self.executor.locks.lock(thread_id).await;
        self.supersede(thread_id);
        let turn = self.prepare_turn(thread_id, text, command_id)?;
        let generation_id = Uuid::new_v4();
        info!(
            "sending message (thread_id={}, generation_id={}, context={})",
            thread_id,
            generation_id,
            turn.input.len()
        );

        let generation = match self.executor.generator.generate(&turn.input).await {
            Ok(generation) => generation,
            Err(err) => {
                error!(
                    "generation failed (thread_id={}, generation_id={}, error={})",
                    thread_id, generation_id, err
                );
                self.executor.emit(
                    thread_id,
                    EventPayload::Error {
                        generation_id: Some(generation_id),
                        message: err.to_string(),
                    },
                );
                return Err(err.into());
            }
        };

        let message = Message::new(thread_id, generation.role, generation.content)
            .with_created_at(next_timestamp(Some(turn.user.created_at)));
        if let Err(err) = self.executor.persist(&message) {
            error!(
                "failed to persist reply (thread_id={}, generation_id={}, error={})",
                thread_id, generation_id, err
            );
            self.executor.emit(
                thread_id,
                EventPayload::Error {
                    generation_id: Some(generation_id),
                    message: err.to_string(),
                },
            );
            return Err(err);
        }
        self.executor.emit(
            thread_id,
            EventPayload::Complete {
                generation_id,
                message_id: message.id,
                content: message.model_content.clone(),
            },
        );
        Ok(SendResult { thread_id, message })
    }

    /// Send a user message and stream the response.
    ///
    /// Returns once the user message is persisted and the worker is running.
    pub async fn send_message_stream(
        &self,
        thread_id: Option<ThreadId>,
        text: &str,
        command_id: Option<&str>,
    ) -> Result<GenerationHandle, CoreError> {
        let thread_id = self.resolve_thread(thread_id)?;
        let _guard = self.executor.locks.lock(thread_id).await;
        self.supersede(thread_id);
        let turn = self.prepare_turn(thread_id, text, command_id)?;
        let not_before = turn.user.created_at;
        Ok(self.spawn(
            thread_id,
            turn.input,
            JobKind::Reply { not_before },
            Some(turn.user),
        ))
    }

    /// Regenerate the most recent assistant message in place.
    ///
    /// The context is the conversation before that message. On completion the
    /// message keeps its id, timestamp, and role; its style resets to none.
    pub async fn regenerate(&self, thread_id: ThreadId) -> Result<GenerationHandle, CoreError> {
        let _guard = self.executor.locks.lock(thread_id).await;
        self.supersede(thread_id);

        let mut history = self.executor.conversations.find_all(thread_id)?;
        history.sort_by_key(|message| message.created_at);
        let Some(target) = history
            .iter()
            .rposition(|message| message.role == Role::Assistant)
        else {
            return Err(self.nothing_to_regenerate(thread_id));
        };
        let snapshot = history[target].clone();
        history.truncate(target);
        if !history.iter().any(|message| message.role == Role::User) {
            return Err(self.nothing_to_regenerate(thread_id));
        }

        // Prior turns plus the prompt that produced the answer.
        let window = select_page(
            &history,
            &self.config.context.roles,
            0,
            self.config.context.window_size + 1,
        );
        let input = window.iter().map(ContextMessage::from).collect();
        info!(
            "regenerating message (thread_id={}, message_id={})",
            thread_id, snapshot.id
        );
        Ok(self.spawn(thread_id, input, JobKind::Regenerate { snapshot }, None))
    }

    /// Cancel the thread's active generation.
    ///
    /// Observers always receive a `Cancelled` event; the return value says
    /// whether a generation was actually running.
    pub fn cancel(&self, thread_id: ThreadId) -> bool {
        match self.executor.active.cancel(thread_id, CancelReason::Requested) {
            Some(generation_id) => {
                info!(
                    "cancel requested (thread_id={}, generation_id={})",
                    thread_id, generation_id
                );
                true
            }
            None => {
                debug!("cancel with no active generation (thread_id={})", thread_id);
                self.executor.emit(
                    thread_id,
                    EventPayload::Cancelled {
                        generation_id: None,
                    },
                );
                false
            }
        }
    }

    /// True while a streaming generation runs on the thread.
    pub fn is_generating(&self, thread_id: ThreadId) -> bool {
        self.executor.active.current(thread_id).is_some()
    }

    pub fn list_displayable(&self, thread_id: ThreadId) -> Result<Vec<Message>, CoreError> {
        Ok(self.executor.conversations.find_displayable(thread_id)?)
    }

    pub fn list_messages(&self, thread_id: ThreadId) -> Result<Vec<Message>, CoreError> {
        Ok(self.executor.conversations.find_all(thread_id)?)
    }

    pub fn list_threads(&self) -> Result<Vec<Thread>, CoreError> {
        Ok(self.executor.registry.list_threads()?)
    }

    pub fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>, CoreError> {
        Ok(self.executor.registry.get_thread(thread_id)?)
    }

    pub fn rename_thread(&self, thread_id: ThreadId, name: &str) -> Result<Thread, CoreError> {
        self.executor
            .registry
            .rename_thread(thread_id, name)?
            .ok_or(CoreError::UnknownThread(thread_id))
    }

    /// Delete the thread's log and registry entry, silently stopping any
    /// active generation first.
    pub async fn delete_thread(&self, thread_id: ThreadId) -> Result<bool, CoreError> {
        let guard = self.executor.locks.lock(thread_id).await;
        if let Some(generation_id) = self
            .executor
            .active
            .cancel(thread_id, CancelReason::ThreadDeleted)
        {
            debug!(
                "stopped generation for deleted thread (thread_id={}, generation_id={})",
                thread_id, generation_id
            );
        }
        let removed_log = self.executor.conversations.delete_thread(thread_id)?;
        let removed_entry = self.executor.registry.delete_thread(thread_id)?;
        drop(guard);
        self.executor.locks.evict_idle(thread_id);
        info!(
            "deleted thread (thread_id={}, log={}, entry={})",
            thread_id, removed_log, removed_entry
        );
        Ok(removed_log || removed_entry)
    }

    fn resolve_thread(&self, thread_id: Option<ThreadId>) -> Result<ThreadId, CoreError> {
        match thread_id {
            Some(thread_id) => Ok(thread_id),
            None => Ok(self.executor.registry.create_thread(None)?.id),
        }
    }

    fn supersede(&self, thread_id: ThreadId) {
        if let Some(generation_id) = self
            .executor
            .active
            .cancel(thread_id, CancelReason::Superseded)
        {
            debug!(
                "superseding active generation (thread_id={}, generation_id={})",
                thread_id, generation_id
            );
        }
    }

    /// Load the context window, then persist the user message.
    fn prepare_turn(
        &self,
        thread_id: ThreadId,
        text: &str,
        command_id: Option<&str>,
    ) -> Result<PreparedTurn, CoreError> {
        let history = self.executor.conversations.find_all(thread_id)?;
        let window = select_page(
            &history,
            &self.config.context.roles,
            0,
            self.config.context.window_size,
        );
        let latest = history.iter().map(|message| message.created_at).max();

        let model_content = self.render(text, command_id)?;
        let user = Message::new(thread_id, Role::User, text)
            .with_model_content(model_content)
            .with_command_id(command_id.map(str::to_string))
            .with_created_at(next_timestamp(latest));
        self.executor.persist(&user)?;

        let mut input: Vec<ContextMessage> = window.iter().map(ContextMessage::from).collect();
        input.push(ContextMessage::from(&user));
        Ok(PreparedTurn { user, input })
    }

    fn render(&self, text: &str, command_id: Option<&str>) -> Result<String, CoreError> {
        let Some(command_id) = command_id else {
            return Ok(text.to_string());
        };
        let template = self.templates.lookup_template(command_id)?;
        if template.is_none() {
            warn!("unknown command; sending raw text (command_id={})", command_id);
        }
        Ok(apply_template(
            template.as_deref(),
            &self.config.commands.placeholder,
            text,
        ))
    }

    fn spawn(
        &self,
        thread_id: ThreadId,
        input: Vec<ContextMessage>,
        kind: JobKind,
        user_message: Option<Message>,
    ) -> GenerationHandle {
        let generation_id = Uuid::new_v4();
        let events = self.bus.subscribe_generation(thread_id, generation_id);
        let signal = self.executor.active.start(thread_id, generation_id);
        let job = GenerationJob {
            thread_id,
            generation_id,
            input,
            kind,
        };
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.run(job, signal).await });
        GenerationHandle {
            thread_id,
            generation_id,
            user_message,
            events,
            handle,
        }
    }

    fn nothing_to_regenerate(&self, thread_id: ThreadId) -> CoreError {
        let err = CoreError::NothingToRegenerate(thread_id);
        warn!("{}", err);
        self.executor.emit(
            thread_id,
            EventPayload::Error {
                generation_id: None,
                message: err.to_string(),
            },
        );
        err
    }
}
