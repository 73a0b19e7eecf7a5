//! Core conversation primitives for Colloquy.
//!
//! This crate owns the per-thread message store, the thread registry, prompt
//! templates, and the orchestrator that turns user text into persisted,
//! streamed assistant replies.

pub mod conversation;
pub mod error;
pub mod events;
pub mod generation;
pub mod orchestrator;
pub mod templates;
pub mod threads;
pub mod types;

pub use colloquy_rs_protocol::{EventMsg, EventPayload, EventSink};
pub use conversation::ConversationStore;
pub use error::CoreError;
pub use events::{EventBus, EventStream};
pub use generation::{ContextMessage, Generation, GenerationError, Generator, TokenStream};
pub use orchestrator::{GenerationHandle, GenerationOutcome, Orchestrator, SendResult};
pub use templates::{
    CommandState, CommandSummary, FileTemplateProvider, InMemoryTemplateProvider,
    TemplateProvider, apply_template,
};
pub use threads::{JsonlThreadRegistry, ThreadRegistry};
pub use types::{GenerationId, Message, MessageId, Role, StyleType, Thread, ThreadId};
