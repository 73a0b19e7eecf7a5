//! Error types for the core orchestrator crate.

use crate::generation::GenerationError;
use crate::templates::TemplateError;
use colloquy_rs_config::ConfigError;
use colloquy_rs_protocol::ThreadId;
use colloquy_rs_store::StoreError;
use thiserror::Error;

/// Errors returned by conversation and orchestrator operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record store failure (I/O, serialization, immutable field).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The generation capability failed.
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    /// Prompt template lookup failed.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    /// Configuration was rejected.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Regenerate found no assistant answer (or no prompt before it).
    #[error("nothing to regenerate in thread {0}")]
    NothingToRegenerate(ThreadId),
    /// Thread id is unknown to the registry.
    #[error("unknown thread: {0}")]
    UnknownThread(ThreadId),
    /// A worker task failed to run to completion.
    #[error("executor error: {0}")]
    Executor(String),
}
