//! Public SDK surface for Colloquy.
//!
//! This crate re-exports the core building blocks and provides a small
//! initialization helper to keep consumer setup consistent.

/// Re-export for convenience.
pub use colloquy_rs_config as config;
pub use colloquy_rs_core as core;
/// Re-export for convenience.
pub use colloquy_rs_protocol as protocol;
/// Re-export for convenience.
pub use colloquy_rs_store as store;

pub use colloquy_rs_config::ColloquyConfig;
pub use colloquy_rs_core::{
    CoreError, GenerationHandle, GenerationOutcome, Generator, Message, Orchestrator, Role,
    SendResult, Thread, ThreadId,
};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// This is a no-op if the feature is not enabled. Binaries are still expected
/// to call this early in startup to ensure log output is wired up.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::builder()
            .format_timestamp_millis()
            .parse_default_env()
            .try_init();
    }
}
