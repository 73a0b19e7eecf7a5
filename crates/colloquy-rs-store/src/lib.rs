//! Append-mostly JSONL record storage for Colloquy.
//!
//! A [`JsonlStore`] owns one file holding one JSON object per line. New ids
//! are appended; saving an existing id rewrites the file through a temp file
//! and an atomic rename so readers never observe a torn write.

pub mod error;
pub mod jsonl;
pub mod record;

/// Store error type.
pub use error::StoreError;
/// File-backed record store.
pub use jsonl::JsonlStore;
/// Record trait implemented by stored values.
pub use record::Record;
