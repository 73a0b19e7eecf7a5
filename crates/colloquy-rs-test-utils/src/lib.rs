//! Test helpers shared across Colloquy crates.

pub mod generator;
pub mod sink;

pub use generator::{
    FailingGenerator, FailingStreamGenerator, FixedGenerator, GatedGenerator, RecordingGenerator,
    StreamingGenerator,
};
pub use sink::RecordingSink;
