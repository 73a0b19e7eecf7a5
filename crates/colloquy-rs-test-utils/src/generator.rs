use async_trait::async_trait;
use colloquy_rs_core::{ContextMessage, Generation, GenerationError, Generator, TokenStream};
use futures_util::stream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct FixedGenerator {
    response: String,
}

impl FixedGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl Generator for FixedGenerator {
    async fn generate(&self, _context: &[ContextMessage]) -> Result<Generation, GenerationError> {
        Ok(Generation::assistant(self.response.clone()))
    }
}

/// Answers with a fixed text and records every context it was given.
#[derive(Debug, Clone)]
pub struct RecordingGenerator {
    response: String,
    calls: Arc<Mutex<Vec<Vec<ContextMessage>>>>,
}

impl RecordingGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Contexts seen so far, one entry per call.
    pub fn calls(&self) -> Vec<Vec<ContextMessage>> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<Vec<ContextMessage>> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, context: &[ContextMessage]) -> Result<Generation, GenerationError> {
        self.calls.lock().push(context.to_vec());
        Ok(Generation::assistant(self.response.clone()))
    }
}

/// Streams a fixed list of chunks.
#[derive(Debug, Clone)]
pub struct StreamingGenerator {
    chunks: Vec<String>,
}

impl StreamingGenerator {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Generator for StreamingGenerator {
    async fn generate(&self, _context: &[ContextMessage]) -> Result<Generation, GenerationError> {
        Ok(Generation::assistant(self.chunks.concat()))
    }

    async fn generate_stream(
        &self,
        _context: &[ContextMessage],
    ) -> Result<TokenStream, GenerationError> {
        let chunks = self.chunks.clone().into_iter().map(Ok).collect::<Vec<_>>();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Fails every request before producing anything.
#[derive(Debug, Clone)]
pub struct FailingGenerator {
    message: String,
}

impl FailingGenerator {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _context: &[ContextMessage]) -> Result<Generation, GenerationError> {
        Err(GenerationError::Upstream(self.message.clone()))
    }
}

/// Streams some chunks, then fails mid-stream.
#[derive(Debug, Clone)]
pub struct FailingStreamGenerator {
    chunks: Vec<String>,
    message: String,
}

impl FailingStreamGenerator {
    pub fn new<I, S>(chunks: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Generator for FailingStreamGenerator {
    async fn generate(&self, _context: &[ContextMessage]) -> Result<Generation, GenerationError> {
        Err(GenerationError::Upstream(self.message.clone()))
    }

    async fn generate_stream(
        &self,
        _context: &[ContextMessage],
    ) -> Result<TokenStream, GenerationError> {
        let mut items = self.chunks.clone().into_iter().map(Ok).collect::<Vec<_>>();
        items.push(Err(GenerationError::Upstream(self.message.clone())));
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Streams chunks one at a time as the test releases them.
///
/// Each call also signals `started`, so tests can wait
/// until a worker is actually inside the generator. `open` removes the gate.
#[derive(Debug, Clone)]
pub struct GatedGenerator {
    chunks: Vec<String>,
    gate: Arc<Semaphore>,
    started: Arc<Semaphore>,
}

impl GatedGenerator {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let `count` more chunks through.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Let every remaining chunk through, now and for later calls.
    pub fn open(&self) {
        self.gate.close();
    }

    /// Wait until one more stream has started.
    pub async fn started(&self) {
        if let Ok(permit) = self.started.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl Generator for GatedGenerator {
    /// Waits for one release before answering with every chunk.
    async fn generate(&self, _context: &[ContextMessage]) -> Result<Generation, GenerationError> {
        self.started.add_permits(1);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(Generation::assistant(self.chunks.concat()))
    }

    async fn generate_stream(
        &self,
        _context: &[ContextMessage],
    ) -> Result<TokenStream, GenerationError> {
        self.started.add_permits(1);
        let gate = self.gate.clone();
        let chunks = self.chunks.clone().into_iter();
        Ok(Box::pin(stream::unfold(
            (chunks, gate),
            |(mut chunks, gate)| async move {
                let chunk = chunks.next()?;
                // A closed gate lets everything through.
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                Some((Ok(chunk), (chunks, gate)))
            },
        )))
    }
}
