//! Broadcast notification bus for generation events.

use colloquy_rs_protocol::{EventMsg, EventSink, GenerationId, ThreadId};
use futures_util::{Stream, StreamExt, future};
use log::debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Stream of events delivered to one subscriber.
pub type EventStream = Pin<Box<dyn Stream<Item = EventMsg> + Send>>;

/// Fan-out bus. Publishing never blocks; a subscriber that falls more than
/// the buffer behind loses the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMsg>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    /// Raw receiver for every event.
    pub fn subscribe(&self) -> broadcast::Receiver<EventMsg> {
        self.sender.subscribe()
    }

    /// Every event as a stream.
    pub fn subscribe_all(&self) -> EventStream {
        Box::pin(receive(self.sender.subscribe()))
    }

    /// Events for one thread.
    pub fn subscribe_thread(&self, thread_id: ThreadId) -> EventStream {
        Box::pin(
            receive(self.sender.subscribe())
                .filter(move |event| future::ready(event.thread_id == thread_id)),
        )
    }

    /// Events for one generation, ending after its terminal event.
    pub(crate) fn subscribe_generation(
        &self,
        thread_id: ThreadId,
        generation_id: GenerationId,
    ) -> EventStream {
        let events = receive(self.sender.subscribe()).filter(move |event| {
            future::ready(
                event.thread_id == thread_id
                    && event.payload.generation_id() == Some(generation_id),
            )
        });
        Box::pin(futures_util::stream::unfold(
            (Box::pin(events), false),
            |(mut events, finished)| async move {
                if finished {
                    return None;
                }
                let event = events.next().await?;
                let finished = event.payload.is_terminal();
                Some((event, (events, finished)))
            },
        ))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: EventMsg) {
        if self.sender.send(event).is_err() {
            debug!("event dropped; no subscribers");
        }
    }
}

/// Sends every event to the bus and to an embedder-provided sink.
pub(crate) struct FanoutEventSink {
    pub(crate) primary: Option<Arc<dyn EventSink>>,
    pub(crate) bus: EventBus,
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: EventMsg) {
        if let Some(primary) = &self.primary {
            primary.emit(event.clone());
        }
        self.bus.emit(event);
    }
}

fn receive(receiver: broadcast::Receiver<EventMsg>) -> impl Stream<Item = EventMsg> + Send {
    BroadcastStream::new(receiver).filter_map(|item| {
        future::ready(match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!("subscriber lagged (skipped={})", skipped);
                None
            }
        })
    })
}
