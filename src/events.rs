use crate::model::{EngineState, PlaybackItem};
use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    PausedChanged(bool),
    ShuffleChanged(bool),
    RepeatChanged(bool),
    ItemChanged { item: PlaybackItem, index: usize },
    Prepared { duration_ms: Option<u64> },
    Buffering(u8),
    VolumeChanged(f32),
    FocusDenied,
    PrepareExhausted,
    Ended,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    pub events: Vec<EngineEvent>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, event: &EngineEvent) -> bool {
        self.events.contains(event)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineEvent> {
        self.events.iter()
    }
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<EventBatch>,
}

impl EventSink {
    pub fn new(tx: Sender<EventBatch>) -> Self {
        Self { tx }
    }

    pub fn publish(&self, batch: EventBatch) -> bool {
        self.tx.send(batch).is_ok()
    }
}

pub fn channel() -> (EventSink, Receiver<EventBatch>) {
    let (tx, rx) = mpsc::channel();
    (EventSink::new(tx), rx)
}
