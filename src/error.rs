use crate::model::EngineState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    EmptyQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrepareError {
    #[error("unsupported source: {location}")]
    UnsupportedSource { location: String },

    #[error("failed to open {location}: {message}")]
    Open { location: String, message: String },

    #[error("failed to decode {location}: {message}")]
    Decode { location: String, message: String },

    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("{0}")]
    Scripted(String),
}

impl PrepareError {
    pub fn open(location: &str, err: impl std::fmt::Display) -> Self {
        Self::Open {
            location: location.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(location: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            location: location.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("no items to play")]
    EmptyQueue,

    #[error("item {index} failed to prepare: {reason}")]
    PrepareFailed { index: usize, reason: PrepareError },

    #[error("every item in the queue failed to prepare")]
    PrepareExhausted,

    #[error("audio focus was denied")]
    FocusDenied,

    #[error("{command} is not meaningful while {state}")]
    InvalidCommand {
        command: &'static str,
        state: EngineState,
    },

    #[error("playback engine is no longer running")]
    EngineGone,
}

impl From<QueueError> for PlaybackError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::EmptyQueue => Self::EmptyQueue,
        }
    }
}
