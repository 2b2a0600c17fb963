use crate::engine::EngineSnapshot;
use crate::error::PrepareError;
use crate::focus::FocusChange;
use crate::model::PlaybackItem;
use std::sync::mpsc::Sender;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub items: Vec<PlaybackItem>,
    pub start_index: Option<usize>,
    pub shuffle: bool,
    pub repeat: bool,
}

impl StartRequest {
    pub fn new(items: Vec<PlaybackItem>) -> Self {
        Self {
            items,
            start_index: None,
            shuffle: false,
            repeat: false,
        }
    }

    pub fn starting_at(mut self, index: usize) -> Self {
        self.start_index = Some(index);
        self
    }

    pub fn shuffled(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(StartRequest),
    Play,
    Pause,
    Stop,
    SeekTo(u64),
    Next,
    Previous,
    JumpTo(usize),
    SetShuffle(bool),
    SetRepeat(bool),
    SetVolume(f32),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::SeekTo(_) => "seek",
            Self::Next => "next",
            Self::Previous => "previous",
            Self::JumpTo(_) => "jump",
            Self::SetShuffle(_) => "shuffle",
            Self::SetRepeat(_) => "repeat",
            Self::SetVolume(_) => "volume",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Prepared { duration: Option<Duration> },
    Failed(PrepareError),
    Buffering(u8),
    Completed,
}

#[derive(Debug, Clone)]
pub enum Query {
    Snapshot(Sender<EngineSnapshot>),
}

#[derive(Debug, Clone)]
pub enum EngineInput {
    Command(Command),
    Session { generation: u64, event: SessionEvent },
    Focus(FocusChange),
    // `request` counts the engine's focus requests and abandons at the time
    // the arbiter sent the change.
    ArbiterFocus { request: u64, change: FocusChange },
    RouteChanged,
    Query(Query),
    Shutdown,
}

impl From<Command> for EngineInput {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}
