use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

const ID_DIGEST_BYTES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn for_location(location: &str) -> Self {
        let digest = Sha256::digest(location.as_bytes());
        let mut hex = String::with_capacity(ID_DIGEST_BYTES * 2);
        for byte in digest.iter().take(ID_DIGEST_BYTES) {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Local,
    Stream,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub location: String,
}

impl SourceDescriptor {
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            kind: SourceKind::Local,
            location: path.as_ref().to_string_lossy().to_string(),
        }
    }

    pub fn stream(url: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Stream,
            location: url.into(),
        }
    }

    pub fn classify(location: &str) -> Self {
        let trimmed = location.trim();
        let lower = trimmed.to_ascii_lowercase();
        let kind = if trimmed.is_empty() {
            SourceKind::Unknown
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::Stream
        } else {
            SourceKind::Local
        };
        Self {
            kind,
            location: trimmed.to_string(),
        }
    }

    pub fn needs_network(&self) -> bool {
        self.kind == SourceKind::Stream
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackItem {
    pub id: ItemId,
    pub source: SourceDescriptor,
    pub title: String,
    pub author: Option<String>,
}

impl PlaybackItem {
    pub fn new(source: SourceDescriptor, title: impl Into<String>) -> Self {
        Self {
            id: ItemId::for_location(&source.location),
            source,
            title: title.into(),
            author: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = id;
        self
    }

    pub fn display_name(&self) -> String {
        match &self.author {
            Some(author) => format!("{} - {}", author, self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
    JumpTo(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    Preparing,
    Playing,
    Paused,
    Stopped,
    Ended,
}

impl EngineState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Ended => "ended",
        }
    }

    pub fn reports_paused(self) -> bool {
        matches!(self, Self::Paused | Self::Stopped | Self::Ended)
    }

    pub fn has_session(self) -> bool {
        matches!(self, Self::Preparing | Self::Playing | Self::Paused)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
