mod device;
mod null;
mod scripted;

pub use device::{RodioSessionFactory, available_outputs, default_output_name};
pub use null::NullSessionFactory;
pub use scripted::{PrepareOutcome, ScriptHandle, ScriptedSessionFactory, SessionCall};

use crate::error::PrepareError;
use crate::input::{EngineInput, SessionEvent};
use crate::model::{PlaybackItem, SourceDescriptor, SourceKind};
use anyhow::Result;
#[cfg(unix)]
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

pub const MAX_VOLUME: f32 = 2.5;

/// Live decode/render handle for exactly one item. Sessions are created
/// paused; the engine calls `play` once preparation is reported.
pub trait RenderSession {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn set_volume(&mut self, volume: f32);
    fn position(&self) -> Option<Duration>;
}

pub trait SessionFactory {
    fn create(
        &mut self,
        item: &PlaybackItem,
        reporter: SessionReporter,
    ) -> std::result::Result<Box<dyn RenderSession>, PrepareError>;

    fn output_name(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct SessionReporter {
    generation: u64,
    tx: Sender<EngineInput>,
}

impl SessionReporter {
    pub fn new(generation: u64, tx: Sender<EngineInput>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(EngineInput::Session {
            generation: self.generation,
            event,
        });
    }

    pub fn prepared(&self, duration: Option<Duration>) {
        self.send(SessionEvent::Prepared { duration });
    }

    pub fn failed(&self, err: PrepareError) {
        self.send(SessionEvent::Failed(err));
    }

    pub fn buffering(&self, percent: u8) {
        self.send(SessionEvent::Buffering(percent.min(100)));
    }

    pub fn completed(&self) {
        self.send(SessionEvent::Completed);
    }
}

pub fn local_path(source: &SourceDescriptor) -> std::result::Result<PathBuf, PrepareError> {
    let unsupported = || PrepareError::UnsupportedSource {
        location: source.location.clone(),
    };

    match source.kind {
        SourceKind::Local => Ok(PathBuf::from(
            source
                .location
                .strip_prefix("file://")
                .unwrap_or(&source.location),
        )),
        SourceKind::Stream => source
            .location
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(unsupported),
        SourceKind::Unknown => Err(unsupported()),
    }
}

fn spawn_completion_watcher(
    alive: Arc<AtomicBool>,
    poll: Duration,
    reporter: SessionReporter,
    finished: impl Fn() -> bool + Send + 'static,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("encore-watch-{}", reporter.generation()))
        .spawn(move || {
            while alive.load(Ordering::Acquire) {
                thread::sleep(poll);
                if finished() {
                    if alive.load(Ordering::Acquire) {
                        reporter.completed();
                    }
                    break;
                }
            }
        })
        .map(|_| ())
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}
