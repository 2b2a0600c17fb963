use crate::engine::{Collaborators, EngineConfig, EngineSnapshot, Flow, PlaybackEngine};
use crate::error::PlaybackError;
use crate::events::{self, EventBatch};
use crate::focus::FocusChange;
use crate::input::{Command, EngineInput, Query, StartRequest};
use crate::model::{EngineState, PlaybackItem};
use anyhow::{Context, Result, anyhow};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

pub struct Player {
    inputs: Sender<EngineInput>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// `build` runs on the engine thread, so collaborators that must stay on
    /// one thread (like an audio output stream) can be created there.
    pub fn spawn<B>(config: EngineConfig, build: B) -> Result<(Self, Receiver<EventBatch>)>
    where
        B: FnOnce() -> Result<Collaborators> + Send + 'static,
    {
        let (inputs, queue) = mpsc::channel::<EngineInput>();
        let (sink, batches) = events::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::result::Result<String, String>>(1);

        let engine_inputs = inputs.clone();
        let worker = thread::Builder::new()
            .name("encore-engine".to_string())
            .spawn(move || {
                let collaborators = match build() {
                    Ok(collaborators) => collaborators,
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("{err:#}")));
                        return;
                    }
                };
                let mut engine = PlaybackEngine::new(config, collaborators, engine_inputs, sink);
                let _ = ready_tx.send(Ok(engine.snapshot().output));

                while let Ok(input) = queue.recv() {
                    if engine.handle(input) == Flow::Shutdown {
                        break;
                    }
                }
                debug!("engine thread exiting");
            })
            .context("failed to start engine thread")?;

        match ready_rx.recv() {
            Ok(Ok(output)) => info!(%output, "playback engine ready"),
            Ok(Err(message)) => {
                let _ = worker.join();
                return Err(anyhow!("failed to set up playback: {message}"));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(anyhow!("engine thread exited during setup"));
            }
        }

        Ok((
            Self {
                inputs,
                worker: Some(worker),
            },
            batches,
        ))
    }

    fn send(&self, input: EngineInput) -> Result<(), PlaybackError> {
        self.inputs
            .send(input)
            .map_err(|_| PlaybackError::EngineGone)
    }

    pub fn command(&self, command: Command) -> Result<(), PlaybackError> {
        self.send(EngineInput::Command(command))
    }

    pub fn start(&self, request: StartRequest) -> Result<(), PlaybackError> {
        self.command(Command::Start(request))
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        self.command(Command::Play)
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.command(Command::Pause)
    }

    pub fn stop(&self) -> Result<(), PlaybackError> {
        self.command(Command::Stop)
    }

    pub fn seek_to(&self, position_ms: u64) -> Result<(), PlaybackError> {
        self.command(Command::SeekTo(position_ms))
    }

    pub fn next(&self) -> Result<(), PlaybackError> {
        self.command(Command::Next)
    }

    pub fn previous(&self) -> Result<(), PlaybackError> {
        self.command(Command::Previous)
    }

    pub fn jump_to(&self, index: usize) -> Result<(), PlaybackError> {
        self.command(Command::JumpTo(index))
    }

    pub fn set_shuffle(&self, shuffle: bool) -> Result<(), PlaybackError> {
        self.command(Command::SetShuffle(shuffle))
    }

    pub fn set_repeat(&self, repeat: bool) -> Result<(), PlaybackError> {
        self.command(Command::SetRepeat(repeat))
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        self.command(Command::SetVolume(volume))
    }

    pub fn focus_changed(&self, change: FocusChange) -> Result<(), PlaybackError> {
        self.send(EngineInput::Focus(change))
    }

    pub fn route_notifier(&self) -> impl Fn() + Send + 'static {
        let inputs = self.inputs.clone();
        move || {
            let _ = inputs.send(EngineInput::RouteChanged);
        }
    }

    pub fn snapshot(&self) -> Result<EngineSnapshot, PlaybackError> {
        let (reply, answer) = mpsc::channel();
        self.send(EngineInput::Query(Query::Snapshot(reply)))?;
        answer.recv().map_err(|_| PlaybackError::EngineGone)
    }

    pub fn state(&self) -> Result<EngineState, PlaybackError> {
        Ok(self.snapshot()?.state)
    }

    pub fn current_item(&self) -> Result<Option<PlaybackItem>, PlaybackError> {
        Ok(self.snapshot()?.current_item)
    }

    pub fn current_index(&self) -> Result<Option<usize>, PlaybackError> {
        Ok(self.snapshot()?.current_index)
    }

    pub fn current_position_ms(&self) -> Result<Option<u64>, PlaybackError> {
        Ok(self.snapshot()?.position_ms)
    }

    pub fn is_paused(&self) -> Result<bool, PlaybackError> {
        Ok(self.snapshot()?.paused)
    }

    pub fn is_playing(&self) -> Result<bool, PlaybackError> {
        Ok(self.snapshot()?.playing)
    }

    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let _ = self.inputs.send(EngineInput::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
