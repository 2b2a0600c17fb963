use crate::audio::{MAX_VOLUME, RenderSession, SessionFactory, SessionReporter};
use crate::error::{PlaybackError, PrepareError};
use crate::events::{EngineEvent, EventBatch, EventSink};
use crate::focus::{AudioFocusArbiter, FocusChange, FocusListener, FocusRequest, FocusState};
use crate::input::{Command, EngineInput, Query, SessionEvent, StartRequest};
use crate::model::{Direction, EngineState, PlaybackItem};
use crate::queue::{Advance, PlaybackQueue};
use crate::recovery::ErrorRecoveryPolicy;
use crate::resources::{ResourceGuard, ResourceKind, ResourceLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusDeniedPolicy {
    #[default]
    StayPaused,
    PlayMuted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub volume: f32,
    pub duck_ratio: f32,
    pub focus_denied: FocusDeniedPolicy,
    pub shuffle_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            duck_ratio: 0.2,
            focus_denied: FocusDeniedPolicy::StayPaused,
            shuffle_seed: None,
        }
    }
}

pub struct Collaborators {
    pub sessions: Box<dyn SessionFactory>,
    pub focus: Box<dyn AudioFocusArbiter>,
    pub resources: Arc<dyn ResourceLock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub current_item: Option<PlaybackItem>,
    pub current_index: Option<usize>,
    pub position_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub paused: bool,
    pub playing: bool,
    pub shuffle: bool,
    pub repeat: bool,
    pub volume: f32,
    pub focus: FocusState,
    pub queue_len: usize,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    User,
    Completion,
    Failure,
}

struct ActiveSession {
    index: usize,
    handle: Box<dyn RenderSession>,
    prepared: bool,
    duration: Option<Duration>,
}

pub struct PlaybackEngine {
    config: EngineConfig,
    state: EngineState,
    queue: Option<PlaybackQueue>,
    recovery: ErrorRecoveryPolicy,
    session: Option<ActiveSession>,
    generation: u64,
    sessions: Box<dyn SessionFactory>,
    focus: Box<dyn AudioFocusArbiter>,
    focus_state: FocusState,
    focus_requests: Arc<AtomicU64>,
    holds_focus: bool,
    resume_on_gain: bool,
    play_when_prepared: bool,
    resources: Arc<dyn ResourceLock>,
    guard: Option<ResourceGuard>,
    volume: f32,
    muted: bool,
    ended_reported: bool,
    inputs: Sender<EngineInput>,
    sink: EventSink,
    pending: Vec<EngineEvent>,
}

impl PlaybackEngine {
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        inputs: Sender<EngineInput>,
        sink: EventSink,
    ) -> Self {
        let Collaborators {
            sessions,
            mut focus,
            resources,
        } = collaborators;

        let focus_requests = Arc::new(AtomicU64::new(0));
        let focus_tx = inputs.clone();
        let stamp = Arc::clone(&focus_requests);
        focus.subscribe(FocusListener::new(move |change| {
            let request = stamp.load(Ordering::Acquire);
            let _ = focus_tx.send(EngineInput::ArbiterFocus { request, change });
        }));

        Self {
            volume: config.volume.clamp(0.0, MAX_VOLUME),
            config,
            state: EngineState::Idle,
            queue: None,
            recovery: ErrorRecoveryPolicy::default(),
            session: None,
            generation: 0,
            sessions,
            focus,
            focus_state: FocusState::None,
            focus_requests,
            holds_focus: false,
            resume_on_gain: false,
            play_when_prepared: false,
            resources,
            guard: None,
            muted: false,
            ended_reported: false,
            inputs,
            sink,
            pending: Vec::new(),
        }
    }

    pub fn handle(&mut self, input: EngineInput) -> Flow {
        let flow = match input {
            EngineInput::Command(command) => {
                self.run_command(command);
                Flow::Continue
            }
            EngineInput::Session { generation, event } => {
                self.on_session_event(generation, event);
                Flow::Continue
            }
            EngineInput::Focus(change) => {
                self.on_focus_change(change);
                Flow::Continue
            }
            EngineInput::ArbiterFocus { request, change } => {
                let current = self.focus_requests.load(Ordering::Acquire);
                if request == current {
                    self.on_focus_change(change);
                } else {
                    debug!(
                        request,
                        current,
                        ?change,
                        "discarding focus change from an older request"
                    );
                }
                Flow::Continue
            }
            EngineInput::RouteChanged => {
                self.on_route_changed();
                Flow::Continue
            }
            EngineInput::Query(Query::Snapshot(reply)) => {
                let _ = reply.send(self.snapshot());
                Flow::Continue
            }
            EngineInput::Shutdown => {
                self.shutdown();
                Flow::Shutdown
            }
        };
        self.flush();
        flow
    }

    fn run_command(&mut self, command: Command) {
        let name = command.name();
        match command {
            Command::Start(request) => self.start(request),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::SeekTo(position_ms) => self.seek(position_ms),
            Command::Next => self.transport_switch(name, Direction::Next),
            Command::Previous => self.transport_switch(name, Direction::Previous),
            Command::JumpTo(index) => self.transport_switch(name, Direction::JumpTo(index)),
            Command::SetShuffle(shuffle) => self.set_shuffle(shuffle),
            Command::SetRepeat(repeat) => self.set_repeat(repeat),
            Command::SetVolume(volume) => self.set_volume(volume),
        }
    }

    fn ignore(&self, command: &'static str) {
        let error = PlaybackError::InvalidCommand {
            command,
            state: self.state,
        };
        debug!(%error, "command ignored");
    }

    fn start(&mut self, request: StartRequest) {
        let StartRequest {
            items,
            start_index,
            shuffle,
            repeat,
        } = request;

        self.teardown_session();
        self.resume_on_gain = false;
        self.play_when_prepared = true;
        self.ended_reported = false;
        self.recovery = ErrorRecoveryPolicy::new(items.len());

        let mut queue = match self.config.shuffle_seed {
            Some(seed) => PlaybackQueue::with_seed(items, shuffle, repeat, seed),
            None => PlaybackQueue::new(items, shuffle, repeat),
        };
        info!(items = queue.len(), shuffle, repeat, "starting queue");
        self.emit(EngineEvent::ShuffleChanged(shuffle));
        self.emit(EngineEvent::RepeatChanged(repeat));

        let first = queue.start(start_index);
        self.queue = Some(queue);
        match first {
            Ok(index) => self.prepare(index),
            Err(err) => {
                let error = PlaybackError::from(err);
                info!(%error, "nothing to play");
                self.enter_ended();
            }
        }
    }

    fn play(&mut self) {
        match self.state {
            EngineState::Preparing => self.play_when_prepared = true,
            EngineState::Paused => {
                self.resume_on_gain = false;
                self.start_rendering();
            }
            EngineState::Stopped => {
                let Some(index) = self.queue.as_ref().and_then(PlaybackQueue::position) else {
                    return self.ignore("play");
                };
                self.play_when_prepared = true;
                self.prepare(index);
            }
            EngineState::Playing => {}
            EngineState::Idle | EngineState::Ended => self.ignore("play"),
        }
    }

    fn pause(&mut self) {
        match self.state {
            EngineState::Preparing => self.play_when_prepared = false,
            EngineState::Playing => self.pause_rendering(),
            EngineState::Paused => self.release_rendering(),
            _ => self.ignore("pause"),
        }
    }

    fn stop(&mut self) {
        if !self.state.has_session() {
            return self.ignore("stop");
        }
        self.teardown_session();
        self.release_rendering();
        self.set_state(EngineState::Stopped);
    }

    fn seek(&mut self, position_ms: u64) {
        let seekable = matches!(self.state, EngineState::Playing | EngineState::Paused)
            && self.session.as_ref().is_some_and(|session| session.prepared);
        if !seekable {
            return self.ignore("seek");
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut target = Duration::from_millis(position_ms);
        if let Some(duration) = session.duration {
            target = target.min(duration);
        }
        if let Err(err) = session.handle.seek_to(target) {
            warn!(error = %err, index = session.index, "seek failed");
        }
    }

    fn transport_switch(&mut self, command: &'static str, direction: Direction) {
        if matches!(self.state, EngineState::Idle | EngineState::Ended) {
            return self.ignore(command);
        }
        self.play_when_prepared = true;
        self.switch(direction, Cause::User);
    }

    fn set_shuffle(&mut self, shuffle: bool) {
        let Some(queue) = self.queue.as_mut() else {
            return self.ignore("shuffle");
        };
        if queue.set_shuffle(shuffle) {
            self.emit(EngineEvent::ShuffleChanged(shuffle));
        }
    }

    fn set_repeat(&mut self, repeat: bool) {
        let Some(queue) = self.queue.as_mut() else {
            return self.ignore("repeat");
        };
        if queue.set_repeat(repeat) {
            self.emit(EngineEvent::RepeatChanged(repeat));
        }
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, MAX_VOLUME)
        } else {
            return self.ignore("volume");
        };
        if (volume - self.volume).abs() < f32::EPSILON {
            return;
        }
        self.volume = volume;
        self.apply_volume();
        self.emit(EngineEvent::VolumeChanged(volume));
    }

    fn switch(&mut self, direction: Direction, cause: Cause) {
        let Some(len) = self.queue.as_ref().map(PlaybackQueue::len) else {
            return;
        };
        let explicit = matches!(direction, Direction::JumpTo(_));
        let step = match direction {
            Direction::Previous => Direction::Previous,
            _ => Direction::Next,
        };

        // A wrap regenerates the cycle, so two passes reach every index.
        let mut direction = direction;
        for _ in 0..=(len * 2) {
            let Some(advance) = self.queue.as_mut().map(|queue| queue.advance(direction)) else {
                return;
            };
            let Advance::Moved { index, wrapped } = advance else {
                debug!("queue exhausted");
                return self.enter_ended();
            };

            // Failure-driven wraps only start a fresh cycle after something played.
            if wrapped && (cause != Cause::Failure || self.recovery.has_progressed()) {
                self.recovery.reset();
            }
            if explicit || !self.recovery.is_blacklisted(index) {
                return self.prepare(index);
            }
            debug!(index, "skipping item that already failed this cycle");
            direction = step;
        }

        self.exhausted();
    }

    fn prepare(&mut self, index: usize) {
        let Some(item) = self
            .queue
            .as_ref()
            .and_then(|queue| queue.item(index))
            .cloned()
        else {
            return self.enter_ended();
        };

        self.teardown_session();
        self.generation += 1;
        let generation = self.generation;

        self.set_state(EngineState::Preparing);
        self.emit(EngineEvent::ItemChanged {
            item: item.clone(),
            index,
        });
        self.ensure_guard(item.source.needs_network());

        info!(generation, index, title = %item.title, "preparing item");
        let reporter = SessionReporter::new(generation, self.inputs.clone());
        match self.sessions.create(&item, reporter.clone()) {
            Ok(handle) => {
                self.session = Some(ActiveSession {
                    index,
                    handle,
                    prepared: false,
                    duration: None,
                });
            }
            Err(err) => reporter.failed(err),
        }
    }

    fn on_session_event(&mut self, generation: u64, event: SessionEvent) {
        if generation != self.generation || !self.state.has_session() {
            debug!(
                generation,
                current = self.generation,
                state = %self.state,
                "discarding stale session event"
            );
            return;
        }

        match event {
            SessionEvent::Prepared { duration } => self.on_prepared(duration),
            SessionEvent::Failed(reason) => self.on_failed(reason),
            SessionEvent::Buffering(percent) => {
                if matches!(self.state, EngineState::Preparing | EngineState::Playing) {
                    self.emit(EngineEvent::Buffering(percent));
                }
            }
            SessionEvent::Completed => {
                if self.state == EngineState::Playing {
                    debug!(generation, "item completed");
                    self.switch(Direction::Next, Cause::Completion);
                }
            }
        }
    }

    fn on_prepared(&mut self, duration: Option<Duration>) {
        if self.state != EngineState::Preparing {
            return;
        }
        let Some(session) = self.session.as_mut().filter(|session| !session.prepared) else {
            return;
        };
        session.prepared = true;
        session.duration = duration;
        let index = session.index;

        self.recovery.clear_failure(index);
        let duration_ms = duration.map(millis);
        debug!(generation = self.generation, index, ?duration_ms, "item prepared");
        self.emit(EngineEvent::Prepared { duration_ms });

        if self.play_when_prepared {
            self.start_rendering();
        } else if self.resume_on_gain {
            self.suspend_rendering();
        } else {
            self.release_rendering();
            self.set_state(EngineState::Paused);
        }
    }

    fn on_failed(&mut self, reason: PrepareError) {
        let Some(index) = self
            .session
            .as_ref()
            .map(|session| session.index)
            .or_else(|| self.queue.as_ref().and_then(PlaybackQueue::position))
        else {
            return;
        };

        let error = PlaybackError::PrepareFailed { index, reason };
        warn!(generation = self.generation, %error, "skipping item");
        self.teardown_session();
        if self.recovery.record_failure(index) {
            return self.exhausted();
        }
        self.switch(Direction::Next, Cause::Failure);
    }

    fn exhausted(&mut self) {
        let error = PlaybackError::PrepareExhausted;
        warn!(%error, "giving up on queue");
        self.emit(EngineEvent::PrepareExhausted);
        self.enter_ended();
    }

    fn on_focus_change(&mut self, change: FocusChange) {
        debug!(?change, state = %self.state, focus = ?self.focus_state, "focus change");
        match change {
            FocusChange::Lost => {
                self.release_rendering();
                if self.state.has_session() {
                    info!("focus lost, stopping");
                    self.teardown_session();
                    self.set_state(EngineState::Stopped);
                }
            }
            FocusChange::LostTransient => {
                if !self.holds_focus {
                    return;
                }
                match self.state {
                    EngineState::Playing => {
                        self.focus_state = FocusState::None;
                        self.suspend_rendering();
                        self.resume_on_gain = true;
                    }
                    EngineState::Preparing if self.play_when_prepared => {
                        self.focus_state = FocusState::None;
                        self.play_when_prepared = false;
                        self.resume_on_gain = true;
                    }
                    _ => {}
                }
            }
            FocusChange::LostTransientDuck => {
                if self.focus_state == FocusState::Granted {
                    self.focus_state = FocusState::Ducked;
                    self.apply_volume();
                }
            }
            FocusChange::Gained => {
                if !self.holds_focus {
                    return;
                }
                if self.focus_state == FocusState::Ducked {
                    self.focus_state = FocusState::Granted;
                    self.apply_volume();
                }
                if !self.resume_on_gain {
                    return;
                }
                self.resume_on_gain = false;
                self.focus_state = FocusState::Granted;
                match self.state {
                    EngineState::Paused => self.start_rendering(),
                    EngineState::Preparing => self.play_when_prepared = true,
                    _ => {}
                }
            }
        }
    }

    fn on_route_changed(&mut self) {
        if self.state == EngineState::Playing {
            info!("output route changed, pausing");
            self.pause_rendering();
        }
    }

    fn start_rendering(&mut self) {
        if !self.holds_focus || self.focus_state == FocusState::None {
            self.focus_requests.fetch_add(1, Ordering::AcqRel);
            match self.focus.request_focus() {
                FocusRequest::Granted => {
                    self.holds_focus = true;
                    self.focus_state = FocusState::Granted;
                    self.muted = false;
                }
                FocusRequest::Denied => {
                    let error = PlaybackError::FocusDenied;
                    warn!(%error, policy = ?self.config.focus_denied, "focus request refused");
                    self.emit(EngineEvent::FocusDenied);
                    match self.config.focus_denied {
                        FocusDeniedPolicy::StayPaused => {
                            self.muted = false;
                            if let Some(session) = self.session.as_mut() {
                                session.handle.pause();
                            }
                            self.release_rendering();
                            return self.set_state(EngineState::Paused);
                        }
                        FocusDeniedPolicy::PlayMuted => self.muted = true,
                    }
                }
            }
        }

        let needs_network = self
            .current_item()
            .is_some_and(|item| item.source.needs_network());
        self.ensure_guard(needs_network);

        let volume = self.effective_volume();
        if let Some(session) = self.session.as_mut() {
            session.handle.set_volume(volume);
            session.handle.play();
        }
        self.set_state(EngineState::Playing);
    }

    fn pause_rendering(&mut self) {
        self.suspend_rendering();
        self.release_rendering();
    }

    /// Pause that keeps the focus request alive so a later gain can resume.
    fn suspend_rendering(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.handle.pause();
        }
        self.guard = None;
        self.set_state(EngineState::Paused);
    }

    fn release_rendering(&mut self) {
        if self.holds_focus {
            self.focus_requests.fetch_add(1, Ordering::AcqRel);
            self.focus.abandon_focus();
            self.holds_focus = false;
        }
        self.focus_state = FocusState::None;
        self.resume_on_gain = false;
        self.muted = false;
        self.guard = None;
    }

    fn ensure_guard(&mut self, needs_network: bool) {
        let satisfied = self
            .guard
            .as_ref()
            .is_some_and(|guard| guard.holds(ResourceKind::Network) == needs_network);
        if !satisfied {
            self.guard = Some(ResourceGuard::acquire(
                Arc::clone(&self.resources),
                needs_network,
            ));
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.muted {
            return 0.0;
        }
        match self.focus_state {
            FocusState::Ducked => (self.volume * self.config.duck_ratio).clamp(0.0, MAX_VOLUME),
            FocusState::None | FocusState::Granted => self.volume,
        }
    }

    fn apply_volume(&mut self) {
        let volume = self.effective_volume();
        if let Some(session) = self.session.as_mut().filter(|session| session.prepared) {
            session.handle.set_volume(volume);
        }
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(generation = self.generation, index = session.index, "tearing down session");
            session.handle.stop();
        }
        self.generation += 1;
    }

    fn enter_ended(&mut self) {
        self.teardown_session();
        self.release_rendering();
        self.play_when_prepared = false;
        self.set_state(EngineState::Ended);
        if !self.ended_reported {
            self.ended_reported = true;
            info!("playback ended");
            self.emit(EngineEvent::Ended);
        }
    }

    fn set_state(&mut self, next: EngineState) {
        if self.state == next {
            return;
        }
        let was_paused = self.state.reports_paused();
        info!(from = %self.state, to = %next, generation = self.generation, "state changed");
        self.state = next;
        self.emit(EngineEvent::StateChanged(next));
        if next.reports_paused() != was_paused {
            self.emit(EngineEvent::PausedChanged(next.reports_paused()));
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        self.pending.push(event);
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = EventBatch {
            events: std::mem::take(&mut self.pending),
        };
        if !self.sink.publish(batch) {
            debug!("no event listener attached");
        }
    }

    pub fn shutdown(&mut self) {
        self.teardown_session();
        self.release_rendering();
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn current_index(&self) -> Option<usize> {
        self.queue.as_ref().and_then(PlaybackQueue::position)
    }

    pub fn current_item(&self) -> Option<&PlaybackItem> {
        let queue = self.queue.as_ref()?;
        queue.item(queue.position()?)
    }

    pub fn current_position_ms(&self) -> Option<u64> {
        let session = self.session.as_ref().filter(|session| session.prepared)?;
        let position = session.handle.position()?;
        Some(millis(position))
    }

    pub fn is_paused(&self) -> bool {
        self.state.reports_paused()
    }

    pub fn is_playing(&self) -> bool {
        self.state == EngineState::Playing
    }

    pub fn focus_state(&self) -> FocusState {
        self.focus_state
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            current_item: self.current_item().cloned(),
            current_index: self.current_index(),
            position_ms: self.current_position_ms(),
            duration_ms: self
                .session
                .as_ref()
                .and_then(|session| session.duration)
                .map(millis),
            paused: self.is_paused(),
            playing: self.is_playing(),
            shuffle: self.queue.as_ref().is_some_and(PlaybackQueue::shuffle),
            repeat: self.queue.as_ref().is_some_and(PlaybackQueue::repeat),
            volume: self.volume,
            focus: self.focus_state,
            queue_len: self.queue.as_ref().map_or(0, PlaybackQueue::len),
            output: self.sessions.output_name(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PrepareOutcome, ScriptHandle, ScriptedSessionFactory, SessionCall};
    use crate::events;
    use crate::focus::{FocusBroker, FocusGain};
    use crate::model::SourceDescriptor;
    use crate::resources::TrackingResourceLock;
    use std::sync::mpsc::{self, Receiver};

    struct Rig {
        engine: PlaybackEngine,
        inputs: Receiver<EngineInput>,
        events: Receiver<EventBatch>,
        script: ScriptHandle,
        resources: TrackingResourceLock,
        broker: FocusBroker,
    }

    impl Rig {
        fn new(factory: ScriptedSessionFactory) -> Self {
            Self::with_config(factory, EngineConfig::default())
        }

        fn with_config(factory: ScriptedSessionFactory, config: EngineConfig) -> Self {
            let (tx, inputs) = mpsc::channel();
            let (sink, events) = events::channel();
            let broker = FocusBroker::new();
            let resources = TrackingResourceLock::new();
            let script = factory.handle();
            let engine = PlaybackEngine::new(
                EngineConfig {
                    shuffle_seed: Some(7),
                    ..config
                },
                Collaborators {
                    sessions: Box::new(factory),
                    focus: Box::new(broker.client("engine")),
                    resources: Arc::new(resources.clone()),
                },
                tx,
                sink,
            );
            Self {
                engine,
                inputs,
                events,
                script,
                resources,
                broker,
            }
        }

        fn send(&mut self, command: Command) {
            self.engine.handle(command.into());
            self.pump();
        }

        fn pump(&mut self) {
            while let Ok(input) = self.inputs.try_recv() {
                self.engine.handle(input);
            }
        }

        fn batches(&self) -> Vec<EventBatch> {
            self.events.try_iter().collect()
        }

        fn events(&self) -> Vec<EngineEvent> {
            self.events.try_iter().flat_map(|batch| batch.events).collect()
        }

        fn start(&mut self, len: usize, start: Option<usize>, repeat: bool) {
            let mut request = StartRequest::new(items(len)).repeating(repeat);
            request.start_index = start;
            self.send(Command::Start(request));
        }
    }

    fn items(len: usize) -> Vec<PlaybackItem> {
        (0..len)
            .map(|n| PlaybackItem::new(SourceDescriptor::local(location(n)), format!("song {n}")))
            .collect()
    }

    fn location(n: usize) -> String {
        format!("/music/{n}.flac")
    }

    fn item_changes(events: &[EngineEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::ItemChanged { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    fn count(events: &[EngineEvent], wanted: &EngineEvent) -> usize {
        events.iter().filter(|event| *event == wanted).count()
    }

    #[test]
    fn start_prepares_then_plays_the_requested_item() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(3, Some(1), false);

        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.engine.current_index(), Some(1));
        assert_eq!(rig.engine.current_item().map(|item| item.title.as_str()), Some("song 1"));
        assert!(rig.engine.is_playing());
        assert!(!rig.engine.is_paused());
        assert!(rig.resources.is_held(ResourceKind::Wake));
        assert_eq!(rig.broker.holder_count(), 1);
        assert_eq!(rig.engine.focus_state(), FocusState::Granted);
    }

    #[test]
    fn each_turn_publishes_one_ordered_batch() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(2, None, false);

        let batches = rig.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[0].events,
            vec![
                EngineEvent::ShuffleChanged(false),
                EngineEvent::RepeatChanged(false),
                EngineEvent::StateChanged(EngineState::Preparing),
                EngineEvent::ItemChanged {
                    item: items(2)[0].clone(),
                    index: 0,
                },
            ]
        );
        assert_eq!(
            batches[1].events,
            vec![
                EngineEvent::Prepared {
                    duration_ms: Some(180_000)
                },
                EngineEvent::StateChanged(EngineState::Playing),
            ]
        );
    }

    #[test]
    fn repeat_walks_past_the_end() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(3, Some(1), true);
        rig.events();

        for _ in 0..3 {
            rig.send(Command::Next);
        }
        assert_eq!(item_changes(&rig.events()), vec![2, 0, 1]);
        assert_eq!(rig.engine.state(), EngineState::Playing);
    }

    #[test]
    fn natural_completion_advances_and_finally_ends_once() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(2, None, false);

        rig.script.finish_latest();
        rig.pump();
        assert_eq!(rig.engine.current_index(), Some(1));

        rig.script.finish_latest();
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Ended);
        assert!(rig.engine.is_paused());

        rig.send(Command::Next);
        rig.send(Command::Play);
        let events = rig.events();
        assert_eq!(count(&events, &EngineEvent::Ended), 1);
        assert!(rig.resources.held().is_empty());
        assert_eq!(rig.broker.holder_count(), 0);
    }

    #[test]
    fn every_item_failing_ends_after_one_attempt_each() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Fail);
        let mut rig = Rig::new(factory);
        rig.start(4, Some(2), true);

        assert_eq!(rig.engine.state(), EngineState::Ended);
        assert_eq!(
            rig.script.created(),
            vec![location(2), location(3), location(0), location(1)]
        );
        let events = rig.events();
        assert_eq!(count(&events, &EngineEvent::PrepareExhausted), 1);
        assert_eq!(count(&events, &EngineEvent::Ended), 1);

        rig.send(Command::Play);
        rig.send(Command::Next);
        assert!(rig.events().is_empty());
        assert_eq!(rig.script.created().len(), 4);
    }

    #[test]
    fn exhaustion_holds_for_shuffled_queues() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Fail);
        let mut rig = Rig::new(factory);
        rig.send(Command::Start(
            StartRequest::new(items(6)).shuffled(true).repeating(true),
        ));

        assert_eq!(rig.engine.state(), EngineState::Ended);
        let mut attempted = rig.script.created();
        assert_eq!(attempted.len(), 6);
        attempted.sort();
        attempted.dedup();
        assert_eq!(attempted.len(), 6, "no item is retried within a cycle");
    }

    #[test]
    fn failing_item_is_skipped() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(1), PrepareOutcome::Fail);
        let mut rig = Rig::new(factory);
        rig.start(3, Some(1), false);

        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.engine.current_index(), Some(2));
        assert_eq!(item_changes(&rig.events()), vec![1, 2]);
    }

    #[test]
    fn synchronous_refusal_is_treated_as_a_failure() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(0), PrepareOutcome::Reject);
        let mut rig = Rig::new(factory);
        rig.start(2, None, false);

        assert_eq!(rig.engine.current_index(), Some(1));
        assert_eq!(rig.engine.state(), EngineState::Playing);
    }

    #[test]
    fn failed_item_is_retried_after_the_cycle_rolls_over() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(2), PrepareOutcome::Fail);
        let mut rig = Rig::new(factory);
        rig.start(3, None, true);

        rig.script.finish_latest();
        rig.pump();
        rig.script.finish_latest();
        rig.pump();
        assert_eq!(rig.engine.current_index(), Some(0));

        rig.script.finish_latest();
        rig.pump();
        rig.script.finish_latest();
        rig.pump();
        assert_eq!(
            rig.script.created(),
            vec![
                location(0),
                location(1),
                location(2),
                location(0),
                location(1),
                location(2),
                location(0),
            ]
        );
        assert_eq!(rig.engine.state(), EngineState::Playing);
    }

    #[test]
    fn previous_skips_items_that_failed_this_cycle() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(1), PrepareOutcome::Fail);
        let mut rig = Rig::new(factory);
        rig.start(3, Some(1), true);
        assert_eq!(rig.engine.current_index(), Some(2));

        rig.send(Command::Previous);
        assert_eq!(rig.engine.current_index(), Some(0));
    }

    #[test]
    fn jump_always_attempts_the_requested_item() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(1), PrepareOutcome::Fail);
        let mut rig = Rig::new(factory);
        rig.start(3, Some(1), true);
        rig.send(Command::JumpTo(1));

        let created = rig.script.created();
        assert_eq!(created.iter().filter(|loc| **loc == location(1)).count(), 2);
        assert_eq!(rig.engine.current_index(), Some(2));
    }

    #[test]
    fn stale_prepare_completion_is_discarded() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(0), PrepareOutcome::Hold);
        let mut rig = Rig::new(factory);
        rig.start(3, None, false);
        assert_eq!(rig.engine.state(), EngineState::Preparing);

        rig.send(Command::Next);
        assert_eq!(rig.engine.current_index(), Some(1));
        rig.events();

        rig.script.release_held(Some(1_000));
        rig.pump();
        assert!(rig.events().is_empty());
        assert_eq!(rig.engine.current_index(), Some(1));
        assert_eq!(rig.engine.state(), EngineState::Playing);
    }

    #[test]
    fn stop_while_preparing_ignores_late_completion() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Hold);
        let mut rig = Rig::new(factory);
        rig.start(2, None, false);
        rig.send(Command::Stop);
        assert_eq!(rig.engine.state(), EngineState::Stopped);
        rig.events();

        rig.script.release_held(Some(5_000));
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Stopped);
        assert!(rig.events().is_empty());
        assert!(rig.resources.held().is_empty());
    }

    #[test]
    fn seek_before_prepare_is_silently_ignored() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Hold);
        let mut rig = Rig::new(factory);
        rig.start(1, None, false);
        rig.events();

        rig.send(Command::SeekTo(4_000));
        assert!(rig.events().is_empty());
        assert!(
            !rig.script
                .calls()
                .iter()
                .any(|call| matches!(call, SessionCall::Seek { .. }))
        );
    }

    #[test]
    fn seek_clamps_to_the_known_duration() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Succeed {
            duration_ms: Some(10_000),
        });
        let mut rig = Rig::new(factory);
        rig.start(1, None, false);
        rig.events();

        rig.send(Command::SeekTo(50_000));
        rig.send(Command::SeekTo(2_500));
        let seeks: Vec<_> = rig
            .script
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Seek { position_ms, .. } => Some(position_ms),
                _ => None,
            })
            .collect();
        assert_eq!(seeks, vec![10_000, 2_500]);
        assert_eq!(rig.engine.current_position_ms(), Some(2_500));
        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert!(rig.events().is_empty());
    }

    #[test]
    fn permanent_focus_loss_stops_and_play_restarts_from_zero() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(2, Some(1), false);
        rig.send(Command::SeekTo(30_000));

        let video = rig.broker.client("video");
        video.request();
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Stopped);
        assert!(rig.resources.held().is_empty());
        assert_eq!(rig.engine.current_index(), Some(1));

        rig.send(Command::Play);
        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.script.created(), vec![location(1), location(1)]);
        assert_eq!(rig.engine.current_position_ms(), Some(0));
    }

    #[test]
    fn double_duck_lowers_volume_once_and_gain_restores_it_once() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);

        let notification = rig
            .broker
            .client("notification")
            .with_gain(FocusGain::TransientMayDuck);
        notification.request();
        rig.pump();
        notification.request();
        rig.pump();
        assert_eq!(rig.engine.focus_state(), FocusState::Ducked);
        assert_eq!(rig.engine.state(), EngineState::Playing);

        notification.abandon();
        rig.pump();
        rig.engine.handle(EngineInput::Focus(FocusChange::Gained));

        assert_eq!(rig.script.volumes(), vec![1.0, 0.2, 1.0]);
        assert_eq!(rig.engine.focus_state(), FocusState::Granted);
    }

    #[test]
    fn transient_loss_pauses_and_gain_resumes() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);
        rig.events();

        let call = rig.broker.client("call").with_gain(FocusGain::Transient);
        call.request();
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Paused);
        assert!(rig.resources.held().is_empty());

        call.abandon();
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Playing);
        let events = rig.events();
        assert_eq!(
            events,
            vec![
                EngineEvent::StateChanged(EngineState::Paused),
                EngineEvent::PausedChanged(true),
                EngineEvent::StateChanged(EngineState::Playing),
                EngineEvent::PausedChanged(false),
            ]
        );
    }

    #[test]
    fn user_pause_after_transient_loss_cancels_auto_resume() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);

        let call = rig.broker.client("call").with_gain(FocusGain::Transient);
        call.request();
        rig.pump();
        rig.send(Command::Pause);
        call.abandon();
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Paused);
    }

    #[test]
    fn gained_while_playing_at_full_volume_is_a_no_op() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);
        rig.events();
        let before = rig.script.calls().len();

        rig.engine.handle(EngineInput::Focus(FocusChange::Gained));
        assert!(rig.events().is_empty());
        assert_eq!(rig.script.calls().len(), before);
    }

    #[test]
    fn loss_sent_before_a_fresh_request_is_ignored() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);

        let video = rig.broker.client("video");
        video.request();
        rig.engine.handle(Command::Pause.into());
        rig.engine.handle(Command::Play.into());
        assert_eq!(rig.engine.state(), EngineState::Playing);

        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.engine.focus_state(), FocusState::Granted);
        assert_eq!(rig.broker.holder_count(), 1);
        assert!(rig.resources.is_held(ResourceKind::Wake));
    }

    #[test]
    fn duck_sent_before_a_fresh_request_is_ignored() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);

        let notification = rig
            .broker
            .client("notification")
            .with_gain(FocusGain::TransientMayDuck);
        notification.request();
        rig.engine.handle(Command::Pause.into());
        rig.engine.handle(Command::Play.into());
        rig.pump();

        assert_eq!(rig.engine.focus_state(), FocusState::Granted);
        assert_eq!(rig.script.volumes(), vec![1.0, 1.0]);
    }

    #[test]
    fn lost_hands_back_a_request_still_held() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);
        assert_eq!(rig.broker.holder_count(), 1);

        rig.engine.handle(EngineInput::Focus(FocusChange::Lost));
        assert_eq!(rig.engine.state(), EngineState::Stopped);
        assert_eq!(rig.engine.focus_state(), FocusState::None);
        assert_eq!(rig.broker.holder_count(), 0);
        assert!(rig.resources.held().is_empty());
    }

    #[test]
    fn transient_loss_while_preparing_resumes_when_the_call_ends() {
        let factory =
            ScriptedSessionFactory::new().with_outcome(location(1), PrepareOutcome::Hold);
        let mut rig = Rig::new(factory);
        rig.start(2, None, false);
        rig.send(Command::Next);
        assert_eq!(rig.engine.state(), EngineState::Preparing);

        let call = rig.broker.client("call").with_gain(FocusGain::Transient);
        call.request();
        rig.pump();
        rig.script.release_held(Some(90_000));
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Paused);
        assert!(rig.resources.held().is_empty());

        call.abandon();
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.engine.current_index(), Some(1));
        assert_eq!(rig.broker.holder_count(), 1);
        assert!(rig.resources.is_held(ResourceKind::Wake));
    }

    #[test]
    fn buffering_is_forwarded_only_for_the_live_session() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Hold);
        let mut rig = Rig::new(factory);
        rig.start(2, None, false);
        rig.events();

        let first = rig.script.latest_generation().expect("session created");
        let reporter = rig.script.reporter(first).expect("reporter");
        reporter.buffering(40);
        reporter.buffering(250);
        rig.pump();
        assert_eq!(
            rig.events(),
            vec![EngineEvent::Buffering(40), EngineEvent::Buffering(100)]
        );

        rig.send(Command::Next);
        rig.events();
        reporter.buffering(80);
        rig.pump();
        assert!(rig.events().is_empty());
    }

    #[test]
    fn pause_releases_focus_and_resources_and_play_reacquires() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);

        rig.send(Command::Pause);
        assert_eq!(rig.engine.state(), EngineState::Paused);
        assert_eq!(rig.broker.holder_count(), 0);
        assert!(rig.resources.held().is_empty());

        rig.send(Command::Play);
        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.broker.holder_count(), 1);
        assert!(rig.resources.is_held(ResourceKind::Wake));
    }

    #[test]
    fn streams_also_hold_the_network_lock() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        let stream = PlaybackItem::new(SourceDescriptor::stream("https://radio.example/live"), "radio");
        rig.send(Command::Start(StartRequest::new(vec![stream])));
        assert!(rig.resources.is_held(ResourceKind::Network));

        rig.send(Command::Stop);
        assert!(rig.resources.held().is_empty());
    }

    #[test]
    fn focus_denial_stays_paused_by_default() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.broker.set_locked(true);
        rig.start(1, None, false);

        assert_eq!(rig.engine.state(), EngineState::Paused);
        let events = rig.events();
        assert_eq!(count(&events, &EngineEvent::FocusDenied), 1);
        assert!(
            !rig.script
                .calls()
                .iter()
                .any(|call| matches!(call, SessionCall::Play { .. }))
        );
    }

    #[test]
    fn focus_denial_can_play_muted() {
        let config = EngineConfig {
            focus_denied: FocusDeniedPolicy::PlayMuted,
            ..EngineConfig::default()
        };
        let mut rig = Rig::with_config(ScriptedSessionFactory::new(), config);
        rig.broker.set_locked(true);
        rig.start(1, None, false);

        assert_eq!(rig.engine.state(), EngineState::Playing);
        assert_eq!(rig.script.volumes(), vec![0.0]);
        assert_eq!(count(&rig.events(), &EngineEvent::FocusDenied), 1);
    }

    #[test]
    fn pause_while_preparing_lands_in_paused() {
        let factory = ScriptedSessionFactory::new().with_default(PrepareOutcome::Hold);
        let mut rig = Rig::new(factory);
        rig.start(1, None, false);
        rig.send(Command::Pause);

        rig.script.release_held(Some(3_000));
        rig.pump();
        assert_eq!(rig.engine.state(), EngineState::Paused);
        assert_eq!(rig.broker.holder_count(), 0);
        assert!(rig.resources.held().is_empty());
    }

    #[test]
    fn route_change_pauses_only_while_playing() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.engine.handle(EngineInput::RouteChanged);
        assert_eq!(rig.engine.state(), EngineState::Idle);

        rig.start(1, None, false);
        rig.engine.handle(EngineInput::RouteChanged);
        assert_eq!(rig.engine.state(), EngineState::Paused);
    }

    #[test]
    fn empty_start_ends_immediately() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.send(Command::Start(StartRequest::new(Vec::new())));
        assert_eq!(rig.engine.state(), EngineState::Ended);
        assert_eq!(count(&rig.events(), &EngineEvent::Ended), 1);
        assert!(rig.script.created().is_empty());
    }

    #[test]
    fn mode_flags_emit_only_on_change() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(3, None, false);
        rig.events();

        rig.send(Command::SetShuffle(true));
        rig.send(Command::SetShuffle(true));
        rig.send(Command::SetRepeat(false));
        rig.send(Command::SetRepeat(true));
        assert_eq!(
            rig.events(),
            vec![
                EngineEvent::ShuffleChanged(true),
                EngineEvent::RepeatChanged(true)
            ]
        );
    }

    #[test]
    fn volume_is_scaled_while_ducked() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(1, None, false);
        rig.engine
            .handle(EngineInput::Focus(FocusChange::LostTransientDuck));
        rig.send(Command::SetVolume(2.0));
        rig.engine.handle(EngineInput::Focus(FocusChange::Gained));

        assert_eq!(rig.script.volumes(), vec![1.0, 0.2, 0.4, 2.0]);
        assert!(rig.events().contains(&EngineEvent::VolumeChanged(2.0)));
    }

    #[test]
    fn only_one_session_is_ever_alive() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(4, None, true);
        for _ in 0..10 {
            rig.send(Command::Next);
        }
        rig.send(Command::Previous);
        rig.send(Command::JumpTo(3));
        assert_eq!(rig.script.peak_live_sessions(), 1);
        assert_eq!(rig.script.live_sessions(), 1);
    }

    #[test]
    fn dropping_the_engine_releases_everything() {
        let rig = Rig::new(ScriptedSessionFactory::new());
        let Rig {
            mut engine,
            inputs,
            script,
            resources,
            broker,
            ..
        } = rig;
        engine.handle(Command::Start(StartRequest::new(items(2))).into());
        while let Ok(input) = inputs.try_recv() {
            engine.handle(input);
        }
        assert_eq!(engine.state(), EngineState::Playing);

        drop(engine);
        assert!(resources.held().is_empty());
        assert_eq!(broker.holder_count(), 0);
        assert_eq!(script.live_sessions(), 0);
    }

    #[test]
    fn snapshot_reflects_queries() {
        let mut rig = Rig::new(ScriptedSessionFactory::new());
        rig.start(3, Some(2), true);
        let snapshot = rig.engine.snapshot();
        assert_eq!(snapshot.state, EngineState::Playing);
        assert_eq!(snapshot.current_index, Some(2));
        assert_eq!(snapshot.duration_ms, Some(180_000));
        assert_eq!(snapshot.queue_len, 3);
        assert!(snapshot.repeat);
        assert!(snapshot.playing);
    }
}
