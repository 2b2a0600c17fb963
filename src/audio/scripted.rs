use super::{RenderSession, SessionFactory, SessionReporter};
use crate::error::PrepareError;
use crate::model::PlaybackItem;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Succeed { duration_ms: Option<u64> },
    Fail,
    Reject,
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Created { generation: u64, location: String },
    Play { generation: u64 },
    Pause { generation: u64 },
    Stop { generation: u64 },
    Seek { generation: u64, position_ms: u64 },
    Volume { generation: u64, volume: f32 },
}

impl SessionCall {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Created { generation, .. }
            | Self::Play { generation }
            | Self::Pause { generation }
            | Self::Stop { generation }
            | Self::Seek { generation, .. }
            | Self::Volume { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<SessionCall>,
    reporters: Vec<SessionReporter>,
    held: Vec<SessionReporter>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
    live: Arc<AtomicUsize>,
    peak_live: Arc<AtomicUsize>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: SessionCall) {
        self.lock().calls.push(call);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.lock().calls.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SessionCall::Created { location, .. } => Some(location.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SessionCall::Volume { volume, .. } => Some(*volume),
                _ => None,
            })
            .collect()
    }

    pub fn latest_generation(&self) -> Option<u64> {
        self.lock().reporters.last().map(SessionReporter::generation)
    }

    pub fn reporter(&self, generation: u64) -> Option<SessionReporter> {
        self.lock()
            .reporters
            .iter()
            .find(|reporter| reporter.generation() == generation)
            .cloned()
    }

    pub fn finish_latest(&self) {
        if let Some(reporter) = self.lock().reporters.last() {
            reporter.completed();
        }
    }

    pub fn release_held(&self, duration_ms: Option<u64>) {
        let held = std::mem::take(&mut self.lock().held);
        for reporter in held {
            reporter.prepared(duration_ms.map(Duration::from_millis));
        }
    }

    pub fn fail_held(&self, message: &str) {
        let held = std::mem::take(&mut self.lock().held);
        for reporter in held {
            reporter.failed(PrepareError::Scripted(message.to_string()));
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak_live_sessions(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedSessionFactory {
    outcomes: HashMap<String, PrepareOutcome>,
    fallback: Option<PrepareOutcome>,
    handle: ScriptHandle,
}

impl ScriptedSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, location: impl Into<String>, outcome: PrepareOutcome) -> Self {
        self.outcomes.insert(location.into(), outcome);
        self
    }

    pub fn with_default(mut self, outcome: PrepareOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    fn outcome_for(&self, location: &str) -> PrepareOutcome {
        self.outcomes
            .get(location)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or(PrepareOutcome::Succeed {
                duration_ms: Some(180_000),
            })
    }
}

impl SessionFactory for ScriptedSessionFactory {
    fn create(
        &mut self,
        item: &PlaybackItem,
        reporter: SessionReporter,
    ) -> std::result::Result<Box<dyn RenderSession>, PrepareError> {
        let location = item.source.location.clone();
        let outcome = self.outcome_for(&location);
        if outcome == PrepareOutcome::Reject {
            return Err(PrepareError::UnsupportedSource { location });
        }

        let generation = reporter.generation();
        {
            let mut script = self.handle.lock();
            script.calls.push(SessionCall::Created {
                generation,
                location: location.clone(),
            });
            script.reporters.push(reporter.clone());
            if outcome == PrepareOutcome::Hold {
                script.held.push(reporter.clone());
            }
        }

        let live = self.handle.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.handle.peak_live.fetch_max(live, Ordering::SeqCst);

        match outcome {
            PrepareOutcome::Succeed { duration_ms } => {
                reporter.prepared(duration_ms.map(Duration::from_millis));
            }
            PrepareOutcome::Fail => {
                reporter.failed(PrepareError::Scripted(format!("cannot decode {location}")));
            }
            PrepareOutcome::Hold | PrepareOutcome::Reject => {}
        }

        Ok(Box::new(ScriptedSession {
            generation,
            position: Duration::ZERO,
            handle: self.handle.clone(),
        }))
    }

    fn output_name(&self) -> String {
        "Scripted output".to_string()
    }
}

struct ScriptedSession {
    generation: u64,
    position: Duration,
    handle: ScriptHandle,
}

impl RenderSession for ScriptedSession {
    fn play(&mut self) {
        self.handle.record(SessionCall::Play {
            generation: self.generation,
        });
    }

    fn pause(&mut self) {
        self.handle.record(SessionCall::Pause {
            generation: self.generation,
        });
    }

    fn stop(&mut self) {
        self.handle.record(SessionCall::Stop {
            generation: self.generation,
        });
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        self.position = position;
        self.handle.record(SessionCall::Seek {
            generation: self.generation,
            position_ms: u64::try_from(position.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.handle.record(SessionCall::Volume {
            generation: self.generation,
            volume,
        });
    }

    fn position(&self) -> Option<Duration> {
        Some(self.position)
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.handle.live.fetch_sub(1, Ordering::SeqCst);
    }
}
