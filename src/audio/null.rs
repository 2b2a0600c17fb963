use super::{RenderSession, SessionFactory, SessionReporter, local_path, spawn_completion_watcher};
use crate::error::PrepareError;
use crate::model::PlaybackItem;
use anyhow::Result;
use rodio::{Decoder, Source};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct NullSessionFactory {
    completion_poll: Duration,
}

impl NullSessionFactory {
    pub fn new(completion_poll: Duration) -> Self {
        Self { completion_poll }
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }
}

impl Default for NullSessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl SessionFactory for NullSessionFactory {
    fn create(
        &mut self,
        item: &PlaybackItem,
        reporter: SessionReporter,
    ) -> std::result::Result<Box<dyn RenderSession>, PrepareError> {
        let duration = local_path(&item.source)
            .ok()
            .and_then(|path| Self::estimate_duration(&path));

        let clock = Arc::new(Mutex::new(Clock {
            paused: true,
            started_at: None,
            offset: Duration::ZERO,
            duration,
        }));
        let alive = Arc::new(AtomicBool::new(true));

        reporter.prepared(duration);
        if duration.is_some() {
            let watched = Arc::clone(&clock);
            if let Err(err) = spawn_completion_watcher(
                Arc::clone(&alive),
                self.completion_poll,
                reporter,
                move || lock(&watched).is_finished(),
            ) {
                warn!(error = %err, "completion watcher did not start");
            }
        }

        Ok(Box::new(NullSession { clock, alive }))
    }

    fn output_name(&self) -> String {
        "Null audio output".to_string()
    }
}

#[derive(Debug)]
struct Clock {
    paused: bool,
    started_at: Option<Instant>,
    offset: Duration,
    duration: Option<Duration>,
}

impl Clock {
    fn position(&self) -> Duration {
        let mut position = self.offset;
        if !self.paused
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn is_finished(&self) -> bool {
        self.duration
            .is_some_and(|duration| !self.paused && self.position() >= duration)
    }
}

fn lock(clock: &Mutex<Clock>) -> MutexGuard<'_, Clock> {
    clock.lock().unwrap_or_else(PoisonError::into_inner)
}

struct NullSession {
    clock: Arc<Mutex<Clock>>,
    alive: Arc<AtomicBool>,
}

impl RenderSession for NullSession {
    fn play(&mut self) {
        let mut clock = lock(&self.clock);
        if clock.paused {
            clock.started_at = Some(Instant::now());
            clock.paused = false;
        }
    }

    fn pause(&mut self) {
        let mut clock = lock(&self.clock);
        clock.offset = clock.position();
        clock.started_at = None;
        clock.paused = true;
    }

    fn stop(&mut self) {
        self.alive.store(false, Ordering::Release);
        let mut clock = lock(&self.clock);
        clock.paused = true;
        clock.started_at = None;
        clock.offset = Duration::ZERO;
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        let mut clock = lock(&self.clock);
        clock.offset = clock
            .duration
            .map_or(position, |duration| position.min(duration));
        clock.started_at = if clock.paused {
            None
        } else {
            Some(Instant::now())
        };
        Ok(())
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn position(&self) -> Option<Duration> {
        Some(lock(&self.clock).position())
    }
}

impl Drop for NullSession {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures::write_test_wav;
    use crate::input::{EngineInput, SessionEvent};
    use crate::model::SourceDescriptor;
    use std::sync::mpsc;
    use std::thread;

    fn item(path: &Path) -> PlaybackItem {
        PlaybackItem::new(SourceDescriptor::local(path), "fixture")
    }

    #[test]
    fn position_advances_only_while_playing() {
        let (tx, _rx) = mpsc::channel();
        let mut factory = NullSessionFactory::default();
        let mut session = factory
            .create(&item(Path::new("missing.flac")), SessionReporter::new(1, tx))
            .expect("null sessions always open");

        let parked = session.position().expect("position");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(session.position(), Some(parked), "new sessions start paused");

        session.play();
        thread::sleep(Duration::from_millis(20));
        let played = session.position().expect("position");
        assert!(played > parked);

        session.pause();
        let frozen = session.position().expect("position");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(session.position(), Some(frozen));
    }

    #[test]
    fn seek_moves_the_clock() {
        let (tx, _rx) = mpsc::channel();
        let mut factory = NullSessionFactory::default();
        let mut session = factory
            .create(&item(Path::new("missing.flac")), SessionReporter::new(1, tx))
            .expect("null sessions always open");
        session
            .seek_to(Duration::from_secs(12))
            .expect("seek should succeed");
        assert!(session.position().expect("position") >= Duration::from_secs(12));
    }

    #[test]
    fn known_duration_reports_completion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let track = dir.path().join("fixture.wav");
        write_test_wav(&track, 60);

        let (tx, rx) = mpsc::channel();
        let mut factory = NullSessionFactory::new(Duration::from_millis(10));
        let mut session = factory
            .create(&item(&track), SessionReporter::new(4, tx))
            .expect("null sessions always open");

        let Ok(EngineInput::Session {
            generation: 4,
            event: SessionEvent::Prepared { duration: Some(duration) },
        }) = rx.recv_timeout(Duration::from_secs(1))
        else {
            panic!("expected a prepared report with a duration");
        };
        assert!(duration >= Duration::from_millis(50));

        session.play();
        let completed = rx.recv_timeout(Duration::from_secs(2));
        assert!(matches!(
            completed,
            Ok(EngineInput::Session {
                generation: 4,
                event: SessionEvent::Completed
            })
        ));
    }

    #[test]
    fn stopped_sessions_never_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let track = dir.path().join("fixture.wav");
        write_test_wav(&track, 30);

        let (tx, rx) = mpsc::channel();
        let mut factory = NullSessionFactory::new(Duration::from_millis(5));
        let mut session = factory
            .create(&item(&track), SessionReporter::new(2, tx))
            .expect("null sessions always open");
        let _prepared = rx.recv_timeout(Duration::from_secs(1));

        session.play();
        session.stop();
        thread::sleep(Duration::from_millis(80));
        assert!(rx.try_recv().is_err());
    }
}
