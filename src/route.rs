use crate::audio;
use anyhow::{Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

pub trait OutputProbe: Send + 'static {
    fn current_output(&mut self) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct CpalOutputProbe;

impl OutputProbe for CpalOutputProbe {
    fn current_output(&mut self) -> Option<String> {
        audio::default_output_name()
    }
}

pub struct RouteWatcher {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RouteWatcher {
    pub fn spawn<P, F>(mut probe: P, interval: Duration, on_change: F) -> Result<Self>
    where
        P: OutputProbe,
        F: Fn() + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name("encore-route".to_string())
            .spawn(move || {
                let mut last = probe.current_output();
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let current = probe.current_output();
                    if current != last {
                        info!(from = ?last, to = ?current, "output route changed");
                        last = current;
                        on_change();
                    }
                }
            })
            .context("failed to start route watcher")?;

        Ok(Self {
            stop: Some(stop),
            worker: Some(worker),
        })
    }
}

impl Drop for RouteWatcher {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
