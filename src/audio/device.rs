use super::{
    MAX_VOLUME, RenderSession, SessionFactory, SessionReporter, local_path,
    spawn_completion_watcher, with_silenced_stderr,
};
use crate::error::PrepareError;
use crate::model::PlaybackItem;
use anyhow::{Context, Result};
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RodioSessionFactory {
    stream: OutputStream,
    device: Option<String>,
    completion_poll: Duration,
}

impl RodioSessionFactory {
    pub fn open(device: Option<&str>, completion_poll: Duration) -> Result<Self> {
        let mut stream = with_silenced_stderr(|| open_output_stream(device))?;
        stream.log_on_drop(false);
        Ok(Self {
            stream,
            device: device.map(ToOwned::to_owned),
            completion_poll,
        })
    }
}

impl SessionFactory for RodioSessionFactory {
    fn create(
        &mut self,
        item: &PlaybackItem,
        reporter: SessionReporter,
    ) -> std::result::Result<Box<dyn RenderSession>, PrepareError> {
        let path = local_path(&item.source)?;
        let location = item.source.location.clone();

        let sink = Arc::new(Sink::connect_new(self.stream.mixer()));
        sink.pause();
        let alive = Arc::new(AtomicBool::new(true));

        let decode_sink = Arc::clone(&sink);
        let decode_alive = Arc::clone(&alive);
        let poll = self.completion_poll;
        thread::Builder::new()
            .name(format!("encore-prepare-{}", reporter.generation()))
            .spawn(move || {
                let file = match File::open(&path) {
                    Ok(file) => file,
                    Err(err) => return reporter.failed(PrepareError::open(&location, err)),
                };
                let source = match Decoder::try_from(file) {
                    Ok(source) => source,
                    Err(err) => return reporter.failed(PrepareError::decode(&location, err)),
                };
                let duration = source
                    .total_duration()
                    .filter(|duration| !duration.is_zero());

                if !decode_alive.load(Ordering::Acquire) {
                    return;
                }
                decode_sink.append(source);
                reporter.prepared(duration);

                let watched = Arc::clone(&decode_sink);
                if let Err(err) =
                    spawn_completion_watcher(decode_alive, poll, reporter, move || watched.empty())
                {
                    warn!(error = %err, "completion watcher did not start");
                }
            })
            .map_err(|err| PrepareError::Output(err.to_string()))?;

        Ok(Box::new(RodioSession { sink, alive }))
    }

    fn output_name(&self) -> String {
        self.device
            .clone()
            .unwrap_or_else(|| "System default output (CPAL)".to_string())
    }
}

struct RodioSession {
    sink: Arc<Sink>,
    alive: Arc<AtomicBool>,
}

impl RenderSession for RodioSession {
    fn play(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn stop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.sink.stop();
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        self.sink
            .try_seek(position)
            .map_err(|err| anyhow::anyhow!("failed to seek current item: {err:?}"))
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, MAX_VOLUME));
    }

    fn position(&self) -> Option<Duration> {
        Some(self.sink.get_pos())
    }
}

impl Drop for RodioSession {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn available_outputs() -> Vec<String> {
    let mut outputs: Vec<String> = with_silenced_stderr(|| {
        rodio::cpal::default_host()
            .output_devices()
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|device| device.name().ok())
            .collect()
    });
    outputs.sort_by_cached_key(|name| name.to_ascii_lowercase());
    outputs.dedup();
    outputs
}

pub fn default_output_name() -> Option<String> {
    with_silenced_stderr(|| {
        rodio::cpal::default_host()
            .default_output_device()
            .and_then(|device| device.name().ok())
    })
}

fn open_output_stream(device: Option<&str>) -> Result<OutputStream> {
    let host = rodio::cpal::default_host();

    if let Some(requested) = device {
        let device = host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|candidate| candidate.name().ok().as_deref() == Some(requested))
            .with_context(|| format!("audio output device not found: {requested}"))?;
        return OutputStreamBuilder::from_device(device)
            .context("failed to open selected output device")?
            .with_error_callback(|_| {})
            .open_stream_or_fallback()
            .context("failed to start selected output stream");
    }

    let default_err = match OutputStreamBuilder::from_default_device()
        .context("failed to open default system output stream")
        .and_then(|builder| {
            builder
                .with_error_callback(|_| {})
                .open_stream_or_fallback()
                .context("failed to start default output stream")
        }) {
        Ok(stream) => return Ok(stream),
        Err(err) => err,
    };

    debug!(error = %default_err, "default output failed, trying other devices");
    let mut candidates: Vec<_> = host
        .output_devices()
        .ok()
        .into_iter()
        .flatten()
        .filter_map(|device| device.name().ok().map(|name| (name, device)))
        .collect();
    candidates.sort_by_cached_key(|(name, _)| {
        let lower = name.to_ascii_lowercase();
        let rank = if lower.contains("pulse") {
            0_u8
        } else if lower.contains("pipewire") {
            1_u8
        } else if lower.contains("default") {
            2_u8
        } else {
            3_u8
        };
        (rank, lower)
    });

    candidates
        .into_iter()
        .find_map(|(_, device)| {
            OutputStreamBuilder::from_device(device)
                .ok()?
                .with_error_callback(|_| {})
                .open_stream_or_fallback()
                .ok()
        })
        .with_context(|| {
            format!("unable to start any audio output stream after default failed: {default_err:#}")
        })
}
