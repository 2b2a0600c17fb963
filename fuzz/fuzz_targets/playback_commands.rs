#![no_main]

use encore::audio::{PrepareOutcome, ScriptedSessionFactory};
use encore::engine::{Collaborators, EngineConfig, PlaybackEngine};
use encore::events;
use encore::focus::FocusBroker;
use encore::input::{Command, EngineInput, StartRequest};
use encore::model::{EngineState, PlaybackItem, SourceDescriptor};
use encore::resources::TrackingResourceLock;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::mpsc;

fuzz_target!(|data: &[u8]| {
    let Some((&first, rest)) = data.split_first() else {
        return;
    };
    let len = usize::from(first % 8);
    let items: Vec<PlaybackItem> = (0..len)
        .map(|idx| {
            PlaybackItem::new(
                SourceDescriptor::local(format!("/fuzz/{idx}.mp3")),
                format!("track {idx}"),
            )
        })
        .collect();

    let mut factory = ScriptedSessionFactory::new();
    for (idx, byte) in rest.iter().take(len).enumerate() {
        let outcome = match byte % 4 {
            0 => PrepareOutcome::Fail,
            1 => PrepareOutcome::Reject,
            2 => PrepareOutcome::Hold,
            _ => PrepareOutcome::Succeed {
                duration_ms: Some(u64::from(*byte) * 1_000),
            },
        };
        factory = factory.with_outcome(format!("/fuzz/{idx}.mp3"), outcome);
    }
    let script = factory.handle();

    let broker = FocusBroker::new();
    let rival = broker.client("rival");
    let resources = TrackingResourceLock::new();
    let (tx, inputs) = mpsc::channel();
    let (sink, _events) = events::channel();
    let mut engine = PlaybackEngine::new(
        EngineConfig {
            shuffle_seed: Some(u64::from(first)),
            ..EngineConfig::default()
        },
        Collaborators {
            sessions: Box::new(factory),
            focus: Box::new(broker.client("engine")),
            resources: Arc::new(resources.clone()),
        },
        tx,
        sink,
    );

    for byte in rest {
        let command = match byte % 16 {
            0 => Command::Start(
                StartRequest::new(items.clone())
                    .shuffled(byte & 0x10 != 0)
                    .repeating(byte & 0x20 != 0),
            ),
            1 => Command::Play,
            2 => Command::Pause,
            3 => Command::Stop,
            4 => Command::Next,
            5 => Command::Previous,
            6 => Command::JumpTo(usize::from(byte >> 4)),
            7 => Command::SeekTo(u64::from(*byte) * 500),
            8 => Command::SetShuffle(byte & 0x10 != 0),
            9 => Command::SetRepeat(byte & 0x10 != 0),
            10 => Command::SetVolume(f32::from(*byte) / 64.0),
            11 => {
                script.finish_latest();
                continue;
            }
            12 => {
                script.release_held(Some(1_000));
                continue;
            }
            13 => {
                script.fail_held("fuzz");
                continue;
            }
            14 => {
                rival.request();
                continue;
            }
            _ => {
                rival.abandon();
                continue;
            }
        };
        engine.handle(EngineInput::Command(command));
        while let Ok(input) = inputs.try_recv() {
            engine.handle(input);
        }

        assert!(script.peak_live_sessions() <= 1);
        if let Some(index) = engine.current_index() {
            assert!(index < len);
        }
        if !engine.state().has_session() {
            assert!(resources.held().is_empty());
        }
        if engine.state() == EngineState::Ended {
            assert!(engine.current_position_ms().is_none());
        }
    }
});
