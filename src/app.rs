use crate::audio::{NullSessionFactory, RodioSessionFactory, SessionFactory};
use crate::config::Settings;
use crate::engine::{Collaborators, EngineSnapshot};
use crate::events::EngineEvent;
use crate::focus::{BrokerClient, FocusBroker, FocusGain, FocusRequest};
use crate::input::StartRequest;
use crate::library;
use crate::player::Player;
use crate::resources::LoggingResourceLock;
use crate::route::{CpalOutputProbe, RouteWatcher};
use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use tracing::warn;

const HELP: &str = "Commands: play | pause | stop | next | prev | jump <n> | seek <seconds> | \
shuffle <on|off> | repeat <on|off> | volume <percent> | open <path> | status | \
call | hangup | notify | dismiss | help | quit";

#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub sources: Vec<String>,
    pub shuffle: Option<bool>,
    pub repeat: Option<bool>,
    pub start: Option<usize>,
    pub null_audio: bool,
    pub device: Option<String>,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue(String),
    Quit,
}

pub struct Controls {
    broker: FocusBroker,
    call: BrokerClient,
    notification: BrokerClient,
    shuffle: bool,
    repeat: bool,
}

impl Controls {
    pub fn new(broker: FocusBroker, shuffle: bool, repeat: bool) -> Self {
        Self {
            call: broker.client("phone call").with_gain(FocusGain::Transient),
            notification: broker
                .client("notification")
                .with_gain(FocusGain::TransientMayDuck),
            broker,
            shuffle,
            repeat,
        }
    }
}

pub fn run(options: AppOptions) -> Result<()> {
    let settings = options.settings.clone();
    let broker = FocusBroker::new();
    let engine_focus = broker.client("encore");

    let null_audio = options.null_audio;
    let device = options.device.clone().or(settings.output_device.clone());
    let poll = settings.completion_poll();
    let (player, events) = Player::spawn(settings.engine_config(), move || {
        let sessions: Box<dyn SessionFactory> = if null_audio {
            Box::new(NullSessionFactory::new(poll))
        } else {
            match RodioSessionFactory::open(device.as_deref(), poll) {
                Ok(factory) => Box::new(factory),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "falling back to null audio output");
                    Box::new(NullSessionFactory::new(poll))
                }
            }
        };
        Ok(Collaborators {
            sessions,
            focus: Box::new(engine_focus),
            resources: Arc::new(LoggingResourceLock),
        })
    })?;

    thread::Builder::new()
        .name("encore-events".to_string())
        .spawn(move || {
            for batch in events {
                for line in batch.iter().filter_map(describe_event) {
                    println!("{line}");
                }
            }
        })?;

    let _route_watcher = if options.null_audio {
        None
    } else {
        RouteWatcher::spawn(CpalOutputProbe, settings.route_poll(), player.route_notifier())
            .map_err(|err| warn!(error = %format!("{err:#}"), "route changes will not be noticed"))
            .ok()
    };

    let mut controls = Controls::new(
        broker,
        options.shuffle.unwrap_or(settings.shuffle),
        options.repeat.unwrap_or(settings.repeat),
    );

    if !options.sources.is_empty() {
        let status = open_sources(&player, &controls, &options.sources, options.start);
        println!("{status}");
    }

    println!("{HELP}");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        match run_command(&player, &mut controls, &line) {
            CommandOutcome::Quit => break,
            CommandOutcome::Continue(status) => {
                if !status.is_empty() {
                    println!("{status}");
                }
            }
        }
        print!("> ");
        stdout.flush()?;
    }

    player.shutdown();
    Ok(())
}

fn open_sources(
    player: &Player,
    controls: &Controls,
    sources: &[String],
    start: Option<usize>,
) -> String {
    let items = library::load_all(sources);
    let count = items.len();
    let mut request = StartRequest::new(items)
        .shuffled(controls.shuffle)
        .repeating(controls.repeat);
    request.start_index = start;
    match player.start(request) {
        Ok(()) => format!("Queued {count} items"),
        Err(err) => format!("playback error: {err}"),
    }
}

pub fn run_command(player: &Player, controls: &mut Controls, raw: &str) -> CommandOutcome {
    let input = raw.trim();
    if input.is_empty() {
        return CommandOutcome::Continue(String::new());
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    let sent = match command {
        "quit" | "exit" => return CommandOutcome::Quit,
        "help" => return CommandOutcome::Continue(HELP.to_string()),
        "status" => {
            return CommandOutcome::Continue(match player.snapshot() {
                Ok(snapshot) => describe_snapshot(&snapshot),
                Err(err) => format!("playback error: {err}"),
            });
        }
        "play" | "resume" => player.play(),
        "pause" => player.pause(),
        "stop" => player.stop(),
        "next" => player.next(),
        "prev" | "previous" => player.previous(),
        "jump" => match rest.parse::<usize>() {
            Ok(number) if number > 0 => player.jump_to(number - 1),
            _ => return usage("jump <n>  (1-based)"),
        },
        "seek" => match rest.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => {
                player.seek_to((seconds * 1_000.0).round() as u64)
            }
            _ => return usage("seek <seconds>"),
        },
        "shuffle" => match parse_switch(rest) {
            Some(shuffle) => {
                controls.shuffle = shuffle;
                player.set_shuffle(shuffle)
            }
            None => return usage("shuffle <on|off>"),
        },
        "repeat" => match parse_switch(rest) {
            Some(repeat) => {
                controls.repeat = repeat;
                player.set_repeat(repeat)
            }
            None => return usage("repeat <on|off>"),
        },
        "volume" => match rest.trim_end_matches('%').parse::<f32>() {
            Ok(percent) if percent.is_finite() => player.set_volume(percent / 100.0),
            _ => return usage("volume <percent>"),
        },
        "open" => {
            if rest.is_empty() {
                return usage("open <path>");
            }
            return CommandOutcome::Continue(open_sources(
                player,
                controls,
                &[rest.to_string()],
                None,
            ));
        }
        "call" => {
            let answered = controls.call.request();
            controls.broker.set_locked(true);
            return CommandOutcome::Continue(match answered {
                FocusRequest::Granted => String::from("Incoming call"),
                FocusRequest::Denied => String::from("Already on a call"),
            });
        }
        "hangup" => {
            controls.broker.set_locked(false);
            controls.call.abandon();
            return CommandOutcome::Continue(String::from("Call ended"));
        }
        "notify" => {
            controls.notification.request();
            return CommandOutcome::Continue(String::from("Notification playing"));
        }
        "dismiss" => {
            controls.notification.abandon();
            return CommandOutcome::Continue(String::from("Notification dismissed"));
        }
        _ => return CommandOutcome::Continue(String::from("Unknown command. Use help")),
    };

    match sent {
        Ok(()) => CommandOutcome::Continue(String::new()),
        Err(err) => CommandOutcome::Continue(format!("playback error: {err}")),
    }
}

fn usage(text: &str) -> CommandOutcome {
    CommandOutcome::Continue(format!("Usage: {text}"))
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

pub fn describe_snapshot(snapshot: &EngineSnapshot) -> String {
    let item = match (&snapshot.current_item, snapshot.current_index) {
        (Some(item), Some(index)) => {
            format!("#{} {} of {}", index + 1, item.display_name(), snapshot.queue_len)
        }
        _ => String::from("nothing selected"),
    };
    let position = format_time(snapshot.position_ms);
    let duration = format_time(snapshot.duration_ms);
    format!(
        "[{}] {item} {position}/{duration} | shuffle {} | repeat {} | volume {:.0}% | focus {:?} | {}",
        snapshot.state,
        on_off(snapshot.shuffle),
        on_off(snapshot.repeat),
        snapshot.volume * 100.0,
        snapshot.focus,
        snapshot.output,
    )
}

pub fn describe_event(event: &EngineEvent) -> Option<String> {
    let line = match event {
        EngineEvent::ItemChanged { item, index } => {
            format!("Now: #{} {}", index + 1, item.display_name())
        }
        EngineEvent::Prepared { duration_ms } => format!("Length {}", format_time(*duration_ms)),
        EngineEvent::PausedChanged(true) => String::from("Paused"),
        EngineEvent::PausedChanged(false) => String::from("Playing"),
        EngineEvent::ShuffleChanged(shuffle) => format!("Shuffle {}", on_off(*shuffle)),
        EngineEvent::RepeatChanged(repeat) => format!("Repeat {}", on_off(*repeat)),
        EngineEvent::VolumeChanged(volume) => format!("Volume {:.0}%", volume * 100.0),
        EngineEvent::Buffering(percent) => format!("Buffering {percent}%"),
        EngineEvent::FocusDenied => String::from("Audio output is busy"),
        EngineEvent::PrepareExhausted => String::from("Nothing in the queue could be played"),
        EngineEvent::Ended => String::from("Reached end of queue"),
        EngineEvent::StateChanged(_) => return None,
    };
    Some(line)
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn format_time(ms: Option<u64>) -> String {
    match ms {
        Some(ms) => {
            let seconds = ms / 1_000;
            format!("{}:{:02}", seconds / 60, seconds % 60)
        }
        None => String::from("--:--"),
    }
}
