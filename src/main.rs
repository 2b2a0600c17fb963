use anyhow::Context;
use clap::Parser;
use encore::app::{self, AppOptions};
use encore::config;

#[derive(Parser, Debug)]
#[command(name = "encore")]
#[command(about = "Queue-driven audio player with shuffle, repeat and focus handling")]
#[command(version)]
struct Args {
    /// Folders, playlists (.m3u/.m3u8) or audio files to queue
    sources: Vec<String>,

    /// Start with shuffle on
    #[arg(long, conflicts_with = "no_shuffle")]
    shuffle: bool,

    #[arg(long)]
    no_shuffle: bool,

    /// Wrap around at the end of the queue
    #[arg(long, conflicts_with = "no_repeat")]
    repeat: bool,

    #[arg(long)]
    no_repeat: bool,

    /// 1-based queue position to start from
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    start: Option<u64>,

    /// Run without an audio device; items advance on a clock
    #[arg(long, env = "ENCORE_NULL_AUDIO")]
    null_audio: bool,

    /// Output device name (see --list-devices)
    #[arg(long, env = "ENCORE_DEVICE")]
    device: Option<String>,

    /// Print output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn flag(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn queue_start(start: Option<u64>) -> anyhow::Result<Option<usize>> {
    start
        .map(|start| usize::try_from(start.saturating_sub(1)))
        .transpose()
        .context("--start is beyond the largest possible queue")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for name in encore::audio::available_outputs() {
            println!("{name}");
        }
        return Ok(());
    }

    let start = queue_start(args.start)?;
    let settings = config::load_settings()?;
    encore::logging::init(&settings.log_filter)?;

    app::run(AppOptions {
        sources: args.sources,
        shuffle: flag(args.shuffle, args.no_shuffle),
        repeat: flag(args.repeat, args.no_repeat),
        start,
        null_audio: args.null_audio,
        device: args.device,
        settings,
    })
}
