use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use cdg_player_core::{
    encode_png, run_for, AppConfig, CdgError, ManualTime, MonotonicTime, Renderer, Scheduler, Track,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> cdg_player_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Inspect { input, json } => run_inspect(&input, json),
        Commands::Render {
            input,
            at,
            output,
            scale,
        } => run_render(&config, &input, at, &output, scale),
        Commands::Play { input, seconds } => run_play(&config, &input, seconds),
    }
}

fn run_inspect(input: &Path, json: bool) -> cdg_player_core::Result<()> {
    let track = Track::open(input)?;
    let parsed = track.parse();
    let histogram = parsed.opcode_histogram();

    if json {
        let report = serde_json::json!({
            "packets": parsed.instructions.len(),
            "audio": track.audio_entry(),
            "graphics": parsed.graphics_count(),
            "opcodes": histogram,
            "diagnostics": parsed.diagnostics,
        });
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| CdgError::msg(format!("failed to format report: {err}")))?;
        println!("{rendered}");
        return Ok(());
    }

    tracing::info!(
        packets = parsed.instructions.len(),
        graphics = parsed.graphics_count(),
        "inspected track"
    );
    for (opcode, count) in &histogram {
        tracing::info!(opcode, count, "opcode");
    }
    for diagnostic in &parsed.diagnostics {
        tracing::warn!(?diagnostic, "stream diagnostic");
    }
    Ok(())
}

fn run_render(
    config: &AppConfig,
    input: &Path,
    at: f64,
    output: &Path,
    scale: Option<u32>,
) -> cdg_player_core::Result<()> {
    let track = Track::open(input)?;
    let mut scheduler = Scheduler::new(
        config.player.clone(),
        Renderer::headless(),
        Box::new(ManualTime::new()),
    );
    scheduler.load_parsed(track.parse());
    scheduler.play();
    scheduler.sync(at);
    let outcome = scheduler.pump();
    tracing::info!(
        position_ms = outcome.position_ms,
        executed = outcome.executed,
        "rendered position"
    );

    let scale = scale.unwrap_or(config.render.scale);
    let png = encode_png(scheduler.image(), scale)?;
    std::fs::write(output, png)?;
    tracing::info!(?output, scale, "wrote frame");
    Ok(())
}

fn run_play(config: &AppConfig, input: &Path, seconds: Option<f64>) -> cdg_player_core::Result<()> {
    let track = Track::open(input)?;
    let duration_ms = seconds
        .map(|s| s * 1000.0)
        .unwrap_or_else(|| track.duration_ms(config.player.packet_rate()));

    let mut scheduler = Scheduler::new(
        config.player.clone(),
        Renderer::headless(),
        Box::new(MonotonicTime::new()),
    );
    scheduler.load_parsed(track.parse());
    scheduler.play();
    tracing::info!(duration_ms, "starting headless playback");

    let mut elapsed_ms = 0.0;
    while elapsed_ms < duration_ms {
        let slice = (duration_ms - elapsed_ms).min(1000.0);
        let summary = run_for(&mut scheduler, Duration::from_secs_f64(slice / 1000.0));
        elapsed_ms += slice;
        tracing::info!(
            position_ms = scheduler.position_ms(),
            pc = ?scheduler.pc(),
            ticks = summary.ticks,
            renders = summary.renders,
            "playback progress"
        );
    }

    scheduler.stop();
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "CD+Graphics karaoke decoder", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarise the packets of a graphics track.
    Inspect {
        /// Path to the `.cdg` file or karaoke `.zip`.
        input: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Render the frame shown at a playback position to a PNG.
    Render {
        /// Path to the `.cdg` file or karaoke `.zip`.
        input: PathBuf,
        /// Playback position in milliseconds.
        #[arg(long)]
        at: f64,
        /// Output PNG path.
        #[arg(short, long)]
        output: PathBuf,
        /// Integer upscaling factor; overrides the configuration.
        #[arg(long)]
        scale: Option<u32>,
    },
    /// Play a track in real time without a display.
    Play {
        /// Path to the `.cdg` file or karaoke `.zip`.
        input: PathBuf,
        /// Stop after this many seconds instead of the track length.
        #[arg(long)]
        seconds: Option<f64>,
    },
}
