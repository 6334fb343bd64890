//! livetrack CLI.
//!
//! # Usage
//!
//! ```bash
//! # Follow an event, printing the displayed frame once a second
//! lt watch 110853020184706765
//!
//! # Live-only, 5 s behind live, JSON lines
//! lt watch 110853020184706765 --no-backfill --lag-ms 5000 --json
//!
//! # Fetch one chunk at a given time
//! lt probe 110853020184706765 --at 2024-03-09T16:00:00Z
//!
//! # Show the effective configuration
//! lt config --config livetrack.toml
//! ```

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lt_core::frames::Timestamped;
use lt_core::logging::{self, LogFormat};
use lt_core::timestamp::{
    CHUNK_WIDTH_MS, display, live_starting_time, now_millis, parse_wire, round_down, to_wire,
};
use lt_core::{Chunk, EngineConfig, FeedSource, LiveStatsClient, TimelineEngine, TimelineView};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Follow a live event feed with backfill and paced playback.
#[derive(Parser, Debug)]
#[command(name = "lt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Default log filter (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info", env = "LT_LOG_LEVEL")]
    log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track an event and print the displayed frame until Ctrl-C.
    Watch(WatchArgs),
    /// Fetch a single chunk and summarise it.
    Probe(ProbeArgs),
    /// Print the effective configuration as TOML.
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// TOML configuration file.
    #[arg(long, env = "LT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the feed base URL.
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Event identifier.
    event_id: String,

    #[command(flatten)]
    config: ConfigArgs,

    /// Follow the live edge only; skip the history walk.
    #[arg(long, default_value_t = false)]
    no_backfill: bool,

    /// Desired distance behind live, in milliseconds.
    #[arg(long)]
    lag_ms: Option<i64>,

    /// Initial playback speed factor.
    #[arg(long)]
    speed: Option<f64>,

    /// How often to print the view, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    interval_ms: u64,

    /// Print full views as JSON lines.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Event identifier.
    event_id: String,

    #[command(flatten)]
    config: ConfigArgs,

    /// Starting time (RFC 3339); defaults to the live chunk.
    #[arg(long)]
    at: Option<String>,

    /// Print the summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn load_config(args: &ConfigArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(base_url) = &args.base_url {
        config.feed.base_url.clone_from(base_url);
    }
    Ok(config)
}

/// One-line human summary of a view.
fn summarize(view: &TimelineView) -> String {
    let Some(current) = view.current else {
        return format!("waiting for frames (backfill {:?})", view.backfill);
    };
    let state = view.window.as_ref().map_or("-", |w| w.game_state.as_str());
    let lag = view
        .lag_ms()
        .map_or_else(|| "-".to_string(), |lag| format!("{lag}ms"));
    let mode = if view.is_live { "live" } else { "scrub" };
    let mut line = format!(
        "{} {state} {mode} frames={} lag={lag} speed={:.2} queued={} backfill={:?}",
        display(current),
        view.timeline.len(),
        view.speed,
        view.queued,
        view.backfill,
    );
    if view.is_paused {
        line.push_str(" paused");
    }
    if view.is_final {
        line.push_str(" final");
    }
    line
}

async fn watch(args: WatchArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if args.no_backfill {
        config.backfill.enabled = false;
    }
    if let Some(lag_ms) = args.lag_ms {
        config.playback.desired_lag_ms = lag_ms;
    }
    config.validate().context("invalid configuration")?;
    if args.interval_ms == 0 {
        anyhow::bail!("--interval-ms must be > 0");
    }

    let client = LiveStatsClient::new(&config.feed).context("building feed client")?;
    let mut engine = TimelineEngine::new(Arc::new(client), config)?;
    engine.track(args.event_id.as_str())?;
    if let Some(speed) = args.speed {
        engine.set_speed(speed).await;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let view = engine.view().await;
                if args.json {
                    println!("{}", serde_json::to_string(&view)?);
                } else {
                    println!("{}", summarize(&view));
                }
            }
        }
    }

    engine.teardown();
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProbeSummary {
    starting_time: String,
    window_frames: usize,
    detail_frames: usize,
    first: Option<String>,
    last: Option<String>,
    game_state: Option<String>,
    patch_version: Option<String>,
}

impl ProbeSummary {
    fn new(starting_time: String, chunk: &Chunk) -> Self {
        let mut times: Vec<_> = chunk
            .window
            .iter()
            .filter_map(|r| r.time_point().ok())
            .chain(chunk.details.iter().filter_map(|r| r.time_point().ok()))
            .collect();
        times.sort_unstable();
        Self {
            starting_time,
            window_frames: chunk.window.len(),
            detail_frames: chunk.details.len(),
            first: times.first().map(|t| display(*t)),
            last: times.last().map(|t| display(*t)),
            game_state: chunk
                .window
                .iter()
                .filter_map(|r| r.time_point().ok().map(|t| (t, r)))
                .max_by_key(|(t, _)| *t)
                .map(|(_, r)| r.game_state.clone()),
            patch_version: chunk.metadata.as_ref().map(|m| m.patch_version.clone()),
        }
    }
}

fn probe_starting_time(at: Option<&str>, live_offset_ms: i64) -> Result<String> {
    let wire = match at {
        Some(at) => to_wire(round_down(parse_wire(at)?, CHUNK_WIDTH_MS))?,
        None => live_starting_time(now_millis(), live_offset_ms)?,
    };
    Ok(wire)
}

async fn probe(args: ProbeArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let starting_time = probe_starting_time(args.at.as_deref(), config.poll.live_offset_ms)?;
    let client = LiveStatsClient::new(&config.feed).context("building feed client")?;
    let chunk = client
        .fetch_chunk(&args.event_id, &starting_time)
        .await
        .with_context(|| format!("fetching chunk at {starting_time}"))?;

    let summary = ProbeSummary::new(starting_time, &chunk);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("startingTime   {}", summary.starting_time);
        println!("window frames  {}", summary.window_frames);
        println!("detail frames  {}", summary.detail_frames);
        println!("first          {}", summary.first.as_deref().unwrap_or("-"));
        println!("last           {}", summary.last.as_deref().unwrap_or("-"));
        println!("game state     {}", summary.game_state.as_deref().unwrap_or("-"));
        println!("patch          {}", summary.patch_version.as_deref().unwrap_or("-"));
    }
    Ok(())
}

fn print_config(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args)?;
    config.validate()?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn config_path_hint(path: Option<&Path>) -> String {
    path.map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format)?;

    match cli.command {
        Command::Watch(args) => {
            info!(
                event_id = %args.event_id,
                config = %config_path_hint(args.config.config.as_deref()),
                "Starting watch"
            );
            watch(args).await
        }
        Command::Probe(args) => probe(args).await,
        Command::Config(args) => print_config(&args),
    }
}
