//! GeoWake trip simulator
//!
//! Replays a synthetic straight-line trip toward a destination through the
//! alarm engine on a simulated clock, logging every transition.
//!
//! # Usage
//! ```bash
//! geowake [--start-distance 5000] [--speed 15] [--wake-minutes 2] \
//!         [--gap-start 120 --gap-length 60] [--low-power] [--json] [--verbose]
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geowake::effector::{LogEffector, ManualKeepAlive, ManualPositionSource};
use geowake::{
    arrival, geo, AlarmConfig, AlarmEngine, AlarmState, Collaborators, Destination, DismissDifficulty, DismissProof,
    EngineConfig, EventSink, PositionFix, PowerMode,
};

/// GeoWake - location alarm trip simulator
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Destination latitude
    #[arg(long, default_value = "51.5308", allow_hyphen_values = true)]
    dest_lat: f64,

    /// Destination longitude
    #[arg(long, default_value = "-0.1238", allow_hyphen_values = true)]
    dest_lon: f64,

    /// Geofence radius in meters
    #[arg(long, default_value = "500")]
    radius: f64,

    /// Distance of the trip start from the destination, meters
    #[arg(long, default_value = "5000")]
    start_distance: f64,

    /// Travel speed in m/s
    #[arg(long, default_value = "15")]
    speed: f64,

    /// Smart wake lead time in minutes (0 disables)
    #[arg(long, default_value = "0")]
    wake_minutes: f64,

    /// Seconds between position fixes
    #[arg(long, default_value = "5")]
    fix_interval: u64,

    /// Second at which the GPS goes silent
    #[arg(long)]
    gap_start: Option<u64>,

    /// Length of the GPS gap in seconds
    #[arg(long, default_value = "60")]
    gap_length: u64,

    /// Dismiss difficulty: easy, medium, hard or shake
    #[arg(long, default_value = "easy")]
    difficulty: String,

    /// Run the sampler in low-power mode
    #[arg(long)]
    low_power: bool,

    /// Engine tuning file (TOML)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Print the final status as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_difficulty(s: &str) -> Result<DismissDifficulty> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "easy" => DismissDifficulty::Easy,
        "medium" => DismissDifficulty::Medium,
        "hard" => DismissDifficulty::Hard,
        "shake" => DismissDifficulty::Shake,
        other => bail!("unknown difficulty '{}'", other),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with_target(false)
            .init();
    }

    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if !(args.speed >= 0.0 && args.start_distance > 0.0 && args.fix_interval > 0) {
        bail!("speed must be >= 0, start distance > 0 and fix interval > 0");
    }

    let alarm = AlarmConfig::default()
        .with_radius(args.radius)
        .with_wake_minutes(args.wake_minutes)
        .with_difficulty(parse_difficulty(&args.difficulty)?);
    let destination = Destination::from_config(args.dest_lat, args.dest_lon, &alarm).with_name("Destination");

    let (sink, _events) = EventSink::channel();
    let collaborators = Collaborators::new(ManualPositionSource::new(), LogEffector::new(), ManualKeepAlive::new());
    let mut engine = AlarmEngine::new(config.clone(), sink, collaborators);
    if args.low_power {
        engine.set_power_mode(PowerMode::LowPower);
    }

    let start = geo::destination_point(args.dest_lat, args.dest_lon, 0.0, args.start_distance);
    let heading = geo::bearing(start.0, start.1, args.dest_lat, args.dest_lon);
    engine.arm(destination, alarm, 0).context("arming alarm")?;

    let heartbeat_s = (config.sampler.heartbeat_ms / 1000).max(1);
    let horizon_s = match arrival::calculate_eta(start.0, start.1, args.dest_lat, args.dest_lon, args.speed) {
        Some(eta) => eta.seconds.ceil() as u64 + 600,
        None => 3600,
    };
    let in_gap = |t: u64| matches!(args.gap_start, Some(g) if t >= g && t < g + args.gap_length);

    let mut t = 0;
    while t <= horizon_s && engine.state() == AlarmState::Armed {
        let now_ms = t * 1000;
        if t % args.fix_interval == 0 && !in_gap(t) {
            let travelled = (args.speed * t as f64).min(args.start_distance);
            let (lat, lon) = geo::destination_point(start.0, start.1, heading, travelled);
            let fix = PositionFix::new(lat, lon, now_ms)
                .with_speed(args.speed)
                .with_heading(heading)
                .with_accuracy(8.0);
            engine.on_fix(fix);
        }
        if t % heartbeat_s == 0 {
            engine.on_heartbeat(now_ms);
        }
        engine.advance(now_ms);
        t += 1;
    }

    let now_ms = t.saturating_sub(1) * 1000;
    let status = engine.status(now_ms);
    if engine.state() == AlarmState::Triggered {
        info!(
            after_s = t.saturating_sub(1),
            reason = ?status.trigger_reason,
            distance = %status.distance_m.map(geo::format_distance).unwrap_or_default(),
            "alarm rang"
        );
        if let Some(prompt) = &status.challenge_prompt {
            info!(prompt = %prompt, "dismiss challenge");
        }
        if args.difficulty.eq_ignore_ascii_case("easy") {
            engine.dismiss(&DismissProof::Acknowledge).context("dismissing alarm")?;
        }
    } else {
        info!(state = ?engine.state(), "trip ended without the alarm firing");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("state:     {:?}", status.state);
        println!("reason:    {:?}", status.trigger_reason);
        println!(
            "distance:  {}",
            status.distance_m.map(geo::format_distance).unwrap_or_else(|| "-".into())
        );
        println!("eta:       {}", arrival::format_eta(status.eta_seconds));
        println!("predicted: {} (confidence {:.2})", status.predicted, status.confidence);
        println!("fallbacks: {}", engine.sampler().fallback_polls());
    }

    engine.disarm();
    Ok(())
}
