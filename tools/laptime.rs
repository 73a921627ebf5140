//! Minimum-laptime command-line tool
//!
//! Loads a vehicle description and a discrete track file, runs the
//! optimal-laptime solve, prints a summary, and optionally dumps the full
//! trajectory as XML.
//!
//! ## Usage
//! ```bash
//! # Basic solve
//! cargo run --bin laptime -- --vehicle car.xml --track track.xml
//!
//! # With an options document, trajectory dump and verbose solver output
//! cargo run --bin laptime -- --vehicle car.xml --track track.xml \
//!     --options options.xml --dump trajectory.xml -v
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::Parser;
use laptime_rs::{serialize_trajectory, Context, LaptimeOptions, TrackSurface};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Minimum-laptime trajectory optimization
#[derive(Debug, Parser)]
#[command(name = "laptime", version, about)]
struct Cli {
    /// Vehicle description XML
    #[arg(long)]
    vehicle: PathBuf,

    /// Discrete track XML
    #[arg(long)]
    track: PathBuf,

    /// Laptime options XML (defaults apply when omitted)
    #[arg(long)]
    options: Option<PathBuf>,

    /// Write the solved trajectory to this XML file
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Increase logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(cli: &Cli) -> laptime_rs::Result<()> {
    let mut context = Context::new();

    let vehicle = laptime_rs::parse_vehicle_file(&cli.vehicle)?;
    println!("vehicle: {} ({})", cli.vehicle.display(), vehicle.kind());
    context.add_vehicle("vehicle", vehicle)?;

    let track = laptime_rs::parse_track_file(&cli.track)?;
    println!(
        "track:   {} ({:.1} m, {} nodes, {})",
        cli.track.display(),
        track.length,
        track.s.len(),
        if track.closed { "closed" } else { "open" }
    );
    context.add_track("track", Arc::new(TrackSurface::new(track)?))?;
    context.bind_vehicle_to_track("vehicle", "track")?;

    let mut options = match &cli.options {
        Some(path) => LaptimeOptions::from_xml_str(&std::fs::read_to_string(path)?)?,
        None => LaptimeOptions::default(),
    };
    if cli.verbose > 0 && options.print_level == 0 {
        options.print_level = 4;
    }

    let trajectory = context.solve_laptime("vehicle", options, None)?;

    println!("laptime: {:.6} s over {} nodes", trajectory.laptime, trajectory.len());
    for (name, value) in &trajectory.integral_values {
        println!("{}: {:.3e}", name, value);
    }
    let top_speed = trajectory
        .q
        .iter()
        .map(|q| q[laptime_rs::vehicle::IU])
        .fold(f64::NEG_INFINITY, f64::max);
    println!("top speed: {:.1} m/s", top_speed);

    if let Some(path) = &cli.dump {
        std::fs::write(path, serialize_trajectory(&trajectory))?;
        println!("trajectory written to {}", path.display());
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
