//! `hwcomms` - command-line access to bench instruments
//!
//! Provides one-shot commands for:
//! - Listing configured devices and attached Kinesis controllers
//! - Reading sweep settings and acquiring traces from a Yokogawa OSA
//! - Moving, homing and stopping linear stages
//! - Reading array spectrometers
//!
//! # Usage
//!
//! ```bash
//! hwcomms --config bench.toml list
//! hwcomms osa sweep osa --trace TRB --output sweep.csv
//! hwcomms --mock stage move-abs delay_stage 0.0125
//! RUST_LOG=hwc_driver_thorlabs=debug hwcomms stage home delay_stage
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod config;
mod registry;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use commands::{Bench, StageAction};
use hwc_driver_yokogawa::Trace;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hwcomms")]
#[command(about = "Talk to OSAs, spectrometers and motorized stages", long_about = None)]
struct Cli {
    /// Hardware configuration file (TOML format)
    #[arg(long, global = true, default_value = "hwcomms.toml")]
    config: PathBuf,

    /// Use simulated devices in place of real hardware
    #[arg(long, global = true)]
    mock: bool,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured devices and detected Kinesis controllers
    List,

    /// Print a device's identification string
    Identify {
        /// Device ID
        id: String,
    },

    /// Optical spectrum analyzer commands
    #[command(subcommand)]
    Osa(OsaCommands),

    /// Linear stage commands
    #[command(subcommand)]
    Stage(StageCommands),

    /// Array spectrometer commands
    #[command(subcommand)]
    Spectrometer(SpectrometerCommands),
}

#[derive(Subcommand)]
enum OsaCommands {
    /// Print the current sweep settings as JSON
    Params {
        /// Device ID
        id: String,
    },

    /// Run one sweep and write the trace as CSV
    Sweep {
        /// Device ID
        id: String,
        /// Trace to read (TRA..TRG); defaults to the active trace
        #[arg(long)]
        trace: Option<Trace>,
        /// Resolution bandwidth to set before sweeping, in nm
        #[arg(long)]
        resolution: Option<f64>,
        /// Output file; stdout if omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Print the current position in meters
    Position {
        /// Device ID
        id: String,
    },

    /// Move to an absolute position in meters
    MoveAbs {
        /// Device ID
        id: String,
        /// Target position (m)
        #[arg(allow_negative_numbers = true)]
        target: f64,
        /// Return without waiting for the move to finish
        #[arg(long)]
        no_wait: bool,
    },

    /// Move by a distance in meters
    MoveBy {
        /// Device ID
        id: String,
        /// Distance (m)
        #[arg(allow_negative_numbers = true)]
        distance: f64,
        /// Return without waiting for the move to finish
        #[arg(long)]
        no_wait: bool,
    },

    /// Home the stage
    Home {
        /// Device ID
        id: String,
        /// Return without waiting for homing to finish
        #[arg(long)]
        no_wait: bool,
    },

    /// Stop any motion
    Stop {
        /// Device ID
        id: String,
    },
}

#[derive(Subcommand)]
enum SpectrometerCommands {
    /// Acquire one spectrum and write it as CSV
    Read {
        /// Device ID
        id: String,
        /// Integration time in milliseconds
        #[arg(long)]
        integration_ms: Option<u64>,
        /// Scans to average
        #[arg(long)]
        averages: Option<u32>,
        /// Output file; stdout if omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let bench = Bench::load(&cli.config, cli.mock)?;

    match cli.command {
        Commands::List => commands::list(&bench).await,
        Commands::Identify { id } => commands::identify(&bench, &id).await,
        Commands::Osa(OsaCommands::Params { id }) => commands::osa_params(&bench, &id).await,
        Commands::Osa(OsaCommands::Sweep {
            id,
            trace,
            resolution,
            output,
        }) => commands::osa_sweep(&bench, &id, trace, resolution, output).await,
        Commands::Stage(cmd) => {
            let (id, action, wait) = match cmd {
                StageCommands::Position { id } => (id, StageAction::Position, false),
                StageCommands::MoveAbs {
                    id,
                    target,
                    no_wait,
                } => (id, StageAction::MoveAbs(target), !no_wait),
                StageCommands::MoveBy {
                    id,
                    distance,
                    no_wait,
                } => (id, StageAction::MoveBy(distance), !no_wait),
                StageCommands::Home { id, no_wait } => (id, StageAction::Home, !no_wait),
                StageCommands::Stop { id } => (id, StageAction::Stop, true),
            };
            commands::stage(&bench, &id, action, wait).await
        }
        Commands::Spectrometer(SpectrometerCommands::Read {
            id,
            integration_ms,
            averages,
            output,
        }) => commands::spectrometer_read(&bench, &id, integration_ms, averages, output).await,
    }
}
