//! Motionbus entrypoint: streams a binary task file to a loopback mock
//! controller, or runs the delta-geometry calibration solver standalone.

mod harness;

use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "motionbus", version, about = "Motion-command streaming host")]
struct Args {
    /// Optional configuration file path (overrides discovery of `motionbus.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a binary task file and stream it to a loopback mock controller.
    Stream {
        /// Path to the binary task stream.
        task: PathBuf,
    },
    /// Run the delta-geometry calibration solver and print the correction.
    Calibrate {
        #[arg(long, default_value_t = 0.0)]
        endstop_x: f64,
        #[arg(long, default_value_t = 0.0)]
        endstop_y: f64,
        #[arg(long, default_value_t = 0.0)]
        endstop_z: f64,
        /// Current build height, millimetres.
        #[arg(long)]
        height: f64,
        /// Current delta radius, millimetres.
        #[arg(long)]
        delta_radius: f64,
        /// Measured Z deviation at each tower probe point.
        #[arg(long)]
        tower0: f64,
        #[arg(long)]
        tower1: f64,
        #[arg(long)]
        tower2: f64,
        /// Measured Z deviation at the centre probe point.
        #[arg(long, default_value_t = 0.0)]
        centre: f64,
    },
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("motionbus.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "motionbus.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => self.log_guard = Some(guard),
            Err(_err) => {
                // Global subscriber already installed (e.g. under a test harness); drop the guard.
            }
        }

        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();

    let args = Args::parse();
    let config = core_config::load_from(args.config.clone());
    info!(target: "runtime", "startup");

    match args.command {
        Command::Stream { task } => {
            let summary = harness::run_stream(&task, &config)?;
            info!(
                target: "runtime.stream",
                lines_sent = summary.lines_sent,
                "stream_complete"
            );
            println!(
                "streamed {} main-channel commands; final position x={:?} y={:?} z={:?}",
                summary.lines_sent,
                summary.final_state.x,
                summary.final_state.y,
                summary.final_state.z,
            );
        }
        Command::Calibrate {
            endstop_x,
            endstop_y,
            endstop_z,
            height,
            delta_radius,
            tower0,
            tower1,
            tower2,
            centre,
        } => {
            let probes = core_calibration::ProbeDeviations {
                tower0,
                tower1,
                tower2,
                centre,
            };
            let result = core_calibration::calibrate(
                [endstop_x, endstop_y, endstop_z],
                height,
                probes,
                delta_radius,
            )?;
            info!(target: "runtime.calibrate", ?result, "calibration_complete");
            println!(
                "endstop corrections x={:.4} y={:.4} z={:.4}, radius={:.4}, height={:.4}",
                result.x, result.y, result.z, result.r, result.h
            );
        }
    }

    Ok(())
}
