//! Edge video analytics supervisor daemon

mod orchestrator;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use edgescope_core::{logger, AppConfig};

use crate::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "edgescope", version, about = "Edge video analytics supervisor")]
struct Cli {
    /// Path to the configuration file (YAML or JSON).
    #[arg(long, short, default_value = "./config.yaml")]
    config: PathBuf,

    /// Directory for rolling log files; console-only when absent.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match &cli.log_dir {
        Some(dir) => match logger::init_with_file(dir) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("failed to set up logging in {}: {e}", dir.display());
                return ExitCode::FAILURE;
            }
        },
        None => {
            logger::init();
            None
        }
    };

    // A broken config is fatal before any worker is spawned.
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        config = %cli.config.display(),
        cameras = config.cameras.len(),
        "edgescope starting"
    );

    match Orchestrator::new(cli.config, config).run() {
        Ok(()) => {
            info!("edgescope exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
