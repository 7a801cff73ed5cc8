//! vicuna-server
//!
//! ```text
//! vicuna-server start   [config.toml]   run master, manager and workers
//! vicuna-server stop    [config.toml]   SIGTERM the master, wait up to 5s
//! vicuna-server restart [config.toml]   stop, then start in this process
//! vicuna-server reload  [config.toml]   SIGUSR1 the master: restart workers
//! ```
//!
//! The config path falls back to `VICUNA_SERVER_CONFIG_FILE`; a missing file
//! means defaults.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use vicuna::lifecycle::StopOutcome;
use vicuna::observability::init_logging;
use vicuna::{load_or_default, Server, ServerError};

#[derive(Parser)]
#[command(name = "vicuna-server")]
#[command(about = "HTTP and WebSocket application server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArg {
    /// TOML configuration file
    #[arg(env = "VICUNA_SERVER_CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server in the foreground (or daemonized per config)
    Start(ConfigArg),
    /// Stop a running server
    Stop(ConfigArg),
    /// Stop, then start
    Restart(ConfigArg),
    /// Restart workers of a running server
    Reload(ConfigArg),
}

impl Commands {
    fn config(&self) -> Option<&PathBuf> {
        match self {
            Commands::Start(arg) | Commands::Stop(arg) | Commands::Restart(arg) | Commands::Reload(arg) => {
                arg.config.as_ref()
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = cli.command.config().cloned();

    let config = match load_or_default(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vicuna-server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("vicuna-server: failed to initialise logging: {}", e);
    }
    match &path {
        Some(path) if !path.exists() => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults")
        }
        None => tracing::debug!("No config file given, using defaults"),
        _ => {}
    }

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "vicuna-server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: vicuna::ServerConfig) -> Result<(), ServerError> {
    let server = Server::new(config)?;
    match command {
        Commands::Start(_) => server.start(),
        Commands::Restart(_) => server.restart(),
        Commands::Stop(_) => {
            match server.stop()? {
                StopOutcome::NotRunning => tracing::info!("Server is not running"),
                StopOutcome::Stopped => tracing::info!("Server stopped"),
                StopOutcome::Stale => tracing::info!("Removed stale pid file"),
                StopOutcome::TimedOut => tracing::warn!("Server did not stop in time"),
            }
            Ok(())
        }
        Commands::Reload(_) => {
            if !server.reload()? {
                tracing::info!("Server is not running");
            }
            Ok(())
        }
    }
}
