//! rcon-bridge command line
//!
//! - `serve`: run a game server and expose its console over RCON
//! - `exec`: send one command to an RCON server
//! - `config`: print an example configuration file

use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::process::Command;
use tracing::{error, info, warn};

use rcon_bridge::config::DEFAULT_PORT;
use rcon_bridge::utils::logging;
use rcon_bridge::{ConsoleBridge, ManagedConsole, ProtocolError, RconClient, RconConfig, Result};

/// How long to wait for the managed process after the bridge stops
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "rcon-bridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spawn a server process and bridge its console
    Serve {
        /// Listen address, overrides the configuration
        #[arg(short, long)]
        listen: Option<String>,

        /// Program to run, followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<String>,
    },

    /// Run one command against an RCON server
    Exec {
        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(long, env = "RCON_PASSWORD")]
        password: String,

        /// Response timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command words, joined with spaces
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Print an example configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", RconConfig::example_config());
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);

    let result = match cli.command {
        Commands::Serve { listen, program } => serve(config, listen, program).await,
        Commands::Exec {
            host,
            port,
            password,
            timeout,
            command,
        } => exec(config, &host, port, &password, timeout, &command.join(" ")).await,
        Commands::Config => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<RconConfig> {
    let mut config = match &cli.config {
        Some(path) => RconConfig::from_file(path)?,
        None => RconConfig::from_env()?,
    };
    if cli.verbose {
        config.logging.log_level = tracing::Level::DEBUG;
    }
    Ok(config)
}

async fn serve(mut config: RconConfig, listen: Option<String>, program: Vec<String>) -> Result<()> {
    if let Some(address) = listen {
        config.bridge.address = address;
    }
    config.validate_strict()?;

    let (executable, args) = program
        .split_first()
        .ok_or_else(|| ProtocolError::ConfigError("no program given".into()))?;

    let mut child = Command::new(executable)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    info!(program = %executable, pid = ?child.id(), "Managed process started");

    let bridge = ConsoleBridge::new(config.bridge.clone())?;
    let server = bridge
        .listen_configured(ManagedConsole::from_child(&mut child)?)
        .await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received CTRL+C signal, shutting down");
        }
        status = child.wait() => {
            let status = status?;
            warn!(status = %status, "Managed process exited");
        }
    }

    server.shutdown().await?;

    match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
        Ok(status) => {
            let status = status?;
            info!(status = %status, "Managed process stopped");
        }
        Err(_) => {
            warn!("Managed process did not exit, killing it");
            child.kill().await?;
        }
    }
    Ok(())
}

async fn exec(
    config: RconConfig,
    host: &str,
    port: u16,
    password: &str,
    timeout_ms: Option<u64>,
    command: &str,
) -> Result<()> {
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.client.response_timeout);
    let connect_timeout = config.client.connection_timeout;

    let client = RconClient::new(config.client);
    client.connect(password, host, port, connect_timeout).await?;
    let output = client.command(command, timeout).await?;
    client.close();

    println!("{output}");
    Ok(())
}
