// Coldstart CLI
//
// Design Decision: Use clap derive for argument parsing, with env fallbacks.
// Design Decision: `invoke` runs one event and stops the engine; `serve` keeps it warm.
// Design Decision: Supervisor configuration comes from the environment (.env honoured).

mod commands;
mod output;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coldstart_core::telemetry::{init_telemetry, TelemetryConfig};
use coldstart_core::SupervisorConfig;
use coldstart_supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "coldstart")]
#[command(about = "Coldstart - boot, provision, and proxy to a wrapped workflow engine")]
#[command(version)]
pub struct Cli {
    /// Output format for invocation responses
    #[arg(long, short, default_value = "json", value_parser = ["json", "text"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single invocation event and print the response
    Invoke {
        /// Event file, or `-` for stdin (empty event when omitted)
        #[arg(long, short, env = "COLDSTART_EVENT")]
        event: Option<String>,
    },

    /// Serve invocations over HTTP, reusing one warm engine
    Serve {
        /// Listen address
        #[arg(long, env = "COLDSTART_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Start the engine before the first request arrives
        #[arg(long)]
        eager: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Configure via environment variables:
    // - SERVICE_NAME: Service name (default: "coldstart")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - LOG_FORMAT: "text" or "json"
    init_telemetry(TelemetryConfig::from_env());

    let config = SupervisorConfig::from_env();
    tracing::info!(
        engine = %config.engine.command,
        base_url = %config.engine.base_url(),
        workflow = %config.workflow_path.display(),
        "coldstart starting..."
    );

    let supervisor = Supervisor::new(config).context("Invalid supervisor configuration")?;
    let output = output::OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Invoke { event } => commands::invoke::run(supervisor, event, output).await,
        Commands::Serve { listen, eager } => commands::serve::run(supervisor, listen, eager).await,
    }
}
