// CLI module - User-facing command-line interface

mod output;

use crate::config::ConfigSet;
use crate::process::{shutdown_signal, Supervisor};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Vigia - keep a set of processes alive and restart them on change
#[derive(Parser)]
#[command(name = "vigia")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured process in the foreground until interrupted
    Start {
        /// Path to the configuration file (TOML or JSON)
        #[arg(short, long, default_value = "vigia.toml")]
        config: PathBuf,
    },

    /// Validate the configuration and list the processes it defines
    Check {
        #[arg(short, long, default_value = "vigia.toml")]
        config: PathBuf,
    },

    /// Show the processes recorded in the PID files
    Status {
        #[arg(short, long, default_value = "vigia.toml")]
        config: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        cli.init_logging();
        cli.execute().await
    }

    fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if self.json {
            builder.json().init();
        } else {
            builder.init();
        }
    }

    async fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Start { config } => {
                let config = load_config(config)?;
                start(config).await
            }

            Commands::Check { config } => {
                let config = load_config(config)?;
                output::print_spec_table(&config);
                output::print_success_msg(&format!(
                    "Configuration is valid: {} process(es)",
                    config.len()
                ));
                Ok(())
            }

            Commands::Status { config } => {
                let config = load_config(config)?;
                output::print_status_table(&config);
                Ok(())
            }
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<ConfigSet> {
    ConfigSet::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

async fn start(config: ConfigSet) -> anyhow::Result<()> {
    let supervisor = Arc::new(Supervisor::new(config));

    let report = supervisor.start().await?;
    output::print_start_report(&report);

    let monitor = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.monitor_loop().await })
    };

    shutdown_signal().await?;

    let pb = output::create_progress_bar("Stopping processes...");
    match supervisor.shutdown().await {
        Ok(()) => output::finish_progress_success(pb, "All processes stopped"),
        Err(e) => {
            output::finish_progress_error(pb, "Shutdown did not complete");
            return Err(e.into());
        }
    }

    monitor.await??;
    Ok(())
}
