//! coldstore command line.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coldstore", version, about = "Uniform key-value cold storage gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP wire server
    Serve {
        /// TOML settings file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Bind address (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },
    /// Write random batches to a namespace and report throughput
    Bench {
        /// Symbolic name of the namespace (it is flushed first!)
        #[arg(short, long)]
        name: String,
        /// Keys per batch
        #[arg(long, default_value_t = 100)]
        batch: usize,
        /// Bytes per value
        #[arg(long, default_value_t = 200)]
        value_size: usize,
        /// Stop after this many batches (default: run until interrupted)
        #[arg(long)]
        rounds: Option<u64>,
        /// TOML settings file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            json_logs,
        } => commands::serve::execute(config.as_deref(), host, port, json_logs).await,
        Commands::Bench {
            name,
            batch,
            value_size,
            rounds,
            config,
        } => {
            let options = commands::bench::BenchOptions {
                batch,
                value_size,
                rounds,
            };
            commands::bench::execute(config.as_deref(), &name, options).await
        },
    }
}
