use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "sigbridge")]
#[command(about = "Sign service for a library function located by offset")]
struct Args {
    #[arg(short, long, default_value = "signer.json", env = "SIGBRIDGE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP sign service (default)
    Serve {
        /// File served at /sign/appinfo
        #[arg(long, default_value = "appinfo.json")]
        appinfo: PathBuf,
    },
    /// Sign a single request and print the result
    Sign {
        #[arg(long)]
        cmd: String,
        /// Payload as hex
        #[arg(long)]
        src: String,
        #[arg(long, allow_hyphen_values = true)]
        seq: i32,
    },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List modules loaded into this process
    Modules {
        /// Only show modules whose name contains this string
        #[arg(long)]
        filter: Option<String>,
        /// Load the configured libraries and target first
        #[arg(long)]
        load: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sigbridge=info".parse()?))
        .init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve {
        appinfo: PathBuf::from("appinfo.json"),
    });

    match command {
        Command::Serve { appinfo } => {
            info!("sigbridge {} starting...", env!("CARGO_PKG_VERSION"));
            commands::serve::run(&args.config, appinfo)
        }
        Command::Sign { cmd, src, seq } => commands::sign::run(&args.config, &cmd, &src, seq),
        Command::Init { force } => commands::init::run(&args.config, force),
        Command::Modules { filter, load } => {
            commands::modules::run(&args.config, filter.as_deref(), load)
        }
    }
}
