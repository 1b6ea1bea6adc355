//! restfile CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod runner;

#[derive(Parser)]
#[command(name = "restfile")]
#[command(about = "Declarative HTTP/WebSocket test client", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the requests in a restfile
    Run {
        /// Path to the restfile
        file: PathBuf,

        /// Run only the request with this label
        #[arg(short, long, conflicts_with = "index")]
        label: Option<String>,

        /// Run only the request at this declaration index
        #[arg(short, long)]
        index: Option<usize>,

        /// Log per-request failures and keep going
        #[arg(long)]
        ignore_failures: bool,

        /// Resolve request blocks in parallel tasks (rejects forward
        /// references to exports)
        #[arg(long)]
        concurrent_resolve: bool,
    },

    /// Open the file's WebSocket session
    Socket {
        /// Path to the restfile
        file: PathBuf,

        /// Nothing for the REPL, "run" for the playbook, or one entry name
        entry: Option<String>,
    },

    /// Decode and validate a restfile without touching the network
    Validate {
        /// Path to the restfile
        file: PathBuf,
    },

    /// List request labels in declaration order
    List {
        /// Path to the restfile
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Run {
            file,
            label,
            index,
            ignore_failures,
            concurrent_resolve,
        } => {
            if let Some(label) = label {
                runner::run_label(&file, &label).await?;
            } else if let Some(index) = index {
                runner::run_index(&file, index).await?;
            } else {
                runner::run_file(&file, ignore_failures, concurrent_resolve).await?;
            }
            Ok(())
        }

        Commands::Socket { file, entry } => {
            runner::run_socket(&file, entry.as_deref()).await?;
            Ok(())
        }

        Commands::Validate { file } => {
            let restfile = restfile_config::load_from_file(&file)?;
            println!("{} is valid", file.display());
            println!("  requests: {}", restfile.requests.len());
            println!("  socket: {}", restfile.socket.is_some());
            Ok(())
        }

        Commands::List { file } => {
            let restfile = restfile_config::load_from_file(&file)?;
            for request in &restfile.requests {
                println!("{}", request.label);
            }
            Ok(())
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(filter.into()),
        )
        .init();

    Ok(())
}
