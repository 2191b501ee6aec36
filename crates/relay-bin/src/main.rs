//! relay-outbox - persist outbound to-device batches and drain them to a homeserver.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use relay_config_and_utils::{init_logging, Config, Paths};

/// Relay outbox command-line interface.
#[derive(Parser)]
#[command(name = "relay-outbox")]
#[command(about = "Durable, ordered delivery of to-device message batches")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.relay-outbox
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue the items in a JSON file
    Enqueue {
        /// Event type tag for every batch
        #[arg(short, long)]
        event_type: String,
        /// JSON array of {recipient, device, payload}
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Deliver queued batches until the queue is empty or stalls
    Drain,
    /// Show queued batch counts
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level, &paths)?;

    match cli.command {
        Commands::Enqueue { event_type, file } => {
            let created = app::enqueue_file(&paths, &event_type, &file)?;
            println!("Queued {} batch(es) of {}", created, event_type);
        }
        Commands::Drain => {
            let report = app::run_drain(&config, &paths).await?;
            println!("{}", report);
        }
        Commands::Status => {
            print!("{}", app::status(&paths)?);
        }
    }

    Ok(())
}
