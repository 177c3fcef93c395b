use clap::{Parser, Subcommand};
use relayguard::{
    config::{Config, ConfigLoader, ConfigValidator},
    dlq::{self, DeadLetterQueue, EntryStatus},
    error::Result,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "relayguard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fault-tolerance layer for calls to unreliable dependencies",
    long_about = None
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAYGUARD_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "RELAYGUARD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    Validate,
    /// Generate sample configuration
    GenerateSample,
    /// Inspect and manage the dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead letter entries
    List {
        /// Filter by status (pending, in_flight, reprocessed, dead)
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of entries to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Show a single entry by id
    Show { id: String },
    /// Show queue statistics
    Stats,
    /// Remove all entries for a dependency
    Purge { dependency: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level);

    match cli.command {
        Commands::GenerateSample => {
            println!("{}", ConfigLoader::generate_sample());
            Ok(())
        }
        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            ConfigValidator::validate(&config)?;
            info!("Configuration is valid");
            info!("  Application: {}", config.app.name);
            info!("  DLQ backend: {}", config.dlq.backend);
            info!("  Notifier channels: {}", config.notifier.channels.join(", "));
            Ok(())
        }
        Commands::Dlq { command } => {
            let config = load_config(cli.config.as_deref())?;
            let queue = open_queue(&config)?;
            run_dlq_command(&queue, command).await
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::fmt::time::ChronoLocal;

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_ansi(true)
        .with_target(false);

    let filter = format!("relayguard={},info", log_level);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            ConfigLoader::load_from_file(path)
        }
        None => ConfigLoader::load(),
    }
}

fn open_queue(config: &Config) -> Result<DeadLetterQueue> {
    let storage = dlq::build_storage(&config.dlq)?;
    Ok(DeadLetterQueue::new(
        storage,
        config.dlq.max_reprocess_attempts,
        Duration::from_secs(config.dlq.visibility_timeout_secs),
    ))
}

async fn run_dlq_command(queue: &DeadLetterQueue, command: DlqCommands) -> Result<()> {
    match command {
        DlqCommands::List { status, limit } => {
            let entries = match status.as_deref() {
                Some(status) => {
                    let status = parse_status(status)?;
                    queue.storage().list_by_status(status, limit).await?
                }
                None => {
                    let stats = queue.statistics().await?;
                    let mut entries = Vec::new();
                    for status in [
                        EntryStatus::Pending,
                        EntryStatus::InFlight,
                        EntryStatus::Reprocessed,
                        EntryStatus::Dead,
                    ] {
                        if entries.len() >= limit {
                            break;
                        }
                        let remaining = limit - entries.len();
                        entries
                            .extend(queue.storage().list_by_status(status, remaining).await?);
                    }
                    info!("{} entries total", stats.total_entries);
                    entries
                }
            };

            for entry in entries {
                println!(
                    "{}  {:12}  {:10}  attempts={}  {}",
                    entry.id,
                    entry.dependency,
                    entry.status.as_str(),
                    entry.attempt_count,
                    entry.created_at.to_rfc3339()
                );
            }
            Ok(())
        }
        DlqCommands::Show { id } => {
            let entry = queue.storage().get(&id).await?.ok_or_else(|| {
                relayguard::RelayGuardError::NotFound(format!("DLQ entry '{}'", id))
            })?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(())
        }
        DlqCommands::Stats => {
            let stats = queue.statistics().await?;
            println!("Total entries: {}", stats.total_entries);
            println!("By status:");
            for (status, count) in &stats.entries_by_status {
                println!("  {:12} {}", status, count);
            }
            println!("By dependency:");
            for (dependency, count) in &stats.entries_by_dependency {
                println!("  {:12} {}", dependency, count);
            }
            if let Some(oldest) = stats.oldest_entry {
                println!("Oldest entry: {}", oldest.to_rfc3339());
            }
            Ok(())
        }
        DlqCommands::Purge { dependency } => {
            let removed = queue.clear_dependency(&dependency).await?;
            println!("Removed {} entries for '{}'", removed, dependency);
            Ok(())
        }
    }
}

fn parse_status(status: &str) -> Result<EntryStatus> {
    match status {
        "pending" => Ok(EntryStatus::Pending),
        "in_flight" => Ok(EntryStatus::InFlight),
        "reprocessed" => Ok(EntryStatus::Reprocessed),
        "dead" => Ok(EntryStatus::Dead),
        other => Err(relayguard::RelayGuardError::Validation(format!(
            "Unknown status '{}', expected pending, in_flight, reprocessed or dead",
            other
        ))),
    }
}
