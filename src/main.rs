use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use courtsign::config::{ConverterConfig, QrConfig, SignerConfig};
use courtsign::node::Node;
use courtsign::queue::{JobRecord, RetryPolicy, SharedQueue};
use courtsign::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "courtsign")]
#[command(version)]
#[command(about = "Asynchronous signing service for court document requests")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the signing service (HTTP API plus worker pool)
    Server(ServerArgs),

    /// Inspect a queue snapshot written by a stopped server
    Queue {
        /// Path to the snapshot file
        #[arg(long, env = "COURTSIGN_SNAPSHOT")]
        snapshot: PathBuf,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,

        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the HTTP API to
    #[arg(long, env = "COURTSIGN_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on for HTTP
    #[arg(long, env = "COURTSIGN_PORT", default_value = "8080")]
    port: u16,

    /// Root directory for templates, signatures and generated artifacts
    #[arg(long, env = "COURTSIGN_STORAGE", default_value = "uploads")]
    storage_root: PathBuf,

    /// JSON file with courts, users, signatures and requests to load at start
    #[arg(long, env = "COURTSIGN_SEED")]
    seed: Option<PathBuf>,

    /// Jobs executing at once across all users
    #[arg(long, env = "COURTSIGN_CONCURRENCY", default_value = "3")]
    concurrency: usize,

    /// Jobs leased from the queue ahead of execution
    #[arg(long, default_value = "32")]
    prefetch: usize,

    /// Maximum jobs held by the queue
    #[arg(long, default_value = "10000")]
    queue_capacity: usize,

    /// Deliveries per job before it is moved to the dead set
    #[arg(long, env = "COURTSIGN_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// First retry delay in milliseconds; doubles on each attempt
    #[arg(long, default_value = "500")]
    retry_base_ms: u64,

    /// Queue snapshot written on shutdown and loaded on start
    #[arg(long, env = "COURTSIGN_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Base URL encoded in document QR codes
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:5173")]
    public_base_url: String,

    /// Per-call timeout for render, convert and QR generation, in seconds
    #[arg(long, default_value = "60")]
    collaborator_timeout_secs: u64,

    /// Document converter program
    #[arg(long, env = "COURTSIGN_CONVERTER", default_value = "soffice")]
    converter: String,

    /// QR generator program
    #[arg(long, env = "COURTSIGN_QRENCODE", default_value = "qrencode")]
    qrencode: String,
}

// =============================================================================
// Queue Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// List every job in the snapshot
    List,
    /// List dead jobs only
    Dead,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    status: String,
    request_id: String,
    user_id: String,
    attempts: u32,
    last_error: Option<String>,
}

impl From<&JobRecord> for JobListItem {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.to_string(),
            status: record.status.to_string(),
            request_id: record.job.request_id.clone(),
            user_id: record.job.user_id.clone(),
            attempts: record.attempts,
            last_error: record.last_error.clone(),
        }
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

fn build_config(args: ServerArgs) -> Result<SignerConfig, Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    if args.concurrency == 0 {
        return Err("--concurrency must be at least 1".into());
    }
    if args.max_attempts == 0 {
        return Err("--max-attempts must be at least 1".into());
    }

    let mut config = SignerConfig::new(listen_addr, args.storage_root)
        .with_concurrency(args.concurrency)
        .with_retry(RetryPolicy::new(
            args.max_attempts,
            Duration::from_millis(args.retry_base_ms),
        ))
        .with_public_base_url(args.public_base_url);

    config.seed_path = args.seed;
    config.worker.prefetch = args.prefetch.max(1);
    config.worker.queue_capacity = args.queue_capacity;
    config.worker.snapshot_path = args.snapshot;
    config.pipeline.collaborator_timeout = Duration::from_secs(args.collaborator_timeout_secs);
    config.converter = ConverterConfig {
        program: args.converter,
        ..ConverterConfig::default()
    };
    config.qr = QrConfig {
        program: args.qrencode,
        ..QrConfig::default()
    };
    Ok(config)
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(args)?;
    let shutdown = install_shutdown_handler();

    let node = Node::new(config).await?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Queue Command Handlers
// =============================================================================

async fn handle_queue(
    snapshot: PathBuf,
    command: QueueCommands,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = SharedQueue::restore(&snapshot, usize::MAX, RetryPolicy::default()).await?;
    let jobs: Vec<JobListItem> = match command {
        QueueCommands::List => queue.all_jobs().into_iter().map(JobListItem::from).collect(),
        QueueCommands::Dead => queue.dead_jobs().into_iter().map(JobListItem::from).collect(),
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<8} {:<24} ERROR",
                "JOB ID", "STATUS", "TRIES", "REQUEST"
            );
            println!("{}", "-".repeat(96));
            for job in &jobs {
                println!(
                    "{:<38} {:<10} {:<8} {:<24} {}",
                    job.job_id,
                    job.status,
                    job.attempts,
                    job.request_id,
                    job.last_error.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Queue {
            snapshot,
            output,
            command,
        } => {
            handle_queue(snapshot, command, &output).await?;
        }
    }

    Ok(())
}
