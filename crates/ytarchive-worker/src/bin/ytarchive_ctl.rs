//! Operational CLI for inspecting and manipulating queues and job status.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use ytarchive_queue::{JobTracker, KeySpace, QueueConfig, RedisStore, WorkQueue};
use ytarchive_worker::logging::init_tracing;

#[derive(Debug, Parser)]
#[command(name = "ytarchive-ctl", version, about = "Inspect ytarchive work queues and job status")]
struct Cli {
    /// Redis URL (falls back to REDIS_URL)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Key prefix (falls back to QUEUE_NAMESPACE)
    #[arg(long, env = "QUEUE_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append video ids to a channel queue
    Enqueue {
        channel: String,
        #[arg(required = true)]
        videos: Vec<String>,
    },
    /// Remove and print up to COUNT items from the head of a queue
    Claim {
        channel: String,
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    /// Print the pending item count of a queue
    Len { channel: String },
    /// Print items at the head of a queue without removing them
    Peek {
        channel: String,
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },
    /// List channels that have a queue
    Queues,
    /// Drop every pending item of a channel
    Clear { channel: String },
    /// Print active jobs as JSON, for one channel or all
    Jobs {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Print the status record of one video as JSON
    Status { channel: String, video: String },
    /// Delete the status record of one video
    RemoveJob { channel: String, video: String },
    /// Delete every status record of a channel
    ClearJobs { channel: String },
    /// Check the store is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // TLS connections (rediss://) go through rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = QueueConfig::from_env();
    if let Some(url) = cli.redis_url {
        config.redis_url = url;
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    debug!(namespace = %config.namespace, "Using queue config");

    let store = RedisStore::from_config(&config).context("invalid Redis URL")?;
    let keys = KeySpace::new(config.namespace.clone());
    let queue = WorkQueue::new(store.clone(), keys.clone());
    let tracker = JobTracker::new(store.clone(), keys)
        .with_job_ttl(config.job_ttl)
        .with_stale_grace(config.stale_grace);

    match cli.command {
        Command::Enqueue { channel, videos } => {
            queue.enqueue(&channel, &videos).await?;
            println!("{}", queue.len(&channel).await?);
        }
        Command::Claim { channel, count } => {
            for video in queue.claim(&channel, count).await? {
                println!("{}", video);
            }
        }
        Command::Len { channel } => println!("{}", queue.len(&channel).await?),
        Command::Peek { channel, count } => {
            for video in queue.peek(&channel, count).await? {
                println!("{}", video);
            }
        }
        Command::Queues => {
            for channel in queue.list_queue_keys().await? {
                println!("{}", channel);
            }
        }
        Command::Clear { channel } => queue.clear(&channel).await?,
        Command::Jobs { channel } => {
            let jobs = match channel {
                Some(channel) => tracker.get_active_jobs(&channel).await?,
                None => tracker.get_all_active_jobs().await?,
            };
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Command::Status { channel, video } => match tracker.get_status(&channel, &video).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => anyhow::bail!("no status for {}/{}", channel, video),
        },
        Command::RemoveJob { channel, video } => tracker.remove_job(&channel, &video).await?,
        Command::ClearJobs { channel } => {
            println!("{}", tracker.clear_channel_jobs(&channel).await?);
        }
        Command::Ping => {
            store.ping().await?;
            println!("PONG");
        }
    }

    Ok(())
}
