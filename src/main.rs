use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use rjq::{
    config, signals, telemetry, Client, Settings, Stats, Store, StoreFailureBackend, Worker,
    WorkerRegistry,
};
use rjq::failure::FailureBackend;

#[derive(Parser)]
#[command(name = "rjq", version, about = "Redis-backed background job queue")]
struct Cli {
    /// Path to an rjq.toml config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker polling the configured queues.
    Worker {
        /// Comma-separated queue priority order; overrides the config.
        #[arg(long)]
        queues: Option<String>,
        /// Drain the queues once, then exit.
        #[arg(long)]
        burst: bool,
    },
    /// Enqueue a job.
    Enqueue {
        queue: String,
        handler: String,
        /// Arguments as a JSON array or object.
        #[arg(long, default_value = "null")]
        args: String,
        /// Write a trackable status record.
        #[arg(long)]
        track: bool,
    },
    /// Look up a tracked job's status.
    Status { token: String },
    /// List registered queues with their pending counts.
    Queues,
    /// List registered workers.
    Workers,
    /// Read a stat counter.
    Stat { name: String },
    /// Look up the failure record for a job.
    Failure { token: String },
}

async fn open_store(settings: &Settings) -> anyhow::Result<Store> {
    Store::connect_redis(&settings.redis_dsn, settings.namespace.clone())
        .await
        .context("opening backing store")
}

async fn run_worker(
    mut settings: Settings,
    queues: Option<String>,
    burst: bool,
) -> anyhow::Result<()> {
    if let Some(queues) = queues {
        let queues: Vec<String> = queues
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        if queues.is_empty() {
            anyhow::bail!("--queues must name at least one queue");
        }
        settings.queues = queues;
    }

    let store = open_store(&settings).await?;
    let client = Client::new(store.clone(), settings.status_ttl_seconds);
    let (mut worker, handle) = Worker::new(store, client, settings);
    worker.set_burst(burst);

    let bridge = signals::spawn_signal_bridge(handle)?;
    let result = worker.run().await;
    bridge.abort();
    result.context("worker exited with an error")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings(cli.config.as_deref()).context("loading config")?;
    telemetry::init(settings.log_level);

    match cli.command {
        Command::Worker { queues, burst } => run_worker(settings, queues, burst).await?,
        Command::Enqueue {
            queue,
            handler,
            args,
            track,
        } => {
            let args: Value = serde_json::from_str(&args).context("--args must be valid JSON")?;
            let store = open_store(&settings).await?;
            let client = Client::new(store, settings.status_ttl_seconds);
            let token = client.enqueue(&queue, &handler, args, track).await?;
            println!("{token}");
        }
        Command::Status { token } => {
            let store = open_store(&settings).await?;
            let client = Client::new(store, settings.status_ttl_seconds);
            match client.statuses().get(&token).await? {
                Some(status) => println!("{status}"),
                None => println!("untracked"),
            }
        }
        Command::Queues => {
            let store = open_store(&settings).await?;
            let client = Client::new(store, settings.status_ttl_seconds);
            for queue in client.queues().queues().await? {
                let size = client.queues().size(&queue).await?;
                println!("{queue}\t{size}");
            }
        }
        Command::Workers => {
            let store = open_store(&settings).await?;
            let registry = WorkerRegistry::new(store.clone());
            let stats = Stats::new(store);
            let paused = registry.paused_workers().await?;
            for worker in registry.workers().await? {
                let id = worker.to_string();
                let started = registry
                    .started(&worker)
                    .await?
                    .unwrap_or_else(|| "-".to_string());
                let processed = stats.get(&format!("processed:{id}")).await?;
                let failed = stats.get(&format!("failed:{id}")).await?;
                let flag = if paused.contains(&id) { " (paused)" } else { "" };
                println!("{id}{flag}\tstarted={started}\tprocessed={processed}\tfailed={failed}");
            }
        }
        Command::Stat { name } => {
            let store = open_store(&settings).await?;
            println!("{}", Stats::new(store).get(&name).await?);
        }
        Command::Failure { token } => {
            let store = open_store(&settings).await?;
            let failures = StoreFailureBackend::new(store);
            match failures.find(&token).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no failure recorded for {token}"),
            }
        }
    }

    Ok(())
}
