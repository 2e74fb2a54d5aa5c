//! larder command line host.
//!
//! Runs one lifecycle step per invocation against the on-disk cache store.
//! Results go to stdout as JSON, logs to stderr.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use larder_client::{
    Clients, FetchClient, FetchConfig, FetchRequest, LifecycleController, RegistryClient, WorkerConfig, WorkerState,
};
use larder_core::{AppConfig, CacheDb, RegisterRequest};
use reqwest::{Method, Url};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "larder")]
#[command(about = "Offline cache agent and push subscription client")]
#[command(version)]
struct Cli {
    /// Cache generation to operate on (overrides `cache_version`)
    #[arg(long, global = true)]
    cache_version: Option<String>,

    /// Origin seed paths resolve against (overrides `origin`)
    #[arg(long, global = true)]
    origin: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the configured generation from the seed manifest
    Install,
    /// Make the installed generation current and evict the rest
    Activate {
        #[arg(long)]
        skip_waiting: bool,
    },
    /// Install if needed, then activate
    Update {
        #[arg(long)]
        skip_waiting: bool,
    },
    /// Fetch a URL through the interceptor
    Fetch {
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// List cache generations
    Generations,
    /// Register a push subscription with the registry
    Subscribe {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        p256dh: String,
        #[arg(long)]
        auth: String,
        #[arg(long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(version) = cli.cache_version {
        config.cache_version = version;
    }
    if let Some(origin) = cli.origin {
        config.origin = origin;
    }

    match cli.command {
        Command::Install => {
            let mut worker = open_worker(&config).await?;
            let entries = worker.install().await?;
            print_json(&json!({ "version": worker.version(), "state": worker.state().to_string(), "entries": entries }))
        }
        Command::Activate { skip_waiting } => {
            let mut worker = open_worker(&config).await?;
            if skip_waiting {
                worker.skip_waiting();
            }
            let report = worker.activate().await?;
            print_json(&json!({
                "version": report.version,
                "evicted": report.evicted,
                "failed": report.failed,
                "claimed": report.claimed,
            }))
        }
        Command::Update { skip_waiting } => {
            let mut worker = open_worker(&config).await?;
            if skip_waiting {
                worker.skip_waiting();
            }
            let state = worker.update().await?;
            print_json(&json!({ "version": worker.version(), "state": state.to_string() }))
        }
        Command::Fetch { url, method } => fetch(&config, &url, &method).await,
        Command::Generations => {
            let store = open_store(&config).await?;
            let generations = store.generations().await?;
            let mut rows = Vec::with_capacity(generations.len());
            for generation in generations {
                let entries = store.entry_count(&generation.version).await?;
                rows.push(json!({
                    "version": generation.version,
                    "status": generation.status,
                    "created_at": generation.created_at,
                    "activated_at": generation.activated_at,
                    "entries": entries,
                }));
            }
            print_json(&json!(rows))
        }
        Command::Subscribe { endpoint, p256dh, auth, username } => {
            let client = RegistryClient::from_app(&config)?;
            let request = RegisterRequest {
                endpoint: Some(endpoint),
                keys: Some(json!({ "p256dh": p256dh, "auth": auth })),
                username,
            };
            client.register(&request).await?;
            print_json(&json!({ "success": true }))
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<CacheDb> {
    CacheDb::open(&config.cache_db_path)
        .await
        .with_context(|| format!("opening {}", config.cache_db_path.display()))
}

async fn open_worker(config: &AppConfig) -> Result<LifecycleController> {
    let store = open_store(config).await?;
    let network = Arc::new(FetchClient::new(FetchConfig::from_app(config))?);
    let worker = LifecycleController::new(store, network, Clients::new(), WorkerConfig::from_app(config)?).await?;
    Ok(worker)
}

async fn fetch(config: &AppConfig, url: &str, method: &str) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).context("invalid method")?;
    let worker = open_worker(config).await?;
    if worker.state() != WorkerState::Active {
        tracing::info!(version = worker.version(), state = %worker.state(), "generation not active, fetching directly");
    }

    let origin = Url::parse(&config.origin).with_context(|| format!("invalid origin {}", config.origin))?;
    let url = larder_client::fetch::resolve(&origin, url)?;
    let served = worker.handle_fetch(&FetchRequest::new(method, url)).await?;

    tracing::info!(status = served.response.status.as_u16(), source = ?served.source, "served");
    std::io::stdout().write_all(&served.response.bytes)?;
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
