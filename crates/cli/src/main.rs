//! `taskloom` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    start the scheduler, in-process executors and the HTTP API.
//! - `migrate`  run pending database migrations.
//! - `validate` validate a workflow definition file.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{resolve_order, validate_workflow, Services, SystemClock, Workflow, WorkflowTask};
use executor::{HandlerRegistry, Worker};
use queue::InMemoryQueue;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "taskloom", about = "Multi-tenant workflow scheduler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler, executor workers and the REST API.
    Serve {
        /// YAML configuration file.
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Overrides `bind` from the configuration file.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition file (YAML or JSON).
    Validate {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve { config, bind } => {
            let config = match config {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::default(),
            };
            serve(config, bind).await
        }
        Command::Migrate { database_url } => {
            let config = db::PoolConfig { max_connections: 2, ..db::PoolConfig::new(database_url) };
            db::pool::connect(&config).await?;
            info!("migrations applied");
            Ok(())
        }
        Command::Validate { path } => validate(&path),
    }
}

async fn serve(config: AppConfig, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let addr: SocketAddr = match bind {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .with_context(|| format!("invalid bind address '{}'", config.bind))?,
    };

    let stores = db::StoreRegistry::with_defaults()
        .create(&config.store.kind, &config.store.config)
        .await?;
    let queue = Arc::new(InMemoryQueue::new());
    let services = Arc::new(Services::new(
        stores,
        queue.clone(),
        Arc::new(SystemClock),
        config.scheduler.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = services.start(shutdown_rx.clone()).await?;
    let worker = Worker::new(queue.clone(), HandlerRegistry::with_builtins());
    handles.extend(worker.spawn(&config.executor, shutdown_rx.clone()));

    let api = tokio::spawn(api::serve(addr, api::AppState::new(services), shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    shutdown_tx.send(true).ok();
    queue.close().await;

    match api.await {
        Ok(Err(e)) => warn!(error = %e, "http api stopped with an error"),
        Err(e) => warn!(error = %e, "http api task panicked"),
        Ok(Ok(())) => {}
    }
    for handle in handles {
        handle.await.ok();
    }
    Ok(())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both.
    let workflow: Workflow = serde_yaml::from_str(&content)
        .with_context(|| format!("{} is not a workflow definition", path.display()))?;

    if let Err(e) = validate_workflow(&workflow) {
        eprintln!("{}: invalid [{}] {e}", workflow.id(), e.code());
        std::process::exit(1);
    }
    let enabled: Vec<WorkflowTask> = workflow.enabled_tasks().cloned().collect();
    let order: Vec<&str> = resolve_order(&enabled)?
        .into_iter()
        .map(|t| t.name.as_str())
        .collect();
    println!("{}: valid, execution order: {}", workflow.id(), order.join(", "));
    Ok(())
}
