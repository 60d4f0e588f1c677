use anyhow::{Context, Result};
use automation_scheduler::automation::{AutomationEngine, SysinfoSampler};
use automation_scheduler::config::{AppConfig, CliConfig, FileConfig};
use automation_scheduler::notifications::LoggingNotifier;
use automation_scheduler::server::{self, run_admin_server};
use automation_scheduler::store::SqliteExecutionStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the scheduler database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port the admin API listens on.
    #[clap(short, long, default_value_t = 3100)]
    pub port: u16,

    /// The address the admin API binds to.
    #[clap(long, default_value = "127.0.0.1")]
    pub bind_address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        port: cli_args.port,
        bind_address: cli_args.bind_address,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    info!(
        "Opening scheduler database at {:?}...",
        config.scheduler_db_path()
    );
    let store = Arc::new(SqliteExecutionStore::new(config.scheduler_db_path())?);

    let engine = AutomationEngine::new(
        config.scheduler.clone(),
        store,
        Arc::new(LoggingNotifier),
        Arc::new(SysinfoSampler::new()),
    )?;

    for job in &config.jobs {
        engine.register_job(job.to_definition()?)?;
        info!(
            "Registered job {} ({}, priority {})",
            job.name,
            job.schedule,
            job.priority.as_str()
        );
    }

    engine.start().await?;

    let shutdown = CancellationToken::new();
    let mut server_task = tokio::spawn(run_admin_server(
        engine.clone(),
        config.bind_address.clone(),
        config.port,
        shutdown.clone(),
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("Admin server exited"),
                Ok(Err(e)) => error!("Admin server failed: {:#}", e),
                Err(e) => error!("Admin server task panicked: {}", e),
            }
        }
    }

    shutdown.cancel();
    engine.stop().await;
    if !server_task.is_finished() {
        let _ = server_task.await;
    }

    info!("Shutdown complete");
    Ok(())
}
