//! shellcache - keeps the back-office app shell usable when the origin is down.
//!
//! `shellcache serve` runs a local proxy in front of the origin. Static
//! assets are answered from the cache, pages are fetched fresh and cached
//! for later, and when the origin is unreachable the last good copy (or an
//! offline page) is served instead.

mod server;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shellcache_core::cache::CacheStorage;
use shellcache_core::deploy::{DeploymentEnv, FindingLevel};
use shellcache_core::net::{Fetcher, HttpFetcher, Request};
use shellcache_core::worker::{FetchOutcome, StartReport};
use shellcache_core::{CacheWorker, Config, WorkerSettings};

/// Log file prefix inside `<cache dir>/logs`
const LOG_FILE: &str = "shellcache.log";

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline app-shell proxy for the Skanda back-office")]
#[command(version)]
struct Cli {
    /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the offline proxy in front of the origin
    Serve {
        /// Local port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Origin to proxy, e.g. http://127.0.0.1:5000
        #[arg(short, long)]
        origin: Option<String>,
    },
    /// Pre-cache the static assets and retire older cache versions
    Install,
    /// Show the worker phase and cache generations
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Resolve one URL through the worker and print the response body
    Fetch {
        url: String,

        /// Treat the request as a page load
        #[arg(long)]
        navigate: bool,
    },
    /// Delete every cache generation owned by this app
    Clear,
    /// Check the deployment environment of the origin app
    Doctor,
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g., RUST_LOG=shellcache_core=debug).
/// When `log_dir` is given, logs are also written to a daily rolling file;
/// the returned guard must be held until exit so the file is flushed.
fn init_tracing(default_level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => Config::load(),
    }
}

fn build_worker(config: &Config) -> Result<CacheWorker<HttpFetcher>> {
    let settings = WorkerSettings::from_config(config)?;
    let fetcher = HttpFetcher::new(config.request_timeout_secs.map(Duration::from_secs))?;
    let cache_dir = config.cache_dir()?;
    let storage = CacheStorage::open(&cache_dir)
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;
    Ok(CacheWorker::new(settings, fetcher, Arc::new(storage)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let _guard = match &cli.command {
        Command::Serve { .. } => {
            let log_dir = config.cache_dir()?.join("logs");
            init_tracing("info", Some(&log_dir))
        }
        _ => init_tracing("warn", None),
    };

    match cli.command {
        Command::Serve { port, origin } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(origin) = origin {
                config.origin = origin;
            }
            serve(config).await
        }
        Command::Install => install(config).await,
        Command::Status { json } => status(config, json).await,
        Command::Fetch { url, navigate } => fetch(config, &url, navigate).await,
        Command::Clear => clear(config).await,
        Command::Doctor => doctor(),
    }
}

async fn serve(config: Config) -> Result<()> {
    let worker = Arc::new(build_worker(&config)?);
    match worker.start().await? {
        StartReport::Restored => info!(version = %worker.settings().version, "Restored cache"),
        StartReport::Installed { install, activation } => info!(
            cached = install.cached.len(),
            failed = install.failed.len(),
            deleted = activation.deleted.len(),
            "Installed cache"
        ),
    }
    server::run_server(worker, config.port).await
}

async fn install(config: Config) -> Result<()> {
    let worker = build_worker(&config)?;
    let install = worker.install().await?;
    let activation = worker.activate().await?;

    println!(
        "Cached {} of {} assets into {}",
        install.cached.len(),
        install.cached.len() + install.failed.len(),
        worker.settings().static_generation()
    );
    for url in &install.failed {
        println!("  failed: {}", url);
    }
    for name in &activation.deleted {
        println!("Deleted {}", name);
    }
    Ok(())
}

async fn status(config: Config, json: bool) -> Result<()> {
    let worker = build_worker(&config)?;
    let status = worker.status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Origin:  {}", status.origin);
    println!("Version: {}", status.version);
    println!("Cache:   {}", worker.storage().root().display());
    println!();
    if status.generations.is_empty() {
        println!("No cache generations");
    }
    for generation in &status.generations {
        println!(
            "{:<40} {:>6} entries  {:<8} {}",
            generation.name,
            generation.entries,
            if generation.current { "current" } else { "stale" },
            generation.last_updated
        );
    }
    Ok(())
}

async fn fetch(config: Config, url: &str, navigate: bool) -> Result<()> {
    let worker = build_worker(&config)?;
    worker.start().await?;

    let url = worker
        .settings()
        .origin
        .join(url)
        .with_context(|| format!("Invalid URL: {}", url))?;
    let request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };

    let response = match worker.handle_fetch(&request).await {
        FetchOutcome::Respond { response, source } => {
            eprintln!("{} {} ({:?})", response.status, response.status_text, source);
            response
        }
        FetchOutcome::Passthrough(reason) => {
            eprintln!("not intercepted ({:?})", reason);
            let response = worker.fetcher().fetch(&request).await?;
            eprintln!("{} {} (passthrough)", response.status, response.status_text);
            response
        }
    };
    println!("{}", response.text());
    Ok(())
}

async fn clear(config: Config) -> Result<()> {
    let worker = build_worker(&config)?;
    let deleted = worker.clear().await?;
    if deleted.is_empty() {
        println!("Nothing to clear");
    }
    for name in deleted {
        println!("Deleted {}", name);
    }
    Ok(())
}

fn doctor() -> Result<()> {
    let env = DeploymentEnv::from_env();
    for finding in env.findings() {
        let marker = match finding.level {
            FindingLevel::Ok => "ok   ",
            FindingLevel::Warn => "warn ",
            FindingLevel::Error => "error",
        };
        println!("[{}] {}", marker, finding.message);
    }
    if !env.is_deployable() {
        bail!("Deployment environment is incomplete");
    }
    Ok(())
}
