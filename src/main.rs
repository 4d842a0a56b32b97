//! tierfetch
//!
//! Command-line front-end for the tiered image loader.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           tierfetch                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   FastTier   │───▶│  Persistent  │───▶│    Origin    │       │
//! │  │    (RAM)     │    │    (disk)    │    │    (HTTP)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          ▲                   ▲                   │               │
//! │          └───────────────────┴──── back-fill ────┘               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tierfetch::adapters::{CompositeEventPublisher, LoggingEventPublisher};
use tierfetch::cache::{
    escape_key, CacheClearer, FastTier, HttpOriginFetcher, InMemoryTier, PersistentTier,
    TieredResolver,
};
use tierfetch::domain::ports::{EventPublisher, Tier};
use tierfetch::server::{run_server, AppState};
use tierfetch::LoaderConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered image loader - memory, disk and network with back-fill
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TIERFETCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Persistent cache directory
    #[arg(long, env = "TIERFETCH_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Fast tier budget in bytes (default: derived from system memory)
    #[arg(long, env = "TIERFETCH_FAST_CAPACITY_BYTES", global = true)]
    fast_capacity_bytes: Option<u64>,

    /// Origin request timeout in seconds
    #[arg(long, env = "TIERFETCH_FETCH_TIMEOUT_SECS", global = true)]
    fetch_timeout_secs: Option<u64>,

    /// Keep the persistent tier in memory instead of on disk
    #[arg(long, env = "TIERFETCH_EPHEMERAL", global = true)]
    ephemeral: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one or more keys and print one JSON line per key
    Fetch {
        /// Keys (URLs) to resolve
        #[arg(required = true)]
        keys: Vec<String>,

        /// Write each payload into this directory
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Purge the persistent and fast tiers
    Clear,

    /// Serve images over HTTP
    Serve {
        /// Bind address
        #[arg(long, env = "TIERFETCH_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,
    },

    /// Print persistent tier statistics
    Stats,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting tierfetch");
    info!("  Cache directory: {}", config.persistent.root.display());
    info!("  Fast tier budget: {} bytes", config.fast.capacity_bytes);
    info!("  Origin timeout: {:?}", config.origin.timeout);
    info!("  Ephemeral: {}", args.ephemeral);

    let stack = Stack::build(&config, args.ephemeral)?;

    match args.command {
        Command::Fetch { keys, output } => fetch(&stack, keys, output.as_deref()).await,
        Command::Clear => {
            let report = stack.clearer.clear_all().await;
            println!("{}", serde_json::to_string(&report)?);
            if !report.is_clean() {
                bail!("cache clear finished with {} error(s)", report.errors.len());
            }
            Ok(())
        }
        Command::Serve { addr } => {
            let state = Arc::new(AppState::new(stack.resolver.clone(), stack.clearer.clone())?);
            run_server(&addr, state, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await?;

            info!("Waiting for background writes");
            stack.resolver.wait_for_backfills().await;
            info!("Shutdown complete");
            Ok(())
        }
        Command::Stats => {
            let stats = match &stack.disk {
                Some(disk) => Some(disk.stats().await?),
                None => None,
            };
            println!(
                "{}",
                json!({
                    "persistent": stats,
                    "root": config.persistent.root,
                    "fast_capacity_bytes": config.fast.capacity_bytes,
                })
            );
            Ok(())
        }
    }
}

// =============================================================================
// Composition
// =============================================================================

struct Stack {
    resolver: TieredResolver,
    clearer: CacheClearer,
    disk: Option<PersistentTier>,
}

impl Stack {
    fn build(config: &LoaderConfig, ephemeral: bool) -> anyhow::Result<Self> {
        let fast = Arc::new(FastTier::with_config(config.fast.clone()));

        let disk = if ephemeral {
            None
        } else {
            Some(
                PersistentTier::with_config(config.persistent.clone())
                    .context("failed to set up persistent tier")?,
            )
        };
        let persistent: Arc<dyn Tier> = match &disk {
            Some(disk) => Arc::new(disk.clone()),
            None => Arc::new(InMemoryTier::default()),
        };

        let origin = Arc::new(
            HttpOriginFetcher::with_config(config.origin.clone())
                .context("failed to set up origin fetcher")?,
        );

        let events: Arc<dyn EventPublisher> = Arc::new(
            CompositeEventPublisher::new().with_publisher(LoggingEventPublisher::debug_level()),
        );

        // Payloads stored without an image check cannot be checked on the way out
        let mut resolver_config = config.resolver.clone();
        resolver_config.verify_persistent &= config.origin.verify_image;

        let resolver = TieredResolver::builder(fast.clone(), persistent.clone(), origin)
            .events(events.clone())
            .config(resolver_config)
            .build();
        let clearer = CacheClearer::new(persistent, fast).with_events(events);

        Ok(Self {
            resolver,
            clearer,
            disk,
        })
    }
}

fn load_config(args: &Args) -> anyhow::Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LoaderConfig::default(),
    };

    if let Some(dir) = &args.cache_dir {
        config.persistent.root = dir.clone();
    }
    if let Some(bytes) = args.fast_capacity_bytes {
        config.fast.capacity_bytes = bytes;
    }
    if let Some(secs) = args.fetch_timeout_secs {
        config.origin.timeout = Duration::from_secs(secs);
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn fetch(stack: &Stack, keys: Vec<String>, output: Option<&Path>) -> anyhow::Result<()> {
    if let Some(dir) = output {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut tasks = JoinSet::new();
    for key in keys {
        let resolver = stack.resolver.clone();
        tasks.spawn(async move {
            let result = resolver.resolve(&key).await;
            (key, result)
        });
    }

    let mut failures = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (key, result) = joined.context("fetch task failed")?;
        match result {
            Ok(image) => {
                let file = match output {
                    Some(dir) => {
                        let name = format!("{}.{}", escape_key(&key)?, image.format().extension());
                        let path = dir.join(name);
                        tokio::fs::write(&path, image.payload())
                            .await
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        Some(path)
                    }
                    None => None,
                };
                println!(
                    "{}",
                    json!({
                        "key": key,
                        "source": image.source(),
                        "bytes": image.len(),
                        "format": image.format().to_string(),
                        "latency_ms": image.latency().as_millis() as u64,
                        "file": file,
                    })
                );
            }
            Err(e) => {
                failures += 1;
                println!(
                    "{}",
                    json!({
                        "key": key,
                        "error": e.to_string(),
                        "kind": e.kind(),
                    })
                );
            }
        }
    }

    stack.resolver.wait_for_backfills().await;

    if failures > 0 {
        bail!("{} key(s) could not be resolved", failures);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
