use std::sync::Arc;

use anyhow::{Context, Result};
use betascan_core::normalize_name;
use betascan_storage::{InteractionSource, MemoryStore, PgStore, Store};
use betascan_sync::{
    build_reconciler, debug_matching, run_definition, ScanOverrides, ScanRegistry, ScanSummary,
    SyncConfig,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "betascan-cli")]
#[command(about = "Beta availability scanner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scan kind from scans.yaml and print its summary.
    Scan {
        kind: String,
        #[arg(long)]
        click_threshold: Option<i64>,
        #[arg(long)]
        max_apps: Option<usize>,
        #[arg(long)]
        notify_url: Option<String>,
        /// Use an empty in-memory store and send no notifications.
        #[arg(long)]
        dry_run: bool,
    },
    Serve,
    Migrate,
    /// Set the click count for one app name.
    Seed { name: String, clicks: i64 },
    /// Compare tracked click counts with the matching catalog.
    Matching,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Scan {
            kind,
            click_threshold,
            max_apps,
            notify_url,
            dry_run,
        } => {
            let config = SyncConfig::from_env();
            let registry = ScanRegistry::load(&config.scans_file).await?;
            let mut scan = registry
                .scan(&kind)
                .with_context(|| format!("unknown scan kind {kind}"))?
                .clone();
            let store: Arc<dyn Store> = if dry_run {
                scan.notify = false;
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(PgStore::connect(&config.database_url).await?)
            };
            let reconciler = build_reconciler(&config, store)?;
            let overrides = ScanOverrides {
                click_threshold,
                max_apps,
                notify_url,
            };
            let report = run_definition(&reconciler, &scan, &overrides)
                .await
                .with_context(|| format!("scan {kind} failed"))?;
            println!("{}", serde_json::to_string_pretty(&ScanSummary::from(&report))?);
        }
        Commands::Serve => betascan_web::serve_from_env().await?,
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await.context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Seed { name, clicks } => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url).await?;
            let name_key = normalize_name(&name);
            store.upsert_interaction(&name_key, &name, clicks).await?;
            println!("seeded {name_key} with {clicks} click(s)");
        }
        Commands::Matching => {
            let config = SyncConfig::from_env();
            let registry = ScanRegistry::load(&config.scans_file).await?;
            let scan = registry
                .matching_definition()
                .context("scans.yaml names no matching scan")?;
            let store = PgStore::connect(&config.database_url).await?;
            let reconciler = build_reconciler(&config, Arc::new(store))?;
            let report = debug_matching(&reconciler, scan).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// `RUST_LOG` filters; `BETASCAN_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let json = std::env::var("BETASCAN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
