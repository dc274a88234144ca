//! fiskusd - Fiskus background daemon
//!
//! Keeps fiscal days on schedule for every registered device: opens
//! them after midnight, closes them before the next one starts, renews
//! device sessions and mirrors device status into storage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{DaemonConfig, StorageConfig};
use fiskus_device::{Daywatch, DaywatchConfig, DeviceRegistry, SimulatedDevice};
use fiskus_store::memory::InMemoryFiskusStore;
use fiskus_store::postgres::PostgresFiskusStore;
use fiskus_store::{DeviceStore, JournalStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

/// Fiskus Daemon CLI
#[derive(Parser)]
#[command(name = "fiskusd")]
#[command(about = "Fiskus daemon - fiscal day scheduling service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FISKUS_CONFIG")]
    config: Option<String>,

    /// Storage backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto)]
    storage: StorageMode,

    /// PostgreSQL url for document, device and journal persistence.
    #[arg(long, env = "FISKUS_DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds between daywatch sweeps, overriding the configuration file.
    #[arg(long, env = "FISKUS_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Log level
    #[arg(long, env = "FISKUS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "FISKUS_LOG_JSON")]
    json: bool,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.storage = resolve_storage(
        cli.storage,
        cli.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok()),
        config.storage,
    )?;
    if let Some(secs) = cli.sweep_interval_secs {
        config.daywatch.sweep_interval_secs = secs;
    }

    // Print startup banner
    println!(
        r#"
  _____ ___ ____  _  ___   _ ____
 |  ___|_ _/ ___|| |/ / | | / ___|
 | |_   | |\___ \| ' /| | | \___ \
 |  _|  | | ___) | . \| |_| |___) |
 |_|   |___|____/|_|\_\\___/|____/

  Fiskus - fiscal day scheduling daemon
  Version: {}
  Storage: {}
  Sweep interval: {}s
"#,
        env!("CARGO_PKG_VERSION"),
        config.storage.mode(),
        config.daywatch.sweep_interval_secs
    );

    let (devices, journal) = build_storage(&config.storage).await?;
    let link = Arc::new(SimulatedDevice::new());
    let registry = Arc::new(DeviceRegistry::new(devices, journal, link));
    let daywatch = Daywatch::new(
        registry,
        DaywatchConfig {
            open_window_minutes: config.daywatch.open_window_minutes,
            close_window_minutes: config.daywatch.close_window_minutes,
        },
    );

    if cli.once {
        let report = daywatch.sweep(Utc::now()).await?;
        info!(
            devices = report.devices,
            opened = report.opened,
            closed = report.closed,
            failures = report.failures,
            "sweep complete"
        );
        return Ok(());
    }

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.daywatch.sweep_interval_secs));
    info!(
        interval_secs = config.daywatch.sweep_interval_secs,
        "daywatch running"
    );
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match daywatch.sweep(Utc::now()).await {
                    Ok(report) if report.devices == 0 => {
                        debug!("no devices registered, nothing to sweep");
                    }
                    Ok(report) => {
                        info!(
                            devices = report.devices,
                            opened = report.opened,
                            closed = report.closed,
                            sessions_renewed = report.sessions_renewed,
                            statuses_checked = report.statuses_checked,
                            failures = report.failures,
                            "daywatch sweep complete"
                        );
                    }
                    Err(e) => error!(error = %e, "daywatch sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

fn resolve_storage(
    mode: StorageMode,
    database_url: Option<String>,
    file: StorageConfig,
) -> anyhow::Result<StorageConfig> {
    match (mode, database_url) {
        (StorageMode::Memory, _) => Ok(StorageConfig::Memory),
        (StorageMode::Auto | StorageMode::Postgres, Some(url)) => Ok(match file {
            StorageConfig::Postgres {
                max_connections,
                connect_timeout_secs,
                ..
            } => StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            },
            StorageConfig::Memory => StorageConfig::postgres(url),
        }),
        (StorageMode::Postgres, None) => match file {
            postgres @ StorageConfig::Postgres { .. } => Ok(postgres),
            StorageConfig::Memory => anyhow::bail!(
                "storage mode `postgres` requires --database-url, FISKUS_DATABASE_URL or a postgres storage section"
            ),
        },
        (StorageMode::Auto, None) => Ok(file),
    }
}

async fn build_storage(
    storage: &StorageConfig,
) -> anyhow::Result<(Arc<dyn DeviceStore>, Arc<dyn JournalStore>)> {
    match storage {
        StorageConfig::Memory => {
            let store = Arc::new(InMemoryFiskusStore::new());
            Ok((store.clone(), store))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = PostgresFiskusStore::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await
            .context("connecting to postgres")?;
            let store = Arc::new(store);
            Ok((store.clone(), store))
        }
    }
}
