//! Feedstore binary entry point
//!
//! Opens (creating and migrating if needed) the store of one identity and
//! reports its contents.

use anyhow::Context;
use feedstore::config::LoggingConfig;
use feedstore::{Database, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Open the identity's store
/// 4. Log table statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let config = StoreConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);
    feedstore::metrics::init_metrics();
    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        read_connections = config.storage.read_connections,
        "Configuration loaded"
    );

    let identity = std::env::args()
        .nth(1)
        .context("usage: feedstore <identity>")?;
    let passphrase = std::env::var("FEEDSTORE_PASSPHRASE").unwrap_or_default();

    // 3. Open the store
    let db = Database::open_identity(&identity, &passphrase, &config)
        .await
        .with_context(|| format!("failed to open store for {identity}"))?;

    // 4. Report
    let stats = db.stats().await?;
    tracing::info!(
        identity = %identity,
        path = %db.path().display(),
        accounts = stats.accounts,
        statuses = stats.statuses,
        timelines = stats.timelines,
        timeline_statuses = stats.timeline_statuses,
        context_statuses = stats.context_statuses,
        filters = stats.filters,
        "Store ready"
    );
    tracing::debug!(metrics = %feedstore::metrics::encode_metrics(), "Metrics snapshot");

    Ok(())
}

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("feedstore={}", logging.level).into());

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
