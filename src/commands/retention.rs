//! Retention commands implementation

use crate::config::Config;
use crate::db::FeatureDb;
use crate::error::Result;
use crate::keyframes::KeyframeCache;
use crate::retention::{CleanupStats, RetentionCleaner};
use crate::store::FeatureStore;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

async fn open_cleaner(config: &Config) -> Result<RetentionCleaner> {
    let db = FeatureDb::connect(config).await?;
    db.init_schema().await?;
    let store = Arc::new(FeatureStore::from_config(&config.store, Some(db.clone())));
    let keyframes = config
        .media
        .keyframe_cache_enabled
        .then(|| KeyframeCache::new(config.paths.keyframes_dir.clone()));
    Ok(RetentionCleaner::new(db, store, keyframes, &config.retention))
}

/// Run one sweep as of `today` (defaults to the current UTC date)
pub async fn cmd_retention_sweep(config: &Config, today: Option<NaiveDate>) -> Result<CleanupStats> {
    let today = today.unwrap_or_else(|| Utc::now().date_naive());
    info!(%today, "Running retention sweep");
    open_cleaner(config).await?.sweep_once(today).await
}

/// Sweep periodically until interrupted
pub async fn cmd_retention_watch(config: &Config) -> Result<()> {
    let cleaner = open_cleaner(config).await?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current campaign");
            let _ = tx.send(true);
        }
    });

    cleaner.run(rx).await;
    Ok(())
}

/// Register or move a campaign's end date
pub async fn cmd_retention_set(config: &Config, campaign_id: &str, end_date: NaiveDate) -> Result<()> {
    let db = FeatureDb::connect(config).await?;
    db.init_schema().await?;
    db.upsert_retention(campaign_id, end_date).await?;
    info!(campaign_id, %end_date, "Retention registered");
    Ok(())
}

pub fn print_cleanup_stats(stats: &CleanupStats) {
    println!("\n✓ Retention sweep complete");
    println!("  Campaigns purged: {}", stats.campaigns);
    println!("  Records deleted: {}", stats.records_deleted);
    println!("  Keyframe dirs removed: {}", stats.keyframe_dirs_removed);
    if stats.interrupted {
        println!("  Interrupted before all expired campaigns were purged");
    }
    if stats.errors > 0 {
        println!("  Errors: {} (see log)", stats.errors);
    }
}
