//! Retention cleaner
//!
//! Campaigns whose end date has passed lose their stored features, cached
//! keyframes and retention marker. Each step is best effort; a failure is
//! counted and logged and the sweep moves on.

use crate::config::RetentionConfig;
use crate::db::FeatureDb;
use crate::error::Result;
use crate::keyframes::KeyframeCache;
use crate::store::FeatureStore;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Sweeps never run more often than this
const MIN_INTERVAL_MINUTES: u64 = 5;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub campaigns: usize,
    pub records_deleted: usize,
    pub keyframe_dirs_removed: usize,
    pub errors: usize,
    /// Shutdown arrived before every expired campaign was purged
    #[serde(default)]
    pub interrupted: bool,
}

pub struct RetentionCleaner {
    db: FeatureDb,
    store: Arc<FeatureStore>,
    keyframes: Option<KeyframeCache>,
    interval: Duration,
}

impl RetentionCleaner {
    pub fn new(
        db: FeatureDb,
        store: Arc<FeatureStore>,
        keyframes: Option<KeyframeCache>,
        config: &RetentionConfig,
    ) -> Self {
        let minutes = config.cleanup_interval_min.max(MIN_INTERVAL_MINUTES);
        Self {
            db,
            store,
            keyframes,
            interval: Duration::from_secs(minutes * 60),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Purge every campaign whose end date is before `today`
    pub async fn sweep_once(&self, today: NaiveDate) -> Result<CleanupStats> {
        self.sweep(today, None).await
    }

    /// Like [`sweep_once`](Self::sweep_once), but stops before the next
    /// campaign once `shutdown` turns true. A campaign is never left half purged.
    pub async fn sweep_until(
        &self,
        today: NaiveDate,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CleanupStats> {
        self.sweep(today, Some(shutdown)).await
    }

    async fn sweep(
        &self,
        today: NaiveDate,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<CleanupStats> {
        let expired = self.db.expired_campaigns(today).await?;
        let mut stats = CleanupStats::default();

        for campaign in &expired {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                stats.interrupted = true;
                info!(
                    purged = stats.campaigns,
                    remaining = expired.len() - stats.campaigns,
                    "Shutdown requested, stopping retention sweep"
                );
                break;
            }
            self.purge(&campaign.campaign_id, &mut stats).await;
            stats.campaigns += 1;
        }

        if stats.campaigns > 0 {
            info!(
                campaigns = stats.campaigns,
                records = stats.records_deleted,
                keyframe_dirs = stats.keyframe_dirs_removed,
                errors = stats.errors,
                "Retention sweep complete"
            );
        } else {
            debug!(%today, "No expired campaigns");
        }
        Ok(stats)
    }

    async fn purge(&self, campaign_id: &str, stats: &mut CleanupStats) {
        let video_ids = match self.db.delete_features_for_campaign(campaign_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(campaign_id, error = %e, "Could not delete campaign features");
                stats.errors += 1;
                Vec::new()
            }
        };
        stats.records_deleted += video_ids.len();

        if let Some(cache) = &self.keyframes {
            for video_id in &video_ids {
                match cache.remove(video_id).await {
                    Ok(true) => stats.keyframe_dirs_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(campaign_id, video_id = %video_id, error = %e, "Could not remove keyframes");
                        stats.errors += 1;
                    }
                }
            }
        }

        self.store.evict_campaign(campaign_id, &video_ids);

        if let Err(e) = self.db.delete_retention(campaign_id).await {
            warn!(campaign_id, error = %e, "Could not delete retention marker");
            stats.errors += 1;
        }
        debug!(campaign_id, records = video_ids.len(), "Purged campaign");
    }

    /// Sweep every interval until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Retention cleaner started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let today = Utc::now().date_naive();
            if let Err(e) = self.sweep_until(today, &shutdown).await {
                warn!(error = %e, "Retention sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Retention cleaner stopped");
    }
}
