//! Fast (in-process) tier of the feature store

use crate::db::FeatureRow;
use moka::sync::Cache;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Bounded, expiring cache of packed feature rows.
///
/// Holds `video_id -> row`, `(campaign_id, url) -> video_id` and a per-campaign
/// recency list of video ids, newest first.
pub struct FastTier {
    records: Cache<String, Arc<FeatureRow>>,
    urls: Cache<(String, String), String>,
    recency: Mutex<HashMap<String, VecDeque<String>>>,
    recency_max: usize,
}

impl FastTier {
    pub fn new(capacity: u64, ttl: Duration, recency_max: usize) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            urls: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            recency: Mutex::new(HashMap::new()),
            recency_max,
        }
    }

    pub fn get(&self, campaign_id: &str, url: &str) -> Option<Arc<FeatureRow>> {
        let video_id = self.urls.get(&(campaign_id.to_string(), url.to_string()))?;
        self.records.get(&video_id)
    }

    /// Cache a row under its own campaign and push it to the front of that
    /// campaign's recency list
    pub fn insert(&self, row: FeatureRow) -> Arc<FeatureRow> {
        let row = self.backfill(row);

        let mut recency = self.recency.lock().unwrap_or_else(|e| e.into_inner());
        let ids = recency.entry(row.campaign_id.clone()).or_default();
        ids.retain(|id| id != &row.video_id);
        ids.push_front(row.video_id.clone());
        ids.truncate(self.recency_max);

        row
    }

    /// Cache a row for lookups without touching the recency list
    pub fn backfill(&self, row: FeatureRow) -> Arc<FeatureRow> {
        let row = Arc::new(row);
        self.records.insert(row.video_id.clone(), row.clone());
        self.urls.insert(
            (row.campaign_id.clone(), row.url.clone()),
            row.video_id.clone(),
        );
        row
    }

    /// Make a row reachable from another campaign's lookups
    pub fn alias(&self, campaign_id: &str, row: &Arc<FeatureRow>) {
        self.records.insert(row.video_id.clone(), row.clone());
        self.urls.insert(
            (campaign_id.to_string(), row.url.clone()),
            row.video_id.clone(),
        );
    }

    /// Up to `limit` of the campaign's newest rows still held in the cache
    pub fn recent(&self, campaign_id: &str, limit: usize) -> Vec<Arc<FeatureRow>> {
        let ids: Vec<String> = {
            let recency = self.recency.lock().unwrap_or_else(|e| e.into_inner());
            match recency.get(campaign_id) {
                Some(ids) => ids.iter().cloned().collect(),
                None => return Vec::new(),
            }
        };

        ids.iter()
            .filter_map(|id| self.records.get(id))
            .take(limit)
            .collect()
    }

    /// Drop a campaign's recency list and the given video ids
    pub fn evict_campaign(&self, campaign_id: &str, video_ids: &[String]) {
        let listed = {
            let mut recency = self.recency.lock().unwrap_or_else(|e| e.into_inner());
            recency.remove(campaign_id).unwrap_or_default()
        };

        for id in video_ids.iter().chain(listed.iter()) {
            if let Some(row) = self.records.get(id) {
                self.urls.invalidate(&(campaign_id.to_string(), row.url.clone()));
                self.urls.invalidate(&(row.campaign_id.clone(), row.url.clone()));
            }
            self.records.invalidate(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::row;

    fn tier() -> FastTier {
        FastTier::new(100, Duration::from_secs(3600), 3)
    }

    #[test]
    fn test_get_by_campaign_and_url() {
        let fast = tier();
        fast.insert(row("camp", "https://v/1", "t"));

        assert!(fast.get("camp", "https://v/1").is_some());
        assert!(fast.get("other", "https://v/1").is_none());
        assert!(fast.get("camp", "https://v/2").is_none());
    }

    #[test]
    fn test_recency_newest_first_and_bounded() {
        let fast = tier();
        for i in 0..5 {
            fast.insert(row("camp", &format!("https://v/{}", i), "t"));
        }
        // Re-inserting moves to front without duplicating
        fast.insert(row("camp", "https://v/3", "t"));

        let urls: Vec<_> = fast
            .recent("camp", 10)
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(urls, vec!["https://v/3", "https://v/4", "https://v/2"]);
        assert_eq!(fast.recent("camp", 2).len(), 2);
        assert!(fast.recent("nobody", 10).is_empty());
    }

    #[test]
    fn test_backfill_leaves_recency_alone() {
        let fast = tier();
        fast.insert(row("camp", "https://v/new", "t"));
        fast.backfill(row("camp", "https://v/old", "t"));

        assert!(fast.get("camp", "https://v/old").is_some());
        let urls: Vec<_> = fast
            .recent("camp", 10)
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(urls, vec!["https://v/new"]);
    }

    #[test]
    fn test_alias_and_evict() {
        let fast = tier();
        let stored = fast.insert(row("camp", "https://v/1", "t"));
        fast.alias("elsewhere", &stored);
        assert!(fast.get("elsewhere", "https://v/1").is_some());

        fast.evict_campaign("camp", &[stored.video_id.clone()]);
        assert!(fast.get("camp", "https://v/1").is_none());
        assert!(fast.get("elsewhere", "https://v/1").is_none());
        assert!(fast.recent("camp", 10).is_empty());
    }
}
