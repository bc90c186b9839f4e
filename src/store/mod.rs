//! Two-tier feature store
//!
//! The fast tier is an in-process cache; the durable tier (SQLite) is the
//! source of truth. Reads fall through to the durable tier and write the hit
//! back to the fast tier. Writes happen only through [`FeatureStore::put`].

mod fast;

pub use fast::FastTier;

use crate::config::StoreConfig;
use crate::db::{FeatureDb, FeatureRow};
use crate::error::{Error, Result};
use crate::fingerprint::{
    pack_fingerprint, pack_sequence, unpack_fingerprint, unpack_sequence, VideoFeatures,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Content-addressed identity of a video URL
pub fn video_id_for(url: &str) -> String {
    blake3::hash(url.as_bytes()).to_hex().to_string()
}

/// Features of a persisted video
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub video_id: String,
    pub campaign_id: String,
    pub url: String,
    pub features: VideoFeatures,
    pub created_at: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn new(campaign_id: &str, url: &str, features: VideoFeatures) -> Self {
        Self {
            video_id: video_id_for(url),
            campaign_id: campaign_id.to_string(),
            url: url.to_string(),
            features,
            created_at: Utc::now(),
        }
    }

    pub fn to_row(&self) -> FeatureRow {
        let packed = pack_sequence(&self.features.sequence);
        FeatureRow {
            video_id: self.video_id.clone(),
            campaign_id: self.campaign_id.clone(),
            url: self.url.clone(),
            fingerprint: self.features.fingerprint.as_ref().map(pack_fingerprint),
            sequence: packed.bytes,
            seq_rows: packed.rows as i64,
            seq_cols: packed.cols as i64,
            duration_seconds: self.features.duration_secs,
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    pub fn from_row(row: &FeatureRow) -> Result<Self> {
        let fingerprint = row
            .fingerprint
            .as_deref()
            .map(unpack_fingerprint)
            .transpose()?;
        let sequence = unpack_sequence(&row.sequence, row.seq_rows as u32, row.seq_cols as u32)?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Packing(format!("invalid created_at '{}': {}", row.created_at, e)))?;

        Ok(Self {
            video_id: row.video_id.clone(),
            campaign_id: row.campaign_id.clone(),
            url: row.url.clone(),
            features: VideoFeatures {
                fingerprint,
                sequence,
                duration_secs: row.duration_seconds,
            },
            created_at,
        })
    }
}

/// Feature store over a fast tier and an optional durable tier
pub struct FeatureStore {
    fast: FastTier,
    durable: Option<FeatureDb>,
}

impl FeatureStore {
    pub fn new(fast: FastTier, durable: Option<FeatureDb>) -> Self {
        Self { fast, durable }
    }

    pub fn from_config(config: &StoreConfig, durable: Option<FeatureDb>) -> Self {
        let fast = FastTier::new(
            config.fast_capacity,
            Duration::from_secs(config.fast_ttl_hours * 3600),
            config.recency_index_max,
        );
        let durable = if config.durable_enabled { durable } else { None };
        Self::new(fast, durable)
    }

    pub fn durable(&self) -> Option<&FeatureDb> {
        self.durable.as_ref()
    }

    pub fn fast(&self) -> &FastTier {
        &self.fast
    }

    /// Look up a URL, fast tier first.
    ///
    /// A durable hit is written back to the fast tier. Durable failures are
    /// logged and read as a miss.
    pub async fn get(&self, campaign_id: &str, url: &str) -> Option<FeatureRecord> {
        if let Some(row) = self.fast.get(campaign_id, url) {
            return decode(&row);
        }

        let db = self.durable.as_ref()?;
        let row = match db.get_feature_by_url(url).await {
            Ok(row) => row?,
            Err(e) => {
                let e = Error::DurableUnavailable(e.to_string());
                warn!(url, error = %e, "Durable lookup failed, continuing with fast tier only");
                return None;
            }
        };

        debug!(campaign_id, url, "Durable hit, repopulating fast tier");
        let record = decode(&row)?;
        if row.campaign_id == campaign_id {
            self.fast.backfill(row);
        } else {
            self.fast.alias(campaign_id, &Arc::new(row));
        }
        Some(record)
    }

    /// Persist a record: always to the fast tier, and idempotently to the
    /// durable tier when configured.
    ///
    /// Returns whether the durable tier gained a new row.
    pub async fn put(&self, record: &FeatureRecord) -> bool {
        let row = record.to_row();
        let inserted = match &self.durable {
            Some(db) => match db.insert_feature(&row).await {
                Ok(inserted) => inserted,
                Err(e) => {
                    let e = Error::DurableUnavailable(e.to_string());
                    warn!(url = %record.url, error = %e, "Durable write failed, kept in fast tier only");
                    false
                }
            },
            None => false,
        };
        self.fast.insert(row);
        inserted
    }

    /// The campaign's most recent records, newest first.
    ///
    /// Falls back to the durable tier when the fast tier knows nothing about
    /// the campaign, writing the rows back.
    pub async fn recent(&self, campaign_id: &str, limit: usize) -> Vec<FeatureRecord> {
        if limit == 0 {
            return Vec::new();
        }

        let cached = self.fast.recent(campaign_id, limit);
        if !cached.is_empty() {
            return cached.iter().filter_map(|row| decode(row)).collect();
        }

        let Some(db) = &self.durable else {
            return Vec::new();
        };

        let rows = match db.recent_features(campaign_id, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                let e = Error::DurableUnavailable(e.to_string());
                warn!(campaign_id, error = %e, "Durable recency lookup failed");
                return Vec::new();
            }
        };

        debug!(campaign_id, count = rows.len(), "Loaded recency window from durable tier");
        let records: Vec<FeatureRecord> = rows.iter().filter_map(decode).collect();
        // Oldest first so the newest ends up at the front
        for row in rows.into_iter().rev() {
            self.fast.insert(row);
        }
        records
    }

    /// Forget a campaign's records in the fast tier
    pub fn evict_campaign(&self, campaign_id: &str, video_ids: &[String]) {
        self.fast.evict_campaign(campaign_id, video_ids);
    }
}

fn decode(row: &FeatureRow) -> Option<FeatureRecord> {
    match FeatureRecord::from_row(row) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(url = %row.url, error = %e, "Skipping undecodable feature row");
            None
        }
    }
}
