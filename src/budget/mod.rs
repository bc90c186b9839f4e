//! Per-campaign daily budget guardrail
//!
//! Counters live in UTC day buckets (`YYYYMMDD`) and expire a fixed time after
//! their last write. `decide` is read-only; `commit` is the only writer.

use crate::config::BudgetConfig;
use crate::db::FeatureDb;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// External calls requested or consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub llm: u32,
    pub emb: u32,
}

impl Usage {
    pub fn llm(calls: u32) -> Self {
        Self { llm: calls, emb: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.llm == 0 && self.emb == 0
    }
}

/// Counters of one campaign day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub campaign_id: String,
    pub day_bucket: String,
    pub usd_spent: f64,
    pub llm_calls: u64,
    pub embedding_calls: u64,
}

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetDecision {
    Allow,
    Degrade,
}

/// UTC day bucket for a timestamp
pub fn day_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

/// Storage for budget counters
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Current counters; zeroes for an absent or expired bucket
    async fn load(&self, campaign_id: &str, day_bucket: &str) -> Result<BudgetSnapshot>;

    /// Atomically add to a bucket and reset its expiry to `ttl` from now
    async fn add(
        &self,
        campaign_id: &str,
        day_bucket: &str,
        usd: f64,
        usage: Usage,
        ttl: Duration,
    ) -> Result<()>;
}

/// Process-local ledger
#[derive(Default)]
pub struct MemoryLedger {
    buckets: Mutex<HashMap<(String, String), (BudgetSnapshot, std::time::Instant)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetLedger for MemoryLedger {
    async fn load(&self, campaign_id: &str, day_bucket: &str) -> Result<BudgetSnapshot> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let key = (campaign_id.to_string(), day_bucket.to_string());
        let now = std::time::Instant::now();

        Ok(match buckets.get(&key) {
            Some((snapshot, expires)) if *expires > now => snapshot.clone(),
            _ => BudgetSnapshot {
                campaign_id: campaign_id.to_string(),
                day_bucket: day_bucket.to_string(),
                ..Default::default()
            },
        })
    }

    async fn add(
        &self,
        campaign_id: &str,
        day_bucket: &str,
        usd: f64,
        usage: Usage,
        ttl: Duration,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = std::time::Instant::now();
        buckets.retain(|_, (_, expires)| *expires > now);

        let (snapshot, expires) = buckets
            .entry((campaign_id.to_string(), day_bucket.to_string()))
            .or_insert_with(|| {
                (
                    BudgetSnapshot {
                        campaign_id: campaign_id.to_string(),
                        day_bucket: day_bucket.to_string(),
                        ..Default::default()
                    },
                    now,
                )
            });
        snapshot.usd_spent += usd;
        snapshot.llm_calls += usage.llm as u64;
        snapshot.embedding_calls += usage.emb as u64;
        *expires = now + ttl;
        Ok(())
    }
}

/// Ledger shared across processes through the SQLite database
pub struct SqliteLedger {
    db: FeatureDb,
}

impl SqliteLedger {
    pub fn new(db: FeatureDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BudgetLedger for SqliteLedger {
    async fn load(&self, campaign_id: &str, day_bucket: &str) -> Result<BudgetSnapshot> {
        let row = self
            .db
            .get_budget(campaign_id, day_bucket, Utc::now().timestamp())
            .await?;

        Ok(match row {
            Some(row) => BudgetSnapshot {
                campaign_id: row.campaign_id,
                day_bucket: row.day_bucket,
                usd_spent: row.usd_spent,
                llm_calls: row.llm_calls.max(0) as u64,
                embedding_calls: row.embedding_calls.max(0) as u64,
            },
            None => BudgetSnapshot {
                campaign_id: campaign_id.to_string(),
                day_bucket: day_bucket.to_string(),
                ..Default::default()
            },
        })
    }

    async fn add(
        &self,
        campaign_id: &str,
        day_bucket: &str,
        usd: f64,
        usage: Usage,
        ttl: Duration,
    ) -> Result<()> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        self.db
            .add_budget(
                campaign_id,
                day_bucket,
                usd,
                usage.llm as i64,
                usage.emb as i64,
                expires_at,
            )
            .await
    }
}

/// Daily cost and call caps per campaign
#[derive(Clone)]
pub struct BudgetGuardrail {
    ledger: Arc<dyn BudgetLedger>,
    config: BudgetConfig,
}

impl BudgetGuardrail {
    pub fn new(ledger: Arc<dyn BudgetLedger>, config: BudgetConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.counter_ttl_hours * 3600)
    }

    /// Today's counters
    pub async fn snapshot(&self, campaign_id: &str) -> Result<BudgetSnapshot> {
        self.ledger.load(campaign_id, &day_bucket(Utc::now())).await
    }

    /// Degrade when any projected counter would exceed its cap.
    ///
    /// An unreadable ledger degrades.
    pub async fn decide(&self, campaign_id: &str, est_usd: f64, need: Usage) -> BudgetDecision {
        if !self.config.enabled {
            return BudgetDecision::Allow;
        }

        let snapshot = match self.snapshot(campaign_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(campaign_id, error = %e, "Budget ledger unreadable, degrading");
                return BudgetDecision::Degrade;
            }
        };

        let decision = self.decide_from(&snapshot, est_usd, need);
        debug!(
            campaign_id,
            usd_spent = snapshot.usd_spent,
            llm_calls = snapshot.llm_calls,
            embedding_calls = snapshot.embedding_calls,
            est_usd,
            ?decision,
            "Budget decision"
        );
        decision
    }

    fn decide_from(&self, snapshot: &BudgetSnapshot, est_usd: f64, need: Usage) -> BudgetDecision {
        let over_usd = snapshot.usd_spent + est_usd > self.config.usd_day_cap;
        let over_llm = snapshot.llm_calls + need.llm as u64 > self.config.max_llm_calls as u64;
        let over_emb =
            snapshot.embedding_calls + need.emb as u64 > self.config.max_emb_calls as u64;

        if over_usd || over_llm || over_emb {
            BudgetDecision::Degrade
        } else {
            BudgetDecision::Allow
        }
    }

    /// Record consumed work. Callers commit each unit of work exactly once.
    pub async fn commit(&self, campaign_id: &str, spent_usd: f64, used: Usage) -> Result<()> {
        if spent_usd <= 0.0 && used.is_empty() {
            return Ok(());
        }

        self.ledger
            .add(
                campaign_id,
                &day_bucket(Utc::now()),
                spent_usd,
                used,
                self.ttl(),
            )
            .await?;
        info!(campaign_id, spent_usd, llm = used.llm, emb = used.emb, "Committed budget usage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use chrono::TimeZone;

    fn guardrail(config: BudgetConfig) -> BudgetGuardrail {
        BudgetGuardrail::new(Arc::new(MemoryLedger::new()), config)
    }

    #[test]
    fn test_day_bucket_is_utc_date() {
        let t = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(day_bucket(t), "20260309");
    }

    #[tokio::test]
    async fn test_usd_cap() {
        let guard = guardrail(BudgetConfig::default());

        assert_eq!(guard.decide("camp", 0.02, Usage::llm(1)).await, BudgetDecision::Allow);

        guard.commit("camp", 4.99, Usage::default()).await.unwrap();
        assert_eq!(guard.decide("camp", 0.02, Usage::llm(1)).await, BudgetDecision::Degrade);

        // Other campaigns are unaffected
        assert_eq!(guard.decide("other", 0.02, Usage::llm(1)).await, BudgetDecision::Allow);
    }

    #[tokio::test]
    async fn test_llm_cap_is_monotonic() {
        let config = BudgetConfig {
            max_llm_calls: 3,
            ..Default::default()
        };
        let guard = guardrail(config);

        for _ in 0..3 {
            assert_eq!(guard.decide("camp", 0.0, Usage::llm(1)).await, BudgetDecision::Allow);
            guard.commit("camp", 0.0, Usage::llm(1)).await.unwrap();
        }
        assert_eq!(guard.snapshot("camp").await.unwrap().llm_calls, 3);
        assert_eq!(guard.decide("camp", 0.0, Usage::llm(1)).await, BudgetDecision::Degrade);
    }

    #[tokio::test]
    async fn test_embedding_cap() {
        let config = BudgetConfig {
            max_emb_calls: 1,
            ..Default::default()
        };
        let guard = guardrail(config);
        let need = Usage { llm: 0, emb: 2 };
        assert_eq!(guard.decide("camp", 0.0, need).await, BudgetDecision::Degrade);
    }

    #[tokio::test]
    async fn test_disabled_always_allows() {
        let config = BudgetConfig {
            enabled: false,
            usd_day_cap: 0.0,
            ..Default::default()
        };
        let guard = guardrail(config);
        assert_eq!(guard.decide("camp", 1.0, Usage::llm(5)).await, BudgetDecision::Allow);
    }

    #[tokio::test]
    async fn test_memory_ledger_expiry() {
        let ledger = MemoryLedger::new();
        ledger
            .add("camp", "20260101", 1.0, Usage::llm(1), Duration::from_millis(0))
            .await
            .unwrap();
        let snapshot = ledger.load("camp", "20260101").await.unwrap();
        assert_eq!(snapshot.llm_calls, 0);
        assert_eq!(snapshot.usd_spent, 0.0);
    }

    #[tokio::test]
    async fn test_sqlite_ledger() {
        let (db, _tmp) = setup_test_db().await;
        let guard = BudgetGuardrail::new(Arc::new(SqliteLedger::new(db)), BudgetConfig::default());

        guard.commit("camp", 0.04, Usage::llm(2)).await.unwrap();
        guard.commit("camp", 0.02, Usage::llm(1)).await.unwrap();

        let snapshot = guard.snapshot("camp").await.unwrap();
        assert_eq!(snapshot.llm_calls, 3);
        assert!((snapshot.usd_spent - 0.06).abs() < 1e-9);
    }
}
