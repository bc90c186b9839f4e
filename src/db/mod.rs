//! Durable tier using SQLite
//!
//! This module handles all persistent state:
//! - Video features (packed fingerprints, one row per URL)
//! - Campaign retention markers
//! - Budget counters (per campaign, per UTC day)

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info};

/// Date format used for retention end dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A persisted video features row
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct FeatureRow {
    pub video_id: String,
    pub campaign_id: String,
    pub url: String,
    pub fingerprint: Option<Vec<u8>>,
    pub sequence: Vec<u8>,
    pub seq_rows: i64,
    pub seq_cols: i64,
    pub duration_seconds: f64,
    pub created_at: String,
}

/// A campaign retention marker
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignRetention {
    pub campaign_id: String,
    pub end_date: String,
    pub updated_at: String,
}

impl CampaignRetention {
    pub fn end_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.end_date, DATE_FORMAT)
            .map_err(|e| Error::Other(format!("Invalid end_date '{}': {}", self.end_date, e)))
    }
}

/// Budget counters for one campaign day
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, PartialEq)]
pub struct BudgetRow {
    pub campaign_id: String,
    pub day_bucket: String,
    pub usd_spent: f64,
    pub llm_calls: i64,
    pub embedding_calls: i64,
    pub expires_at: i64,
}

/// Durable tier handle
#[derive(Clone)]
pub struct FeatureDb {
    pool: SqlitePool,
}

impl FeatureDb {
    /// Connect to the database configured in `config.paths.db_file`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::connect_path(&config.paths.db_file).await
    }

    /// Connect to a database file, creating it if needed
    pub async fn connect_path(db_path: &Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='video_features'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    // ===== Feature Operations =====

    /// Insert a features row unless the URL is already present.
    ///
    /// Returns `true` when this call created the row.
    pub async fn insert_feature(&self, row: &FeatureRow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO video_features
                (url, video_id, campaign_id, fingerprint, sequence, seq_rows, seq_cols, duration_seconds, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&row.url)
        .bind(&row.video_id)
        .bind(&row.campaign_id)
        .bind(&row.fingerprint)
        .bind(&row.sequence)
        .bind(row.seq_rows)
        .bind(row.seq_cols)
        .bind(row.duration_seconds)
        .bind(&row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Get features by URL
    pub async fn get_feature_by_url(&self, url: &str) -> Result<Option<FeatureRow>> {
        let row = sqlx::query_as::<_, FeatureRow>("SELECT * FROM video_features WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Most recent features of a campaign, newest first
    pub async fn recent_features(&self, campaign_id: &str, limit: usize) -> Result<Vec<FeatureRow>> {
        let rows = sqlx::query_as::<_, FeatureRow>(
            r#"
            SELECT * FROM video_features
            WHERE campaign_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(campaign_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Count features rows for a campaign
    pub async fn count_features(&self, campaign_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM video_features WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Delete every features row of a campaign, returning their video ids
    pub async fn delete_features_for_campaign(&self, campaign_id: &str) -> Result<Vec<String>> {
        let ids: Vec<(String,)> =
            sqlx::query_as("DELETE FROM video_features WHERE campaign_id = ? RETURNING video_id")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    // ===== Retention Operations =====

    /// Register or move a campaign's end date
    pub async fn upsert_retention(&self, campaign_id: &str, end_date: NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_retention (campaign_id, end_date, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(campaign_id) DO UPDATE SET
                end_date = excluded.end_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(end_date.format(DATE_FORMAT).to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_retention(&self, campaign_id: &str) -> Result<Option<CampaignRetention>> {
        let row = sqlx::query_as::<_, CampaignRetention>(
            "SELECT * FROM campaign_retention WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Campaigns whose end date is strictly before `today`
    pub async fn expired_campaigns(&self, today: NaiveDate) -> Result<Vec<CampaignRetention>> {
        let rows = sqlx::query_as::<_, CampaignRetention>(
            "SELECT * FROM campaign_retention WHERE end_date < ? ORDER BY end_date",
        )
        .bind(today.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_retention(&self, campaign_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM campaign_retention WHERE campaign_id = ?")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Budget Operations =====

    /// Atomically add to a day bucket and push its expiry forward
    pub async fn add_budget(
        &self,
        campaign_id: &str,
        day_bucket: &str,
        usd: f64,
        llm_calls: i64,
        embedding_calls: i64,
        expires_at: i64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query("DELETE FROM budget_counters WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO budget_counters
                (campaign_id, day_bucket, usd_spent, llm_calls, embedding_calls, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(campaign_id, day_bucket) DO UPDATE SET
                usd_spent = usd_spent + excluded.usd_spent,
                llm_calls = llm_calls + excluded.llm_calls,
                embedding_calls = embedding_calls + excluded.embedding_calls,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(campaign_id)
        .bind(day_bucket)
        .bind(usd)
        .bind(llm_calls)
        .bind(embedding_calls)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Live counters of a day bucket
    pub async fn get_budget(&self, campaign_id: &str, day_bucket: &str, now: i64) -> Result<Option<BudgetRow>> {
        let row = sqlx::query_as::<_, BudgetRow>(
            r#"
            SELECT * FROM budget_counters
            WHERE campaign_id = ? AND day_bucket = ? AND expires_at > ?
            "#,
        )
        .bind(campaign_id)
        .bind(day_bucket)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub async fn setup_test_db() -> (FeatureDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = FeatureDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        (db, tmp)
    }

    /// Make every feature query fail while the rest of the schema keeps working
    pub async fn drop_features_table(db: &FeatureDb) {
        sqlx::query("DROP TABLE video_features")
            .execute(&db.pool)
            .await
            .unwrap();
    }

    pub fn row(campaign_id: &str, url: &str, created_at: &str) -> FeatureRow {
        FeatureRow {
            video_id: format!("vid-{}", url),
            campaign_id: campaign_id.to_string(),
            url: url.to_string(),
            fingerprint: Some(vec![0xAB; 8]),
            sequence: vec![1; 16],
            seq_rows: 2,
            seq_cols: 64,
            duration_seconds: 12.5,
            created_at: created_at.to_string(),
        }
    }
}
