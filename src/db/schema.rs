//! SQLite schema definition

/// SQL schema for the durable tier
pub const SCHEMA_SQL: &str = r#"
-- Video features: one row per URL, written once
CREATE TABLE IF NOT EXISTS video_features (
    url TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    fingerprint BLOB,
    sequence BLOB NOT NULL,
    seq_rows INTEGER NOT NULL,
    seq_cols INTEGER NOT NULL,
    duration_seconds REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Campaign retention: governs video_features lifetime
CREATE TABLE IF NOT EXISTS campaign_retention (
    campaign_id TEXT PRIMARY KEY,
    end_date TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Budget counters: per campaign, per UTC day
CREATE TABLE IF NOT EXISTS budget_counters (
    campaign_id TEXT NOT NULL,
    day_bucket TEXT NOT NULL,
    usd_spent REAL NOT NULL DEFAULT 0,
    llm_calls INTEGER NOT NULL DEFAULT 0,
    embedding_calls INTEGER NOT NULL DEFAULT 0,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (campaign_id, day_bucket)
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_features_campaign ON video_features(campaign_id, created_at);
CREATE INDEX IF NOT EXISTS idx_features_video ON video_features(video_id);
CREATE INDEX IF NOT EXISTS idx_retention_end ON campaign_retention(end_date);
"#;
