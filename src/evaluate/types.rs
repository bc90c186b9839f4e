//! Evaluation request and response types

use crate::dedupe::{DuplicateMatch, DuplicateReason};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

/// A video submitted to a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub campaign_id: String,

    #[serde(alias = "url")]
    pub video_url: String,

    /// Explicit URLs to compare against
    #[serde(default, alias = "urls")]
    pub candidates: Vec<String>,

    /// Campaign brief the alignment judge checks against
    #[serde(alias = "brief")]
    pub descripcion: String,

    /// Campaign end date; registered for retention when the video is kept
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn check_url(field: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| Error::InvalidRequest(format!("{} is not a valid URL ({}): {}", field, e, raw)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidRequest(format!(
            "{} must be http(s), got '{}'",
            field, other
        ))),
    }
}

impl EvaluateRequest {
    pub fn validate(&self) -> Result<()> {
        if self.campaign_id.trim().is_empty() {
            return Err(Error::InvalidRequest("campaign_id is empty".to_string()));
        }
        check_url("video_url", &self.video_url)?;
        for candidate in &self.candidates {
            check_url("candidate", candidate)?;
        }
        Ok(())
    }
}

/// Result of the alignment judgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub approved: bool,
    pub match_percent: f64,
    pub reasons: String,
}

impl Alignment {
    /// A non-approved result explaining why no judgment was made
    pub fn rejected(reasons: impl Into<String>) -> Self {
        Self {
            approved: false,
            match_percent: 0.0,
            reasons: reasons.into(),
        }
    }
}

/// External work consumed by one evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub llm_calls: u32,
    pub embedding_calls: u32,
    pub transcription_seconds: f64,
    pub degraded_path: bool,
}

/// Evaluation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub duplicated: bool,
    pub duplicate_reason: Option<DuplicateReason>,
    pub duplicate_candidate_url: Option<String>,
    pub alignment: Option<Alignment>,
    pub cost: CostReport,
}

impl EvaluateResponse {
    pub fn duplicate(found: DuplicateMatch, cost: CostReport) -> Self {
        Self {
            duplicated: true,
            duplicate_reason: Some(found.reason),
            duplicate_candidate_url: Some(found.candidate_url),
            alignment: None,
            cost,
        }
    }

    pub fn judged(alignment: Alignment, cost: CostReport) -> Self {
        Self {
            duplicated: false,
            duplicate_reason: None,
            duplicate_candidate_url: None,
            alignment: Some(alignment),
            cost,
        }
    }
}
