//! Evaluate command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::evaluate::{EvaluateRequest, EvaluateResponse, Evaluator};
use chrono::NaiveDate;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Request fields given as command-line flags
#[derive(Debug, Clone, Default)]
pub struct RequestFlags {
    pub campaign_id: Option<String>,
    pub video_url: Option<String>,
    pub candidates: Vec<String>,
    pub brief: Option<String>,
    pub end_date: Option<NaiveDate>,
}

impl RequestFlags {
    pub fn into_request(self) -> Result<EvaluateRequest> {
        let missing = |flag: &str| Error::InvalidRequest(format!("--{} is required", flag));
        Ok(EvaluateRequest {
            campaign_id: self.campaign_id.ok_or_else(|| missing("campaign"))?,
            video_url: self.video_url.ok_or_else(|| missing("url"))?,
            candidates: self.candidates,
            descripcion: self.brief.ok_or_else(|| missing("brief"))?,
            end_date: self.end_date,
        })
    }
}

/// Read a JSON request from a file, or from stdin when the path is `-`
pub fn read_request(path: &Path) -> Result<EvaluateRequest> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    serde_json::from_str(&raw).map_err(|e| Error::InvalidRequest(format!("malformed request JSON: {}", e)))
}

/// Evaluate one video submission
pub async fn cmd_evaluate(config: &Config, request: EvaluateRequest) -> Result<EvaluateResponse> {
    info!(campaign_id = %request.campaign_id, url = %request.video_url, "Starting evaluation");
    let evaluator = Evaluator::from_config(config).await?;
    evaluator.evaluate(&request).await
}

pub fn print_evaluation(response: &EvaluateResponse) {
    if response.duplicated {
        println!("\n⚠ Duplicate");
        if let Some(reason) = &response.duplicate_reason {
            println!("  Reason: {}", reason);
        }
        if let Some(url) = &response.duplicate_candidate_url {
            println!("  Matches: {}", url);
        }
    } else if let Some(alignment) = &response.alignment {
        let verdict = if alignment.approved { "✓ Approved" } else { "✗ Not approved" };
        println!("\n{} ({:.0}% match)", verdict, alignment.match_percent);
        println!("  {}", alignment.reasons);
    }

    let cost = &response.cost;
    println!(
        "\nCost: {} LLM call(s), {:.1}s transcribed{}",
        cost.llm_calls,
        cost.transcription_seconds,
        if cost.degraded_path { ", degraded by budget" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_require_core_fields() {
        let flags = RequestFlags {
            campaign_id: Some("cmp".into()),
            video_url: Some("https://v/1".into()),
            ..Default::default()
        };
        assert!(matches!(flags.into_request(), Err(Error::InvalidRequest(_))));

        let flags = RequestFlags {
            campaign_id: Some("cmp".into()),
            video_url: Some("https://v/1".into()),
            brief: Some("Unboxing with voice-over".into()),
            candidates: vec!["https://v/2".into()],
            end_date: None,
        };
        let request = flags.into_request().unwrap();
        assert_eq!(request.descripcion, "Unboxing with voice-over");
        assert_eq!(request.candidates, vec!["https://v/2"]);
    }

    #[test]
    fn test_read_request_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("req.json");
        std::fs::write(
            &path,
            r#"{"campaign_id": "c", "video_url": "https://v/1", "descripcion": "brief"}"#,
        )
        .unwrap();
        let request = read_request(&path).unwrap();
        assert!(request.candidates.is_empty());

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_request(&path), Err(Error::InvalidRequest(_))));
    }
}
