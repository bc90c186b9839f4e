//! Custom error types for reelcheck

use thiserror::Error;

/// Main error type for reelcheck operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Durable tier unavailable: {0}")]
    DurableUnavailable(String),

    /// The video under evaluation could not be fetched; no judgment is possible.
    #[error("Base video download failed: {0}")]
    BaseDownload(String),

    /// A comparison candidate could not be fetched; the candidate is skipped.
    #[error("Candidate download failed: {0}")]
    CandidateDownload(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Packing error: {0}")]
    Packing(String),

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Judge error: {0}")]
    Judge(String),

    #[error("Malformed judge output: {0}")]
    MalformedJudgeOutput(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort an evaluation request instead of being
    /// converted into a well-formed response.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BaseDownload(_) | Error::InvalidRequest(_) | Error::Config(_)
        )
    }
}

/// Result type alias for reelcheck
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::BaseDownload("gone".into()).is_fatal());
        assert!(Error::InvalidRequest("bad url".into()).is_fatal());
        assert!(!Error::CandidateDownload("gone".into()).is_fatal());
        assert!(!Error::Summarizer("timeout".into()).is_fatal());
        assert!(!Error::MalformedJudgeOutput("{".into()).is_fatal());
        assert!(!Error::DurableUnavailable("locked".into()).is_fatal());
    }
}
