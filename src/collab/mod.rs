//! External collaborators used by the evaluator
//!
//! Each concern is a trait so the evaluator can be built with production
//! implementations (HTTP, yt-dlp, ffmpeg, OpenAI-compatible APIs) or with
//! in-process fakes.

mod download;
mod ffmpeg;
mod llm;

pub use download::{HttpDownloader, YtDlpDownloader};
pub use ffmpeg::{FfmpegAudio, FfmpegDecoder, FfmpegKeyframes};
pub use llm::{parse_verdict, LlmClient};

use crate::config::{Config, DownloadBackend};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A downloaded video on local disk
#[derive(Debug, Clone)]
pub struct LocalVideo {
    pub url: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// An extracted audio track
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// Structured description of a video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredSummary {
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub heard_phrases: Vec<String>,
    #[serde(default)]
    pub layout_hints: serde_json::Map<String, serde_json::Value>,
}

/// What the summarizer produced
#[derive(Debug, Clone, PartialEq)]
pub enum VideoSummary {
    Narrative(String),
    Structured(StructuredSummary),
}

/// Summaries passed to the judge are capped at this many characters
const SUMMARY_TEXT_LIMIT: usize = 6000;

impl VideoSummary {
    /// Text handed to the alignment judge
    pub fn to_prompt_text(&self) -> String {
        let text = match self {
            VideoSummary::Narrative(text) => text.clone(),
            VideoSummary::Structured(summary) => {
                serde_json::to_string(summary).unwrap_or_else(|_| summary.narrative.clone())
            }
        };
        text.chars().take(SUMMARY_TEXT_LIMIT).collect()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            VideoSummary::Narrative(text) => text.trim().is_empty(),
            VideoSummary::Structured(summary) => {
                summary.narrative.trim().is_empty() && summary.events.is_empty()
            }
        }
    }
}

/// Alignment judgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub approved: bool,
    pub match_percent: f64,
    pub reasons: String,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` into `dest_dir`, failing past `size_limit_mb` or `timeout`
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        size_limit_mb: u64,
        timeout: Duration,
    ) -> Result<LocalVideo>;
}

#[async_trait]
pub trait KeyframeExtractor: Send + Sync {
    /// Up to `max_frames` JPEG stills in temporal order
    async fn sample(&self, video: &LocalVideo, max_frames: usize) -> Result<Vec<Vec<u8>>>;
}

#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// `None` when the video has no usable audio
    async fn extract_audio(&self, video: &LocalVideo, dest_dir: &Path) -> Result<Option<AudioTrack>>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `None` when nothing intelligible was transcribed
    async fn transcribe(&self, audio: &AudioTrack) -> Result<Option<String>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, frames: &[Vec<u8>], transcript: Option<&str>) -> Result<VideoSummary>;
}

#[async_trait]
pub trait AlignmentJudge: Send + Sync {
    async fn judge(&self, brief: &str, summary: &VideoSummary, approval_threshold: f64) -> Result<Verdict>;
}

/// Production collaborators built from configuration
pub struct ProductionCollaborators {
    pub downloader: Arc<dyn Downloader>,
    pub decoder: Arc<FfmpegDecoder>,
    pub keyframes: Arc<dyn KeyframeExtractor>,
    pub audio: Arc<dyn AudioExtractor>,
    pub llm: Arc<LlmClient>,
}

impl ProductionCollaborators {
    pub fn from_config(config: &Config) -> Result<Self> {
        let downloader: Arc<dyn Downloader> = match config.download.backend_kind()? {
            DownloadBackend::Http => Arc::new(HttpDownloader::new(&config.download.user_agent)?),
            DownloadBackend::YtDlp => Arc::new(YtDlpDownloader::new(&config.download.yt_dlp_path)),
        };
        let decoder = Arc::new(FfmpegDecoder::new(
            &config.media.ffmpeg_path,
            &config.media.ffprobe_path,
        ));
        let keyframes = Arc::new(FfmpegKeyframes::new(
            decoder.clone(),
            config.media.keyframe_width,
            config.media.jpeg_quality,
        ));
        let audio = Arc::new(FfmpegAudio::new(
            &config.media.ffmpeg_path,
            config.media.audio_sample_rate,
        ));
        let llm = Arc::new(LlmClient::new(&config.llm)?);

        Ok(Self {
            downloader,
            decoder,
            keyframes,
            audio,
            llm,
        })
    }
}
