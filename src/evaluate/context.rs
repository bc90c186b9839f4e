//! Per-request state: scratch space and memoized intermediate results

use super::types::{CostReport, EvaluateRequest};
use super::{Collaborators, EvaluatorSettings};
use crate::collab::LocalVideo;
use crate::error::{Error, Result};
use crate::fingerprint::VideoFeatures;
use crate::keyframes::KeyframeCache;
use crate::store::video_id_for;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Request-scoped working directory, removed on drop
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(work_dir: &Path) -> Result<Self> {
        let path = work_dir.join(format!("req_{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Could not remove scratch directory");
            }
        }
    }
}

/// Everything computed for the video under evaluation.
///
/// Each intermediate is produced at most once per request.
pub struct RequestContext<'a> {
    collab: &'a Collaborators,
    settings: &'a EvaluatorSettings,
    keyframe_cache: Option<&'a KeyframeCache>,
    pub request: &'a EvaluateRequest,
    pub video_id: String,
    scratch: ScratchDir,
    video: Option<LocalVideo>,
    features: Option<VideoFeatures>,
    keyframes: Option<Vec<Vec<u8>>>,
    transcript: Option<Option<String>>,
    pub cost: CostReport,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        request: &'a EvaluateRequest,
        collab: &'a Collaborators,
        settings: &'a EvaluatorSettings,
        keyframe_cache: Option<&'a KeyframeCache>,
    ) -> Result<Self> {
        Ok(Self {
            collab,
            settings,
            keyframe_cache,
            request,
            video_id: video_id_for(&request.video_url),
            scratch: ScratchDir::create(&settings.work_dir)?,
            video: None,
            features: None,
            keyframes: None,
            transcript: None,
            cost: CostReport::default(),
        })
    }

    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }

    /// Download the video under evaluation; failure aborts the request
    pub async fn ensure_video(&mut self) -> Result<&LocalVideo> {
        if self.video.is_none() {
            let url = &self.request.video_url;
            let video = self
                .collab
                .downloader
                .fetch(
                    url,
                    self.scratch.path(),
                    self.settings.download_max_mb,
                    self.settings.download_timeout,
                )
                .await
                .map_err(|e| Error::BaseDownload(format!("{}: {}", url, e)))?;
            self.video = Some(video);
        }
        self.video
            .as_ref()
            .ok_or_else(|| Error::Other("video missing after download".to_string()))
    }

    pub async fn ensure_features(&mut self) -> Result<&VideoFeatures> {
        if self.features.is_none() {
            let collab = self.collab;
            let video = self.ensure_video().await?;
            let features = collab.hasher.compute(&video.path).await?;
            self.features = Some(features);
        }
        self.features
            .as_ref()
            .ok_or_else(|| Error::Other("features missing after hashing".to_string()))
    }

    /// Keyframes from the cache when present, otherwise sampled from the video
    pub async fn ensure_keyframes(&mut self) -> Result<&[Vec<u8>]> {
        if self.keyframes.is_none() {
            let limit = self.settings.frames_max;
            let cached = match self.keyframe_cache {
                Some(cache) => cache
                    .load(&self.video_id, Some(limit))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(video_id = %self.video_id, error = %e, "Keyframe cache unreadable");
                        Vec::new()
                    }),
                None => Vec::new(),
            };

            let frames = if cached.is_empty() {
                let collab = self.collab;
                let video = self.ensure_video().await?;
                collab.keyframes.sample(video, limit).await?
            } else {
                debug!(video_id = %self.video_id, frames = cached.len(), "Keyframe cache hit");
                cached
            };
            self.keyframes = Some(frames);
        }
        Ok(self.keyframes.as_deref().unwrap_or_default())
    }

    /// Transcript of the audio track, when enabled and intelligible
    pub async fn ensure_transcript(&mut self) -> Option<String> {
        if self.transcript.is_none() {
            let text = self.transcribe().await;
            self.transcript = Some(text);
        }
        self.transcript.clone().flatten()
    }

    async fn transcribe(&mut self) -> Option<String> {
        if !self.settings.audio_enabled {
            return None;
        }
        let collab = self.collab;
        let (Some(audio), Some(transcriber)) = (&collab.audio, &collab.transcriber) else {
            return None;
        };

        let audio_dir = self.scratch.path().join("audio");
        let video = match self.ensure_video().await {
            Ok(video) => video,
            Err(e) => {
                warn!(error = %e, "No video for transcription");
                return None;
            }
        };
        let track = match audio.extract_audio(video, &audio_dir).await {
            Ok(Some(track)) => track,
            Ok(None) => return None,
            Err(e) => {
                warn!(url = %self.request.video_url, error = %e, "Audio extraction failed");
                return None;
            }
        };
        self.cost.transcription_seconds += track.duration_secs;

        match transcriber.transcribe(&track).await {
            Ok(text) => text.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!(url = %self.request.video_url, error = %e, "Transcription failed, continuing without transcript");
                None
            }
        }
    }
}
