//! Filesystem keyframe cache
//!
//! Layout: `<root>/<video_id>/000.jpg, 001.jpg, ...`

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct KeyframeCache {
    root: PathBuf,
}

impl KeyframeCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, video_id: &str) -> Result<PathBuf> {
        let valid = !video_id.is_empty()
            && video_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidRequest(format!("invalid video id: {:?}", video_id)));
        }
        Ok(self.root.join(video_id))
    }

    /// Write frames, replacing whatever was cached for the video
    pub async fn save(&self, video_id: &str, frames: &[Vec<u8>]) -> Result<()> {
        let dir = self.dir_for(video_id)?;
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;

        for (i, frame) in frames.iter().enumerate() {
            tokio::fs::write(dir.join(format!("{:03}.jpg", i)), frame).await?;
        }
        debug!(video_id, frames = frames.len(), "Cached keyframes");
        Ok(())
    }

    /// Cached frames in order; empty when nothing is cached
    pub async fn load(&self, video_id: &str, limit: Option<usize>) -> Result<Vec<Vec<u8>>> {
        let dir = self.dir_for(video_id)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".jpg") {
                names.push(name);
            }
        }
        names.sort();
        if let Some(limit) = limit {
            names.truncate(limit);
        }

        let mut frames = Vec::with_capacity(names.len());
        for name in names {
            frames.push(tokio::fs::read(dir.join(name)).await?);
        }
        Ok(frames)
    }

    /// Remove a video's frames. Returns `false` when nothing was cached.
    pub async fn remove(&self, video_id: &str) -> Result<bool> {
        let dir = self.dir_for(video_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
