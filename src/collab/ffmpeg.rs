//! ffmpeg / ffprobe backed media tooling

use super::{AudioExtractor, AudioTrack, KeyframeExtractor, LocalVideo};
use crate::error::{Error, Result};
use crate::fingerprint::{FrameSource, VideoDecoder};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decodes single frames by seeking with `ffmpeg -ss`
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: &str, ffprobe: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
        }
    }

    fn probe_duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        if !path.is_file() {
            return Err(Error::Decode(format!("no such video: {}", path.display())));
        }
        let duration = self.probe_duration(path);
        debug!(path = %path.display(), ?duration, "Opened video");

        Ok(Box::new(FfmpegFrameSource {
            ffmpeg: self.ffmpeg.clone(),
            path: path.to_path_buf(),
            duration,
        }))
    }
}

/// One ffmpeg invocation per requested frame
struct FfmpegFrameSource {
    ffmpeg: String,
    path: PathBuf,
    duration: Option<f64>,
}

impl FrameSource for FfmpegFrameSource {
    fn duration_secs(&self) -> Option<f64> {
        self.duration
    }

    fn frame_at(&mut self, secs: f64) -> Option<DynamicImage> {
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.3}", secs))
            .arg("-i")
            .arg(&self.path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() || output.stdout.is_empty() {
            return None;
        }
        image::load_from_memory_with_format(&output.stdout, ImageFormat::Png).ok()
    }
}

/// Uniform timestamps across a known duration, frame centres
fn uniform_timestamps(duration: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| duration * (i as f64 + 0.5) / count as f64)
        .collect()
}

/// Resize to `width` keeping aspect ratio and encode as JPEG
pub fn encode_keyframe(frame: &DynamicImage, width: u32, quality: u8) -> Result<Vec<u8>> {
    let resized = if frame.width() > 0 && frame.width() != width {
        let height = ((frame.height() as u64 * width as u64) / frame.width() as u64).max(1) as u32;
        frame.resize_exact(width, height, FilterType::Triangle)
    } else {
        frame.clone()
    };

    let rgb = resized.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Samples keyframes through any [`VideoDecoder`]
pub struct FfmpegKeyframes {
    decoder: Arc<dyn VideoDecoder>,
    width: u32,
    quality: u8,
}

impl FfmpegKeyframes {
    pub fn new(decoder: Arc<dyn VideoDecoder>, width: u32, quality: u8) -> Self {
        Self {
            decoder,
            width,
            quality,
        }
    }
}

#[async_trait]
impl KeyframeExtractor for FfmpegKeyframes {
    async fn sample(&self, video: &LocalVideo, max_frames: usize) -> Result<Vec<Vec<u8>>> {
        let decoder = self.decoder.clone();
        let path = video.path.clone();
        let (width, quality) = (self.width, self.quality);

        tokio::task::spawn_blocking(move || {
            let mut source = decoder.open(&path)?;
            let timestamps = match source.duration_secs() {
                Some(duration) => uniform_timestamps(duration, max_frames),
                None => (0..max_frames).map(|i| i as f64).collect(),
            };

            let mut frames = Vec::with_capacity(max_frames);
            for t in timestamps {
                match source.frame_at(t) {
                    Some(frame) => frames.push(encode_keyframe(&frame, width, quality)?),
                    None if frames.is_empty() => continue,
                    None => break,
                }
            }
            debug!(path = %path.display(), frames = frames.len(), "Sampled keyframes");
            Ok::<_, Error>(frames)
        })
        .await?
    }
}

/// Extracts a mono WAV track for transcription
pub struct FfmpegAudio {
    ffmpeg: String,
    sample_rate: u32,
}

impl FfmpegAudio {
    pub fn new(ffmpeg: &str, sample_rate: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            sample_rate,
        }
    }
}

/// Canonical WAV header size
const WAV_HEADER_BYTES: u64 = 44;

#[async_trait]
impl AudioExtractor for FfmpegAudio {
    async fn extract_audio(&self, video: &LocalVideo, dest_dir: &Path) -> Result<Option<AudioTrack>> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let out = dest_dir.join("audio.wav");

        let status = tokio::process::Command::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(&video.path)
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(self.sample_rate.to_string())
            .args(["-f", "wav"])
            .arg(&out)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            warn!(url = %video.url, %status, "Audio extraction failed");
            return Ok(None);
        }

        let size = match tokio::fs::metadata(&out).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(None),
        };
        if size <= WAV_HEADER_BYTES {
            return Ok(None);
        }

        // 16-bit mono PCM
        let duration_secs = (size - WAV_HEADER_BYTES) as f64 / (self.sample_rate as f64 * 2.0);
        Ok(Some(AudioTrack {
            path: out,
            duration_secs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::test_support::{synthetic_frame, StaticFrames};

    struct FakeDecoder;

    impl VideoDecoder for FakeDecoder {
        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(StaticFrames {
                frames: (0..30).map(synthetic_frame).collect(),
                duration: Some(30.0),
            }))
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0"), None);
    }

    #[test]
    fn test_uniform_timestamps() {
        assert_eq!(uniform_timestamps(10.0, 4), vec![1.25, 3.75, 6.25, 8.75]);
        assert!(uniform_timestamps(10.0, 0).is_empty());
    }

    #[test]
    fn test_encode_keyframe_resizes_to_width() {
        let jpeg = encode_keyframe(&synthetic_frame(1), 45, 65).unwrap();
        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 45);
        assert_eq!(decoded.height(), 40);
    }

    #[tokio::test]
    async fn test_keyframes_sampled_uniformly() {
        let extractor = FfmpegKeyframes::new(Arc::new(FakeDecoder), 64, 65);
        let video = LocalVideo {
            url: "https://v/1".into(),
            path: PathBuf::from("/nonexistent.mp4"),
            size_bytes: 0,
        };
        let frames = extractor.sample(&video, 6).await.unwrap();
        assert_eq!(frames.len(), 6);
        assert!(frames.iter().all(|f| f.starts_with(&[0xFF, 0xD8])));
    }

    #[test]
    fn test_open_missing_file() {
        let decoder = FfmpegDecoder::new("ffmpeg", "ffprobe");
        assert!(matches!(
            decoder.open(Path::new("/definitely/not/here.mp4")),
            Err(Error::Decode(_))
        ));
    }
}
