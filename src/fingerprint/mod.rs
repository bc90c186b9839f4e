//! Perceptual video fingerprints
//!
//! Frames are hashed with a gradient hash: each frame is reduced to a
//! (size+1)×size grayscale grid and every bit records whether a pixel is
//! brighter than its left neighbour. A whole video is summarised either by a
//! bitwise majority vote over sampled frames (`Fingerprint`) or by the ordered
//! per-frame hashes (`SequenceFingerprint`).

mod pack;

pub use pack::*;

use crate::config::FingerprintConfig;
use crate::error::Result;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Side length of the hash grid
pub const HASH_SIZE: u32 = 8;

/// Number of bits in a fingerprint
pub const FINGERPRINT_BITS: u32 = HASH_SIZE * HASH_SIZE;

/// A 64-bit perceptual hash.
///
/// Bit `i` of the row-major hash grid lives at `1 << (63 - i)`, so the
/// big-endian byte form is the MSB-first packing of the bit vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Build from a row-major bit vector; bits past 64 are ignored
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut raw = 0u64;
        for (i, bit) in bits.iter().take(FINGERPRINT_BITS as usize).enumerate() {
            if *bit {
                raw |= 1u64 << (63 - i);
            }
        }
        Self(raw)
    }

    pub fn bit(&self, i: usize) -> bool {
        i < FINGERPRINT_BITS as usize && self.0 & (1u64 << (63 - i)) != 0
    }

    pub fn hamming(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Ordered per-frame hashes of a video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceFingerprint {
    frames: Vec<Fingerprint>,
}

impl SequenceFingerprint {
    pub fn new(frames: Vec<Fingerprint>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Fingerprint] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Gradient hash of a single frame
pub fn frame_hash(frame: &DynamicImage) -> Fingerprint {
    let gray = frame.to_luma8();
    let resized = image::imageops::resize(&gray, HASH_SIZE + 1, HASH_SIZE, FilterType::Triangle);

    let mut bits = Vec::with_capacity(FINGERPRINT_BITS as usize);
    for y in 0..HASH_SIZE {
        for x in 0..HASH_SIZE {
            let left = resized.get_pixel(x, y)[0];
            let right = resized.get_pixel(x + 1, y)[0];
            bits.push(right > left);
        }
    }
    Fingerprint::from_bits(&bits)
}

/// A seekable stream of decoded frames
pub trait FrameSource: Send {
    /// Duration in seconds, if the container reports one
    fn duration_secs(&self) -> Option<f64>;

    /// Decode the frame shown at `secs`; `None` when nothing can be decoded
    fn frame_at(&mut self, secs: f64) -> Option<DynamicImage>;
}

/// Opens local video files as frame sources
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// Hash frames at `0, interval, 2·interval, ...` until `max_frames` are
/// collected, the duration is passed, or a frame fails to decode.
fn sample_hashes(source: &mut dyn FrameSource, interval_secs: f64, max_frames: usize) -> Vec<Fingerprint> {
    let duration = source.duration_secs().unwrap_or(0.0);
    let mut hashes = Vec::new();
    let mut t = 0.0;

    while hashes.len() < max_frames && (duration <= 0.0 || t <= duration) {
        match source.frame_at(t) {
            Some(frame) => hashes.push(frame_hash(&frame)),
            None => break,
        }
        t += interval_secs;
    }
    hashes
}

/// Majority-vote fingerprint; `None` when no frame could be decoded
pub fn global_fingerprint(
    source: &mut dyn FrameSource,
    interval_secs: f64,
    max_frames: usize,
) -> Option<Fingerprint> {
    let hashes = sample_hashes(source, interval_secs, max_frames);
    if hashes.is_empty() {
        return None;
    }

    let n = hashes.len();
    let mut bits = [false; FINGERPRINT_BITS as usize];
    for (i, bit) in bits.iter_mut().enumerate() {
        let votes = hashes.iter().filter(|h| h.bit(i)).count();
        *bit = votes * 2 >= n;
    }
    Some(Fingerprint::from_bits(&bits))
}

/// Per-frame hashes in temporal order; empty when nothing decodes
pub fn sequence_fingerprint(
    source: &mut dyn FrameSource,
    interval_secs: f64,
    max_frames: usize,
) -> SequenceFingerprint {
    SequenceFingerprint::new(sample_hashes(source, interval_secs, max_frames))
}

/// Geometric features of one video
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFeatures {
    pub fingerprint: Option<Fingerprint>,
    pub sequence: SequenceFingerprint,
    pub duration_secs: f64,
}

/// Computes video features off the async runtime
#[derive(Clone)]
pub struct PerceptualHasher {
    decoder: Arc<dyn VideoDecoder>,
    config: FingerprintConfig,
}

impl PerceptualHasher {
    pub fn new(decoder: Arc<dyn VideoDecoder>, config: FingerprintConfig) -> Self {
        Self { decoder, config }
    }

    /// Fingerprint a local video file.
    ///
    /// An unopenable file yields empty features rather than an error.
    pub async fn compute(&self, path: &Path) -> Result<VideoFeatures> {
        let decoder = self.decoder.clone();
        let config = self.config.clone();
        let path: PathBuf = path.to_path_buf();

        let features = tokio::task::spawn_blocking(move || {
            let mut source = match decoder.open(&path) {
                Ok(source) => source,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not open video for hashing");
                    return VideoFeatures::default();
                }
            };

            let duration_secs = source.duration_secs().unwrap_or(0.0);
            let fingerprint = global_fingerprint(
                source.as_mut(),
                config.global_interval_secs,
                config.global_max_frames,
            );
            let sequence = sequence_fingerprint(
                source.as_mut(),
                config.sequence_interval_secs,
                config.sequence_max_frames,
            );

            debug!(
                path = %path.display(),
                has_fingerprint = fingerprint.is_some(),
                sequence_frames = sequence.len(),
                duration_secs,
                "Computed video features"
            );

            VideoFeatures {
                fingerprint,
                sequence,
                duration_secs,
            }
        })
        .await?;

        Ok(features)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use image::{GrayImage, Luma};

    fn mix(mut z: u64) -> u64 {
        z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// 9×8 grid of 10px blocks with pseudo-random grey levels keyed by `seed`
    pub fn synthetic_frame(seed: u64) -> DynamicImage {
        let img = GrayImage::from_fn(90, 80, |x, y| {
            let cell = (y / 10) as u64 * 16 + (x / 10) as u64;
            let level = 20 + (mix(seed.wrapping_mul(1000).wrapping_add(cell)) % 12) * 18;
            Luma([level as u8])
        });
        DynamicImage::ImageLuma8(img)
    }

    /// In-memory frame source: one frame per whole second
    pub struct StaticFrames {
        pub frames: Vec<DynamicImage>,
        pub duration: Option<f64>,
    }

    impl FrameSource for StaticFrames {
        fn duration_secs(&self) -> Option<f64> {
            self.duration
        }

        fn frame_at(&mut self, secs: f64) -> Option<DynamicImage> {
            self.frames.get(secs.floor() as usize).cloned()
        }
    }
}
