//! Similarity scoring and the duplicate gate pipeline
//!
//! Gates run in a fixed order and short-circuit on the first positive:
//! URL identity, then HASH (global fingerprint), then SEQ (sequence
//! fingerprint). The corroborated SEMANTIC predicate and the AUDIO threshold
//! are available for callers that already hold those signals.

use crate::config::DedupeConfig;
use crate::fingerprint::{Fingerprint, SequenceFingerprint, VideoFeatures, FINGERPRINT_BITS};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a video was flagged as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DuplicateReason {
    Url,
    Hash,
    Seq,
    Audio,
    Semantic,
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateReason::Url => write!(f, "URL"),
            DuplicateReason::Hash => write!(f, "HASH"),
            DuplicateReason::Seq => write!(f, "SEQ"),
            DuplicateReason::Audio => write!(f, "AUDIO"),
            DuplicateReason::Semantic => write!(f, "SEMANTIC"),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `100 × (1 − hamming/64)`, rounded to two decimals
pub fn hash_similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let distance = a.hamming(b) as f64;
    round2(100.0 * (1.0 - distance / FINGERPRINT_BITS as f64))
}

/// Share of frames in `a` with a close match in `b` near the same position.
///
/// Frame `i` of `a` matches when the smallest Hamming distance to any frame
/// of `b` within `[i - window, i + window]` is at most `bit_tolerance`.
pub fn sequence_similarity(
    a: &SequenceFingerprint,
    b: &SequenceFingerprint,
    bit_tolerance: u32,
    window: usize,
) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let other = b.frames();
    let matches = a
        .frames()
        .iter()
        .enumerate()
        .filter(|(i, frame)| {
            let start = i.saturating_sub(window);
            let end = i.saturating_add(window).saturating_add(1).min(other.len());
            let best = other
                .get(start..end)
                .unwrap_or(&[])
                .iter()
                .map(|candidate| frame.hamming(candidate))
                .min()
                .unwrap_or(FINGERPRINT_BITS + 1);
            best <= bit_tolerance
        })
        .count();

    round2(100.0 * matches as f64 / a.len() as f64)
}

/// Relative duration difference `|a − b| / max(a, b, 1)`
pub fn duration_ratio(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.max(b).max(1.0)
}

/// Signals available to the corroborated semantic check
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticSignals {
    /// Summary/embedding similarity (%)
    pub semantic: f64,
    /// Sequence similarity (%)
    pub sequence: f64,
    /// Audio similarity (%), when audio was compared
    pub audio: Option<f64>,
    /// Duration ratio, when both durations are known
    pub duration_ratio: Option<f64>,
}

/// A positive gate result
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub reason: DuplicateReason,
    pub candidate_url: String,
    /// Gate score in percent; `None` for URL identity
    pub score: Option<f64>,
}

/// Threshold gates parameterised by configuration
#[derive(Debug, Clone)]
pub struct DuplicateGates {
    config: DedupeConfig,
}

impl DuplicateGates {
    pub fn new(config: DedupeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupeConfig {
        &self.config
    }

    /// URL identity: textual equality
    pub fn url_gate(&self, base_url: &str, candidate_url: &str) -> Option<DuplicateMatch> {
        (base_url == candidate_url).then(|| DuplicateMatch {
            reason: DuplicateReason::Url,
            candidate_url: candidate_url.to_string(),
            score: None,
        })
    }

    /// HASH then SEQ.
    ///
    /// HASH is skipped when either fingerprint is absent, SEQ when either
    /// sequence is empty.
    pub fn geometric_gates(
        &self,
        base: &VideoFeatures,
        candidate: &VideoFeatures,
        candidate_url: &str,
    ) -> Option<DuplicateMatch> {
        if let (Some(a), Some(b)) = (&base.fingerprint, &candidate.fingerprint) {
            let score = hash_similarity(a, b);
            debug!(candidate = candidate_url, hash_similarity = score, "HASH gate");
            if score >= self.config.hash_dup_threshold {
                return Some(DuplicateMatch {
                    reason: DuplicateReason::Hash,
                    candidate_url: candidate_url.to_string(),
                    score: Some(score),
                });
            }
        }

        if !base.sequence.is_empty() && !candidate.sequence.is_empty() {
            let score = sequence_similarity(
                &base.sequence,
                &candidate.sequence,
                self.config.seq_bit_tolerance,
                self.config.seq_window_frames,
            );
            debug!(candidate = candidate_url, sequence_similarity = score, "SEQ gate");
            if score >= self.config.seq_dup_threshold {
                return Some(DuplicateMatch {
                    reason: DuplicateReason::Seq,
                    candidate_url: candidate_url.to_string(),
                    score: Some(score),
                });
            }
        }

        None
    }

    pub fn audio_duplicate(&self, audio_similarity: f64) -> bool {
        audio_similarity >= self.config.audio_dup_threshold
    }

    /// Strict semantic similarity plus at least one corroborating signal
    pub fn semantic_duplicate(&self, signals: &SemanticSignals) -> bool {
        if signals.semantic < self.config.sem_strict_threshold {
            return false;
        }

        let sequence_ok = signals.sequence >= self.config.min_seq_for_sem;
        let audio_ok = signals.audio.is_some_and(|a| self.audio_duplicate(a));
        let duration_ok = signals
            .duration_ratio
            .is_some_and(|r| r <= self.config.max_duration_drift);

        sequence_ok || audio_ok || duration_ok
    }
}
