//! Default values for configuration

/// Default sampling interval for the global fingerprint (seconds)
pub fn default_global_interval_secs() -> f64 {
    5.0
}

/// Default maximum frames voted into the global fingerprint
pub fn default_global_max_frames() -> usize {
    20
}

/// Default sampling interval for the sequence fingerprint (seconds)
pub fn default_sequence_interval_secs() -> f64 {
    2.0
}

/// Default maximum frames kept in a sequence fingerprint
pub fn default_sequence_max_frames() -> usize {
    60
}

/// Default HASH gate threshold (%)
pub fn default_hash_dup_threshold() -> f64 {
    95.0
}

/// Default SEQ gate threshold (%)
pub fn default_seq_dup_threshold() -> f64 {
    85.0
}

/// Default number of differing bits still counted as a frame match
pub fn default_seq_bit_tolerance() -> u32 {
    5
}

/// Default temporal search window (frames) for sequence matching
pub fn default_seq_window_frames() -> usize {
    2
}

/// Default number of recent campaign videos compared against
pub fn default_recent_window() -> usize {
    50
}

/// Default strict semantic similarity threshold (%)
pub fn default_sem_strict_threshold() -> f64 {
    92.0
}

/// Default weak sequence floor corroborating a semantic match (%)
pub fn default_min_seq_for_sem() -> f64 {
    40.0
}

/// Default audio similarity threshold (%)
pub fn default_audio_dup_threshold() -> f64 {
    88.0
}

/// Default tolerated duration drift ratio (15%)
pub fn default_max_duration_drift() -> f64 {
    0.15
}

/// Default: budget guardrail enabled
pub fn default_budget_enabled() -> bool {
    true
}

/// Default daily USD cap per campaign
pub fn default_usd_day_cap() -> f64 {
    5.0
}

/// Default daily LLM call cap per campaign
pub fn default_max_llm_calls() -> u32 {
    50
}

/// Default daily embedding call cap per campaign
pub fn default_max_emb_calls() -> u32 {
    200
}

/// Default estimated cost of one LLM call (USD)
pub fn default_llm_call_usd() -> f64 {
    0.02
}

/// Default lifetime of a budget day bucket after its last write (hours)
pub fn default_counter_ttl_hours() -> u64 {
    36
}

/// Default downloader backend
pub fn default_download_backend() -> String {
    "http".to_string()
}

/// Default download size limit (MB)
pub fn default_download_max_mb() -> u64 {
    200
}

/// Default download timeout in seconds
pub fn default_download_timeout() -> u64 {
    30
}

/// Default user agent
pub fn default_download_user_agent() -> String {
    format!(
        "reelcheck/{} (Campaign Video Evaluator)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Default yt-dlp executable
pub fn default_yt_dlp_path() -> String {
    "yt-dlp".to_string()
}

/// Default OpenAI-compatible API base URL
pub fn default_llm_base_url() -> String {
    std::env::var("REELCHECK_LLM_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/".to_string())
}

/// Default environment variable holding the API key
pub fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default vision-language summary model
pub fn default_summary_model() -> String {
    "gpt-4o".to_string()
}

/// Default alignment judge model
pub fn default_judge_model() -> String {
    "gpt-4o".to_string()
}

/// Default transcription model
pub fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

/// Default summary mode
pub fn default_summary_mode() -> String {
    "free".to_string()
}

/// Default approval threshold for the alignment judge (%)
pub fn default_approval_threshold() -> f64 {
    70.0
}

/// Default LLM request timeout in seconds
pub fn default_llm_timeout() -> u64 {
    90
}

/// Default maximum keyframes sent to the summarizer
pub fn default_frames_max() -> usize {
    20
}

/// Default keyframe width in pixels
pub fn default_keyframe_width() -> u32 {
    640
}

/// Default keyframe JPEG quality
pub fn default_jpeg_quality() -> u8 {
    65
}

/// Default: keyframe cache enabled
pub fn default_keyframe_cache_enabled() -> bool {
    true
}

/// Default: audio transcription enabled
pub fn default_audio_asr_enabled() -> bool {
    true
}

/// Default audio sample rate for transcription
pub fn default_audio_sample_rate() -> u32 {
    16_000
}

/// Default ffmpeg executable
pub fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

/// Default ffprobe executable
pub fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

/// Default: durable tier enabled
pub fn default_durable_enabled() -> bool {
    true
}

/// Default fast tier capacity (records)
pub fn default_fast_capacity() -> u64 {
    10_000
}

/// Default fast tier time-to-live (hours)
pub fn default_fast_ttl_hours() -> u64 {
    24 * 7
}

/// Default maximum entries kept per campaign recency index
pub fn default_recency_index_max() -> usize {
    500
}

/// Default retention sweep interval (minutes)
pub fn default_cleanup_interval_min() -> u64 {
    60
}
