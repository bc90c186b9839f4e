//! Configuration management for reelcheck
//!
//! Handles loading, saving, and validating configuration from TOML files,
//! with environment overrides for the recognised tuning knobs.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Frame sampling for fingerprints
    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    /// Duplicate-detection gates
    #[serde(default)]
    pub dedupe: DedupeConfig,

    /// Per-campaign budget guardrail
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Video downloading
    #[serde(default)]
    pub download: DownloadConfig,

    /// Summarizer / judge / transcription endpoints
    #[serde(default)]
    pub llm: LlmConfig,

    /// Keyframes and audio
    #[serde(default)]
    pub media: MediaConfig,

    /// Feature store tiers
    #[serde(default)]
    pub store: StoreConfig,

    /// Retention cleanup
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Frame sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Seconds between frames voted into the global fingerprint
    #[serde(default = "default_global_interval_secs")]
    pub global_interval_secs: f64,

    /// Maximum frames voted into the global fingerprint
    #[serde(default = "default_global_max_frames")]
    pub global_max_frames: usize,

    /// Seconds between frames of the sequence fingerprint
    #[serde(default = "default_sequence_interval_secs")]
    pub sequence_interval_secs: f64,

    /// Maximum frames kept in the sequence fingerprint
    #[serde(default = "default_sequence_max_frames")]
    pub sequence_max_frames: usize,
}

/// Duplicate gate thresholds (percentages are 0-100)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeConfig {
    #[serde(default = "default_hash_dup_threshold")]
    pub hash_dup_threshold: f64,

    #[serde(default = "default_seq_dup_threshold")]
    pub seq_dup_threshold: f64,

    /// Differing bits still counted as a frame match
    #[serde(default = "default_seq_bit_tolerance")]
    pub seq_bit_tolerance: u32,

    /// Temporal search window (frames) for sequence matching
    #[serde(default = "default_seq_window_frames")]
    pub seq_window_frames: usize,

    /// Recent campaign videos compared against
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    #[serde(default = "default_sem_strict_threshold")]
    pub sem_strict_threshold: f64,

    #[serde(default = "default_min_seq_for_sem")]
    pub min_seq_for_sem: f64,

    #[serde(default = "default_audio_dup_threshold")]
    pub audio_dup_threshold: f64,

    /// Tolerated duration drift ratio (0.0 - 1.0)
    #[serde(default = "default_max_duration_drift")]
    pub max_duration_drift: f64,
}

/// Budget guardrail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_budget_enabled")]
    pub enabled: bool,

    #[serde(default = "default_usd_day_cap")]
    pub usd_day_cap: f64,

    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: u32,

    #[serde(default = "default_max_emb_calls")]
    pub max_emb_calls: u32,

    /// Estimated cost of a single LLM call (USD)
    #[serde(default = "default_llm_call_usd")]
    pub llm_call_usd: f64,

    /// Hours a day bucket survives after its last write
    #[serde(default = "default_counter_ttl_hours")]
    pub counter_ttl_hours: u64,
}

/// Downloader backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadBackend {
    Http,
    YtDlp,
}

impl FromStr for DownloadBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(DownloadBackend::Http),
            "yt-dlp" | "ytdlp" | "yt_dlp" => Ok(DownloadBackend::YtDlp),
            _ => Err(Error::Config(format!("Unknown download backend: {}", s))),
        }
    }
}

/// Video download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// "http" or "yt-dlp"
    #[serde(default = "default_download_backend")]
    pub backend: String,

    /// Hard size limit in megabytes
    #[serde(default = "default_download_max_mb")]
    pub max_mb: u64,

    /// Request / socket timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_download_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_yt_dlp_path")]
    pub yt_dlp_path: String,
}

impl DownloadConfig {
    pub fn backend_kind(&self) -> Result<DownloadBackend> {
        self.backend.parse()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Summary flavours produced by the vision-language model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    /// Free-form narrative text
    Free,
    /// Structured JSON with a narrative plus entity lists
    Hybrid,
}

impl FromStr for SummaryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "free" => Ok(SummaryMode::Free),
            "hybrid" => Ok(SummaryMode::Hybrid),
            _ => Err(Error::Config(format!("Unknown summary mode: {}", s))),
        }
    }
}

/// OpenAI-compatible model endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    #[serde(default = "default_judge_model")]
    pub judge_model: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// "free" or "hybrid"
    #[serde(default = "default_summary_mode")]
    pub summary_mode: String,

    /// Match percent at or above which the judge approves
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f64,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn summary_mode_kind(&self) -> Result<SummaryMode> {
        self.summary_mode.parse()
    }

    /// Get the API key from environment
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

/// Keyframe and audio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Keyframes sent to the summarizer
    #[serde(default = "default_frames_max")]
    pub frames_max: usize,

    #[serde(default = "default_keyframe_width")]
    pub keyframe_width: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default = "default_keyframe_cache_enabled")]
    pub keyframe_cache_enabled: bool,

    #[serde(default = "default_audio_asr_enabled")]
    pub audio_asr_enabled: bool,

    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

/// Feature store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Use the SQLite durable tier
    #[serde(default = "default_durable_enabled")]
    pub durable_enabled: bool,

    /// Maximum records held by the fast tier
    #[serde(default = "default_fast_capacity")]
    pub fast_capacity: u64,

    /// Fast tier time-to-live (hours)
    #[serde(default = "default_fast_ttl_hours")]
    pub fast_ttl_hours: u64,

    /// Entries kept per campaign recency index
    #[serde(default = "default_recency_index_max")]
    pub recency_index_max: usize,
}

/// Retention cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_cleanup_interval_min")]
    pub cleanup_interval_min: u64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for reelcheck data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Keyframe cache root
    pub keyframes_dir: PathBuf,

    /// Per-request scratch space root
    pub work_dir: PathBuf,
}

impl PathsConfig {
    fn rooted_at(base: PathBuf, config_file: PathBuf) -> Self {
        Self {
            config_file,
            db_file: base.join("features.db"),
            keyframes_dir: base.join("keyframes"),
            work_dir: base.join("work"),
            base_dir: base,
        }
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            global_interval_secs: default_global_interval_secs(),
            global_max_frames: default_global_max_frames(),
            sequence_interval_secs: default_sequence_interval_secs(),
            sequence_max_frames: default_sequence_max_frames(),
        }
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            hash_dup_threshold: default_hash_dup_threshold(),
            seq_dup_threshold: default_seq_dup_threshold(),
            seq_bit_tolerance: default_seq_bit_tolerance(),
            seq_window_frames: default_seq_window_frames(),
            recent_window: default_recent_window(),
            sem_strict_threshold: default_sem_strict_threshold(),
            min_seq_for_sem: default_min_seq_for_sem(),
            audio_dup_threshold: default_audio_dup_threshold(),
            max_duration_drift: default_max_duration_drift(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            enabled: default_budget_enabled(),
            usd_day_cap: default_usd_day_cap(),
            max_llm_calls: default_max_llm_calls(),
            max_emb_calls: default_max_emb_calls(),
            llm_call_usd: default_llm_call_usd(),
            counter_ttl_hours: default_counter_ttl_hours(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            backend: default_download_backend(),
            max_mb: default_download_max_mb(),
            timeout_secs: default_download_timeout(),
            user_agent: default_download_user_agent(),
            yt_dlp_path: default_yt_dlp_path(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            summary_model: default_summary_model(),
            judge_model: default_judge_model(),
            transcription_model: default_transcription_model(),
            summary_mode: default_summary_mode(),
            approval_threshold: default_approval_threshold(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            frames_max: default_frames_max(),
            keyframe_width: default_keyframe_width(),
            jpeg_quality: default_jpeg_quality(),
            keyframe_cache_enabled: default_keyframe_cache_enabled(),
            audio_asr_enabled: default_audio_asr_enabled(),
            audio_sample_rate: default_audio_sample_rate(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            durable_enabled: default_durable_enabled(),
            fast_capacity: default_fast_capacity(),
            fast_ttl_hours: default_fast_ttl_hours(),
            recency_index_max: default_recency_index_max(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_min: default_cleanup_interval_min(),
        }
    }
}

impl Config {
    /// Get the default base directory for reelcheck (~/.reelcheck)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reelcheck")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        let config_file = base.join("config.toml");
        self.paths = PathsConfig::rooted_at(base, config_file);
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::rooted_at(base, config_path.to_path_buf());

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Apply the recognised environment overrides (HASH_DUP_THRESHOLD, USD_DAY_CAP, ...)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(name: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse::<T>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(var = name, value = %raw, "Ignoring unparseable override");
                    None
                }
            }
        }

        macro_rules! override_field {
            ($name:literal, $field:expr) => {
                if let Some(v) = parse($name, lookup($name)) {
                    $field = v;
                }
            };
        }

        override_field!("HASH_DUP_THRESHOLD", self.dedupe.hash_dup_threshold);
        override_field!("SEQ_DUP_THRESHOLD", self.dedupe.seq_dup_threshold);
        override_field!("SEM_STRICT_THRESHOLD", self.dedupe.sem_strict_threshold);
        override_field!("MIN_SEQ_FOR_SEM", self.dedupe.min_seq_for_sem);
        override_field!("AUDIO_DUP_THRESHOLD", self.dedupe.audio_dup_threshold);
        override_field!("MAX_DURATION_DRIFT", self.dedupe.max_duration_drift);
        override_field!("USD_DAY_CAP", self.budget.usd_day_cap);
        override_field!("MAX_LLM_CALLS", self.budget.max_llm_calls);
        override_field!("MAX_EMB_CALLS", self.budget.max_emb_calls);
        override_field!("FRAMES_MAX", self.media.frames_max);
        override_field!("CLEANUP_INTERVAL_MIN", self.retention.cleanup_interval_min);
        override_field!("VIDEO_MAX_MB", self.download.max_mb);
        override_field!("DL_TIMEOUT_S", self.download.timeout_secs);
        override_field!("SUMMARY_MODE", self.llm.summary_mode);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("dedupe.hash_dup_threshold", self.dedupe.hash_dup_threshold),
            ("dedupe.seq_dup_threshold", self.dedupe.seq_dup_threshold),
            ("dedupe.sem_strict_threshold", self.dedupe.sem_strict_threshold),
            ("dedupe.min_seq_for_sem", self.dedupe.min_seq_for_sem),
            ("dedupe.audio_dup_threshold", self.dedupe.audio_dup_threshold),
            ("llm.approval_threshold", self.llm.approval_threshold),
        ];
        for (name, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and 100",
                    name
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.dedupe.max_duration_drift) {
            return Err(Error::Config(
                "dedupe.max_duration_drift must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.dedupe.seq_bit_tolerance > 64 {
            return Err(Error::Config(
                "dedupe.seq_bit_tolerance must be <= 64".to_string(),
            ));
        }

        if self.fingerprint.global_interval_secs <= 0.0
            || self.fingerprint.sequence_interval_secs <= 0.0
        {
            return Err(Error::Config(
                "fingerprint sampling intervals must be positive".to_string(),
            ));
        }

        if self.fingerprint.global_max_frames == 0 || self.fingerprint.sequence_max_frames == 0 {
            return Err(Error::Config(
                "fingerprint frame limits must be at least 1".to_string(),
            ));
        }

        if self.dedupe.seq_window_frames > self.fingerprint.sequence_max_frames {
            return Err(Error::Config(
                "dedupe.seq_window_frames must not exceed fingerprint.sequence_max_frames".to_string(),
            ));
        }

        if self.media.frames_max == 0 {
            return Err(Error::Config("media.frames_max must be at least 1".to_string()));
        }

        if self.budget.usd_day_cap < 0.0 || self.budget.llm_call_usd < 0.0 {
            return Err(Error::Config(
                "budget amounts must not be negative".to_string(),
            ));
        }

        if self.retention.cleanup_interval_min == 0 {
            return Err(Error::Config(
                "retention.cleanup_interval_min must be at least 1".to_string(),
            ));
        }

        self.download.backend_kind()?;
        self.llm.summary_mode_kind()?;

        Ok(())
    }
}
