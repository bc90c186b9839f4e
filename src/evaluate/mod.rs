//! Evaluation orchestrator
//!
//! One evaluation runs: URL lookup, geometric dedupe against the campaign's
//! recent videos, then against explicit candidates, a budget check,
//! keyframes, optional transcript, summary, alignment judgment, and finally
//! persistence of approved videos. Every step after the base download turns
//! its failure into a well-formed, non-approved response.

mod context;
mod types;

pub use context::{RequestContext, ScratchDir};
pub use types::*;

use crate::budget::{BudgetDecision, BudgetGuardrail, BudgetLedger, MemoryLedger, SqliteLedger, Usage};
use crate::collab::{
    AlignmentJudge, AudioExtractor, Downloader, KeyframeExtractor, ProductionCollaborators, Summarizer,
    Transcriber,
};
use crate::config::Config;
use crate::db::FeatureDb;
use crate::dedupe::{DuplicateGates, DuplicateMatch, DuplicateReason};
use crate::error::{Error, Result};
use crate::fingerprint::{PerceptualHasher, VideoFeatures};
use crate::keyframes::KeyframeCache;
use crate::store::{FeatureRecord, FeatureStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BUDGET_EXHAUSTED: &str =
    "Daily budget for this campaign is exhausted; evaluation was degraded. Retry later.";
const NO_KEYFRAMES: &str = "Could not extract keyframes from the video.";
const NO_SUMMARY: &str = "Could not generate a summary of the video.";
const NO_COMPARISON: &str = "Could not compare the video against the brief.";
const INVALID_JUDGE_RESPONSE: &str = "Invalid judge response.";

/// LLM calls one full judgment needs: summary and judge
const LLM_CALLS_PER_EVALUATION: u32 = 2;

/// The external work an evaluation depends on
#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn Downloader>,
    pub hasher: PerceptualHasher,
    pub keyframes: Arc<dyn KeyframeExtractor>,
    pub audio: Option<Arc<dyn AudioExtractor>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub summarizer: Arc<dyn Summarizer>,
    pub judge: Arc<dyn AlignmentJudge>,
}

impl Collaborators {
    pub fn production(config: &Config) -> Result<Self> {
        let prod = ProductionCollaborators::from_config(config)?;
        Ok(Self {
            downloader: prod.downloader,
            hasher: PerceptualHasher::new(prod.decoder, config.fingerprint.clone()),
            keyframes: prod.keyframes,
            audio: Some(prod.audio),
            transcriber: Some(prod.llm.clone()),
            summarizer: prod.llm.clone(),
            judge: prod.llm,
        })
    }
}

/// Request-independent evaluation settings
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub work_dir: PathBuf,
    pub download_max_mb: u64,
    pub download_timeout: Duration,
    pub frames_max: usize,
    pub audio_enabled: bool,
    pub approval_threshold: f64,
}

impl EvaluatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: config.paths.work_dir.clone(),
            download_max_mb: config.download.max_mb,
            download_timeout: config.download.timeout(),
            frames_max: config.media.frames_max,
            audio_enabled: config.media.audio_asr_enabled,
            approval_threshold: config.llm.approval_threshold,
        }
    }
}

pub struct Evaluator {
    store: Arc<FeatureStore>,
    budget: BudgetGuardrail,
    gates: DuplicateGates,
    keyframe_cache: Option<KeyframeCache>,
    collab: Collaborators,
    settings: EvaluatorSettings,
}

impl Evaluator {
    pub fn new(
        store: Arc<FeatureStore>,
        budget: BudgetGuardrail,
        gates: DuplicateGates,
        keyframe_cache: Option<KeyframeCache>,
        collab: Collaborators,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            store,
            budget,
            gates,
            keyframe_cache,
            collab,
            settings,
        }
    }

    /// Build a production evaluator.
    ///
    /// An unreachable database leaves the evaluator running on the fast tier
    /// and an in-process budget ledger.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let durable = if config.store.durable_enabled {
            match open_durable(config).await {
                Ok(db) => Some(db),
                Err(e) => {
                    let e = Error::DurableUnavailable(e.to_string());
                    warn!(error = %e, "Starting without the durable tier");
                    None
                }
            }
        } else {
            None
        };

        let ledger: Arc<dyn BudgetLedger> = match &durable {
            Some(db) => Arc::new(SqliteLedger::new(db.clone())),
            None => Arc::new(MemoryLedger::new()),
        };
        let store = Arc::new(FeatureStore::from_config(&config.store, durable));
        let keyframe_cache = config
            .media
            .keyframe_cache_enabled
            .then(|| KeyframeCache::new(config.paths.keyframes_dir.clone()));

        Ok(Self::new(
            store,
            BudgetGuardrail::new(ledger, config.budget.clone()),
            DuplicateGates::new(config.dedupe.clone()),
            keyframe_cache,
            Collaborators::production(config)?,
            EvaluatorSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    pub fn budget(&self) -> &BudgetGuardrail {
        &self.budget
    }

    pub fn keyframe_cache(&self) -> Option<&KeyframeCache> {
        self.keyframe_cache.as_ref()
    }

    /// Evaluate one submission.
    ///
    /// Errors only for an invalid request or when the video under evaluation
    /// cannot be downloaded.
    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<EvaluateResponse> {
        request.validate()?;
        let campaign_id = request.campaign_id.as_str();
        let mut ctx = RequestContext::new(
            request,
            &self.collab,
            &self.settings,
            self.keyframe_cache.as_ref(),
        )?;

        info!(
            campaign_id,
            url = %request.video_url,
            candidates = request.candidates.len(),
            "Evaluating video"
        );

        if self.store.get(campaign_id, &request.video_url).await.is_some() {
            info!(campaign_id, url = %request.video_url, "Video already known, URL duplicate");
            let found = DuplicateMatch {
                reason: DuplicateReason::Url,
                candidate_url: request.video_url.clone(),
                score: None,
            };
            return Ok(EvaluateResponse::duplicate(found, ctx.cost.clone()));
        }

        if let Some(found) = self.dedupe_recent(&mut ctx).await? {
            info!(campaign_id, reason = %found.reason, candidate = %found.candidate_url, "Duplicate of a recent video");
            return Ok(EvaluateResponse::duplicate(found, ctx.cost.clone()));
        }

        if let Some(found) = self.dedupe_candidates(&mut ctx).await? {
            info!(campaign_id, reason = %found.reason, candidate = %found.candidate_url, "Duplicate of a candidate");
            return Ok(EvaluateResponse::duplicate(found, ctx.cost.clone()));
        }

        let est_usd = LLM_CALLS_PER_EVALUATION as f64 * self.budget.config().llm_call_usd;
        let decision = self
            .budget
            .decide(campaign_id, est_usd, Usage::llm(LLM_CALLS_PER_EVALUATION))
            .await;
        if decision == BudgetDecision::Degrade {
            info!(campaign_id, "Budget exhausted, returning degraded result");
            ctx.cost.degraded_path = true;
            return Ok(EvaluateResponse::judged(
                Alignment::rejected(BUDGET_EXHAUSTED),
                ctx.cost.clone(),
            ));
        }

        let alignment = self.align(&mut ctx).await;

        let calls = ctx.cost.llm_calls;
        let spent = calls as f64 * self.budget.config().llm_call_usd;
        if let Err(e) = self.budget.commit(campaign_id, spent, Usage::llm(calls)).await {
            warn!(campaign_id, error = %e, "Could not record budget usage");
        }
        let alignment = alignment?;

        if alignment.approved {
            self.persist(&mut ctx).await;
        }

        info!(
            campaign_id,
            url = %request.video_url,
            approved = alignment.approved,
            match_percent = alignment.match_percent,
            llm_calls = ctx.cost.llm_calls,
            "Evaluation complete"
        );
        Ok(EvaluateResponse::judged(alignment, ctx.cost.clone()))
    }

    /// HASH/SEQ against the campaign's recently persisted videos
    async fn dedupe_recent(&self, ctx: &mut RequestContext<'_>) -> Result<Option<DuplicateMatch>> {
        let request = ctx.request;
        let recent: Vec<FeatureRecord> = self
            .store
            .recent(&request.campaign_id, self.gates.config().recent_window)
            .await
            .into_iter()
            .filter(|record| record.url != request.video_url)
            .collect();
        if recent.is_empty() {
            return Ok(None);
        }

        let base = ctx.ensure_features().await?;
        debug!(campaign_id = %request.campaign_id, window = recent.len(), "Checking recency window");
        Ok(recent
            .iter()
            .find_map(|record| self.gates.geometric_gates(base, &record.features, &record.url)))
    }

    /// URL, then HASH/SEQ, against each explicit candidate in order
    async fn dedupe_candidates(&self, ctx: &mut RequestContext<'_>) -> Result<Option<DuplicateMatch>> {
        let request = ctx.request;
        for candidate in &request.candidates {
            if let Some(found) = self.gates.url_gate(&request.video_url, candidate) {
                return Ok(Some(found));
            }

            let Some(features) = self.candidate_features(ctx, candidate).await? else {
                continue;
            };
            let base = ctx.ensure_features().await?;
            if let Some(found) = self.gates.geometric_gates(base, &features, candidate) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Stored features when the candidate is known, otherwise download and
    /// hash it. `None` when the candidate cannot be fetched.
    async fn candidate_features(
        &self,
        ctx: &mut RequestContext<'_>,
        url: &str,
    ) -> Result<Option<VideoFeatures>> {
        if let Some(record) = self.store.get(&ctx.request.campaign_id, url).await {
            debug!(candidate = url, "Candidate features from store");
            return Ok(Some(record.features));
        }

        // The base video must be available before any candidate is fetched
        ctx.ensure_features().await?;

        let dir = ctx.scratch().join("candidates");
        let video = match self
            .collab
            .downloader
            .fetch(
                url,
                &dir,
                self.settings.download_max_mb,
                self.settings.download_timeout,
            )
            .await
        {
            Ok(video) => video,
            Err(e) => {
                let e = Error::CandidateDownload(format!("{}: {}", url, e));
                warn!(candidate = url, error = %e, "Skipping candidate");
                return Ok(None);
            }
        };

        let features = self.collab.hasher.compute(&video.path).await;
        if let Err(e) = tokio::fs::remove_file(&video.path).await {
            debug!(path = %video.path.display(), error = %e, "Could not remove candidate file");
        }
        Ok(Some(features?))
    }

    /// Keyframes, transcript, summary and judgment.
    ///
    /// LLM calls are counted into the context as they succeed.
    async fn align(&self, ctx: &mut RequestContext<'_>) -> Result<Alignment> {
        let frames = match ctx.ensure_keyframes().await.map(<[Vec<u8>]>::to_vec) {
            Ok(frames) => frames,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(url = %ctx.request.video_url, error = %e, "Keyframe extraction failed");
                Vec::new()
            }
        };
        if frames.is_empty() {
            return Ok(Alignment::rejected(NO_KEYFRAMES));
        }

        let transcript = ctx.ensure_transcript().await;

        let summary = match self
            .collab
            .summarizer
            .summarize(&frames, transcript.as_deref())
            .await
        {
            Ok(summary) => {
                ctx.cost.llm_calls += 1;
                summary
            }
            Err(e) => {
                warn!(url = %ctx.request.video_url, error = %e, "Summary failed");
                return Ok(Alignment::rejected(NO_SUMMARY));
            }
        };
        if summary.is_empty() {
            warn!(url = %ctx.request.video_url, "Summary was empty");
            return Ok(Alignment::rejected(NO_SUMMARY));
        }

        match self
            .collab
            .judge
            .judge(
                &ctx.request.descripcion,
                &summary,
                self.settings.approval_threshold,
            )
            .await
        {
            Ok(verdict) => {
                ctx.cost.llm_calls += 1;
                Ok(Alignment {
                    approved: verdict.approved,
                    match_percent: verdict.match_percent,
                    reasons: verdict.reasons,
                })
            }
            Err(Error::MalformedJudgeOutput(raw)) => {
                ctx.cost.llm_calls += 1;
                warn!(url = %ctx.request.video_url, raw = %raw, "Judge reply was not a verdict");
                Ok(Alignment::rejected(INVALID_JUDGE_RESPONSE))
            }
            Err(e) => {
                warn!(url = %ctx.request.video_url, error = %e, "Judgment failed");
                Ok(Alignment::rejected(NO_COMPARISON))
            }
        }
    }

    /// Store features, cache keyframes and register retention for an
    /// approved video. Failures are logged.
    async fn persist(&self, ctx: &mut RequestContext<'_>) {
        let request = ctx.request;
        let video_id = ctx.video_id.clone();

        match ctx.ensure_features().await {
            Ok(features) => {
                let record = FeatureRecord::new(&request.campaign_id, &request.video_url, features.clone());
                let inserted = self.store.put(&record).await;
                debug!(url = %request.video_url, durable = inserted, "Stored features");
            }
            Err(e) => warn!(url = %request.video_url, error = %e, "Could not fingerprint approved video"),
        }

        if let Some(cache) = &self.keyframe_cache {
            match ctx.ensure_keyframes().await {
                Ok(frames) if !frames.is_empty() => {
                    if let Err(e) = cache.save(&video_id, frames).await {
                        warn!(video_id = %video_id, error = %e, "Could not cache keyframes");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(video_id = %video_id, error = %e, "No keyframes to cache"),
            }
        }

        if let Some(end_date) = request.end_date {
            match self.store.durable() {
                Some(db) => {
                    if let Err(e) = db.upsert_retention(&request.campaign_id, end_date).await {
                        warn!(campaign_id = %request.campaign_id, error = %e, "Could not register retention");
                    }
                }
                None => debug!(campaign_id = %request.campaign_id, "No durable tier, retention not registered"),
            }
        }
    }
}

async fn open_durable(config: &Config) -> Result<FeatureDb> {
    let db = FeatureDb::connect(config).await?;
    db.init_schema().await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{LocalVideo, Verdict, VideoSummary};
    use crate::config::{BudgetConfig, DedupeConfig, FingerprintConfig};
    use crate::db::test_support::{drop_features_table, setup_test_db};
    use crate::fingerprint::test_support::{synthetic_frame, StaticFrames};
    use crate::fingerprint::{FrameSource, VideoDecoder};
    use crate::store::video_id_for;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const BASE: &str = "https://videos.example.com/base.mp4";
    const TWIN: &str = "https://videos.example.com/twin.mp4";
    const OTHER: &str = "https://videos.example.com/other.mp4";
    const MISSING: &str = "https://videos.example.com/missing.mp4";

    /// Writes the video's seed into the downloaded file
    struct FakeDownloader {
        seeds: HashMap<String, u64>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl FakeDownloader {
        fn calls(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn fetch(
            &self,
            url: &str,
            dest_dir: &Path,
            _size_limit_mb: u64,
            _timeout: Duration,
        ) -> Result<LocalVideo> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            let seed = self
                .seeds
                .get(url)
                .ok_or_else(|| Error::Download(format!("404 for {}", url)))?;

            tokio::fs::create_dir_all(dest_dir).await?;
            let path = dest_dir.join(format!("{}.mp4", video_id_for(url)));
            tokio::fs::write(&path, seed.to_string()).await?;
            Ok(LocalVideo {
                url: url.to_string(),
                path,
                size_bytes: 8,
            })
        }
    }

    /// Twenty seconds of frames derived from the seed in the file
    struct SeedDecoder;

    impl VideoDecoder for SeedDecoder {
        fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            let seed: u64 = std::fs::read_to_string(path)?
                .trim()
                .parse()
                .map_err(|_| Error::Decode(path.display().to_string()))?;
            Ok(Box::new(StaticFrames {
                frames: (0..21).map(|i| synthetic_frame(seed * 100 + i)).collect(),
                duration: Some(20.0),
            }))
        }
    }

    struct FakeKeyframes;

    #[async_trait]
    impl KeyframeExtractor for FakeKeyframes {
        async fn sample(&self, _video: &LocalVideo, max_frames: usize) -> Result<Vec<Vec<u8>>> {
            Ok((0..max_frames.min(3)).map(|i| vec![0xFF, 0xD8, i as u8]).collect())
        }
    }

    struct FakeSummarizer {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, frames: &[Vec<u8>], _transcript: Option<&str>) -> Result<VideoSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Summarizer("upstream timeout".into()));
            }
            Ok(VideoSummary::Narrative(format!(
                "A streamer reacts to gameplay across {} frames",
                frames.len()
            )))
        }
    }

    enum JudgeReply {
        Percent(f64),
        Malformed,
        Unavailable,
    }

    struct FakeJudge {
        reply: JudgeReply,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AlignmentJudge for FakeJudge {
        async fn judge(&self, _brief: &str, _summary: &VideoSummary, approval_threshold: f64) -> Result<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                JudgeReply::Percent(p) => Ok(Verdict {
                    approved: p >= approval_threshold,
                    match_percent: p,
                    reasons: "Layout matches the brief".into(),
                }),
                JudgeReply::Malformed => Err(Error::MalformedJudgeOutput("not json".into())),
                JudgeReply::Unavailable => Err(Error::Judge("503".into())),
            }
        }
    }

    struct Harness {
        evaluator: Evaluator,
        downloader: Arc<FakeDownloader>,
        summarizer: Arc<FakeSummarizer>,
        judge: Arc<FakeJudge>,
        db: FeatureDb,
        work_dir: PathBuf,
        _tmp: TempDir,
        _db_tmp: TempDir,
    }

    struct Setup {
        summary_fails: bool,
        reply: JudgeReply,
        budget: BudgetConfig,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                summary_fails: false,
                reply: JudgeReply::Percent(85.0),
                budget: BudgetConfig::default(),
            }
        }
    }

    async fn harness(setup: Setup) -> Harness {
        let (db, db_tmp) = setup_test_db().await;
        let tmp = TempDir::new().unwrap();
        let work_dir = tmp.path().join("work");

        let downloader = Arc::new(FakeDownloader {
            seeds: HashMap::from([
                (BASE.to_string(), 1),
                (TWIN.to_string(), 1),
                (OTHER.to_string(), 7),
            ]),
            calls: Mutex::new(HashMap::new()),
        });
        let summarizer = Arc::new(FakeSummarizer {
            fail: setup.summary_fails,
            calls: AtomicUsize::new(0),
        });
        let judge = Arc::new(FakeJudge {
            reply: setup.reply,
            calls: AtomicUsize::new(0),
        });

        let collab = Collaborators {
            downloader: downloader.clone(),
            hasher: PerceptualHasher::new(Arc::new(SeedDecoder), FingerprintConfig::default()),
            keyframes: Arc::new(FakeKeyframes),
            audio: None,
            transcriber: None,
            summarizer: summarizer.clone(),
            judge: judge.clone(),
        };
        let settings = EvaluatorSettings {
            work_dir: work_dir.clone(),
            download_max_mb: 200,
            download_timeout: Duration::from_secs(30),
            frames_max: 20,
            audio_enabled: false,
            approval_threshold: 70.0,
        };

        let store = Arc::new(FeatureStore::from_config(
            &crate::config::StoreConfig::default(),
            Some(db.clone()),
        ));
        let budget = BudgetGuardrail::new(Arc::new(SqliteLedger::new(db.clone())), setup.budget);
        let evaluator = Evaluator::new(
            store,
            budget,
            DuplicateGates::new(DedupeConfig::default()),
            Some(KeyframeCache::new(tmp.path().join("keyframes"))),
            collab,
            settings,
        );

        Harness {
            evaluator,
            downloader,
            summarizer,
            judge,
            db,
            work_dir,
            _tmp: tmp,
            _db_tmp: db_tmp,
        }
    }

    fn request(url: &str, candidates: &[&str]) -> EvaluateRequest {
        EvaluateRequest {
            campaign_id: "cmp-1".into(),
            video_url: url.into(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            descripcion: "Vertical video, facecam on top, gameplay below".into(),
            end_date: NaiveDate::from_ymd_opt(2030, 1, 31),
        }
    }

    #[tokio::test]
    async fn test_identical_candidate_is_hash_duplicate() {
        let h = harness(Setup::default()).await;
        let resp = h.evaluator.evaluate(&request(BASE, &[TWIN])).await.unwrap();

        assert!(resp.duplicated);
        assert_eq!(resp.duplicate_reason, Some(DuplicateReason::Hash));
        assert_eq!(resp.duplicate_candidate_url.as_deref(), Some(TWIN));
        assert!(resp.alignment.is_none());
        assert_eq!(resp.cost.llm_calls, 0);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_candidate_with_same_url_is_url_duplicate() {
        let h = harness(Setup::default()).await;
        let resp = h.evaluator.evaluate(&request(BASE, &[BASE])).await.unwrap();

        assert_eq!(resp.duplicate_reason, Some(DuplicateReason::Url));
        assert_eq!(resp.duplicate_candidate_url.as_deref(), Some(BASE));
        assert_eq!(h.downloader.calls(BASE), 0);
    }

    #[tokio::test]
    async fn test_approved_video_is_persisted() {
        let h = harness(Setup::default()).await;
        let resp = h.evaluator.evaluate(&request(BASE, &[OTHER])).await.unwrap();

        assert!(!resp.duplicated);
        let alignment = resp.alignment.unwrap();
        assert!(alignment.approved);
        assert_eq!(alignment.match_percent, 85.0);
        assert_eq!(resp.cost.llm_calls, 2);
        assert!(!resp.cost.degraded_path);

        let row = h.db.get_feature_by_url(BASE).await.unwrap().unwrap();
        assert_eq!(row.campaign_id, "cmp-1");
        assert!(row.fingerprint.is_some());

        let retention = h.db.get_retention("cmp-1").await.unwrap().unwrap();
        assert_eq!(retention.end_date, "2030-01-31");

        let cached = h
            .evaluator
            .keyframe_cache()
            .unwrap()
            .load(&video_id_for(BASE), None)
            .await
            .unwrap();
        assert_eq!(cached.len(), 3);

        let spent = h.evaluator.budget().snapshot("cmp-1").await.unwrap();
        assert_eq!(spent.llm_calls, 2);
        assert!((spent.usd_spent - 0.04).abs() < 1e-9);

        // Resubmission is caught before any download
        let again = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();
        assert_eq!(again.duplicate_reason, Some(DuplicateReason::Url));
        assert_eq!(again.duplicate_candidate_url.as_deref(), Some(BASE));
        assert_eq!(h.downloader.calls(BASE), 1);
    }

    #[tokio::test]
    async fn test_evaluates_with_durable_tier_unavailable() {
        let h = harness(Setup::default()).await;
        drop_features_table(&h.db).await;

        let resp = h.evaluator.evaluate(&request(BASE, &[OTHER])).await.unwrap();
        assert!(!resp.duplicated);
        assert!(resp.alignment.unwrap().approved);
        assert_eq!(resp.cost.llm_calls, 2);

        // Served from the fast tier alone
        let again = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();
        assert_eq!(again.duplicate_reason, Some(DuplicateReason::Url));
        assert_eq!(h.downloader.calls(BASE), 1);
    }

    #[tokio::test]
    async fn test_rejected_video_is_not_persisted() {
        let h = harness(Setup {
            reply: JudgeReply::Percent(40.0),
            ..Default::default()
        })
        .await;
        let resp = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();

        let alignment = resp.alignment.unwrap();
        assert!(!alignment.approved);
        assert_eq!(resp.cost.llm_calls, 2);
        assert!(h.db.get_feature_by_url(BASE).await.unwrap().is_none());
        assert!(h.db.get_retention("cmp-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_window_catches_reupload() {
        let h = harness(Setup::default()).await;
        let first = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();
        assert!(first.alignment.unwrap().approved);

        // Same content under a new URL, no explicit candidates
        let resp = h.evaluator.evaluate(&request(TWIN, &[])).await.unwrap();
        assert!(resp.duplicated);
        assert_eq!(resp.duplicate_reason, Some(DuplicateReason::Hash));
        assert_eq!(resp.duplicate_candidate_url.as_deref(), Some(BASE));
        assert_eq!(h.downloader.calls(TWIN), 1);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrelated_recent_video_is_not_duplicate() {
        let h = harness(Setup::default()).await;
        h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();

        let resp = h.evaluator.evaluate(&request(OTHER, &[])).await.unwrap();
        assert!(!resp.duplicated);
        assert!(resp.alignment.unwrap().approved);
    }

    #[tokio::test]
    async fn test_budget_exhausted_degrades() {
        let h = harness(Setup {
            budget: BudgetConfig {
                max_llm_calls: 1,
                ..Default::default()
            },
            ..Default::default()
        })
        .await;
        let resp = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();

        assert!(!resp.duplicated);
        assert!(resp.cost.degraded_path);
        assert_eq!(resp.cost.llm_calls, 0);
        let alignment = resp.alignment.unwrap();
        assert!(!alignment.approved);
        assert_eq!(alignment.reasons, BUDGET_EXHAUSTED);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
        assert!(h.db.get_feature_by_url(BASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_candidate_is_skipped() {
        let h = harness(Setup::default()).await;
        let resp = h
            .evaluator
            .evaluate(&request(BASE, &[MISSING, TWIN]))
            .await
            .unwrap();

        assert_eq!(resp.duplicate_reason, Some(DuplicateReason::Hash));
        assert_eq!(resp.duplicate_candidate_url.as_deref(), Some(TWIN));
        assert_eq!(h.downloader.calls(MISSING), 1);
    }

    #[tokio::test]
    async fn test_base_download_failure_is_fatal() {
        let h = harness(Setup::default()).await;
        let err = h
            .evaluator
            .evaluate(&request(MISSING, &[OTHER]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BaseDownload(_)));
        assert_eq!(h.downloader.calls(OTHER), 0);
    }

    #[tokio::test]
    async fn test_malformed_judge_reply() {
        let h = harness(Setup {
            reply: JudgeReply::Malformed,
            ..Default::default()
        })
        .await;
        let resp = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();

        let alignment = resp.alignment.unwrap();
        assert!(!alignment.approved);
        assert_eq!(alignment.match_percent, 0.0);
        assert_eq!(alignment.reasons, INVALID_JUDGE_RESPONSE);
        assert_eq!(resp.cost.llm_calls, 2);
    }

    #[tokio::test]
    async fn test_judge_unavailable() {
        let h = harness(Setup {
            reply: JudgeReply::Unavailable,
            ..Default::default()
        })
        .await;
        let resp = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();

        let alignment = resp.alignment.unwrap();
        assert!(!alignment.approved);
        assert_eq!(alignment.reasons, NO_COMPARISON);
        assert_eq!(resp.cost.llm_calls, 1);
    }

    #[tokio::test]
    async fn test_summary_failure_skips_judge() {
        let h = harness(Setup {
            summary_fails: true,
            ..Default::default()
        })
        .await;
        let resp = h.evaluator.evaluate(&request(BASE, &[])).await.unwrap();

        let alignment = resp.alignment.unwrap();
        assert!(!alignment.approved);
        assert_eq!(alignment.reasons, NO_SUMMARY);
        assert_eq!(resp.cost.llm_calls, 0);
        assert_eq!(h.judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scratch_space_is_released() {
        let h = harness(Setup::default()).await;
        h.evaluator
            .evaluate(&request(BASE, &[OTHER]))
            .await
            .unwrap();
        let _ = h.evaluator.evaluate(&request(MISSING, &[])).await;

        let leftovers = std::fs::read_dir(&h.work_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let h = harness(Setup::default()).await;
        let mut req = request(BASE, &[]);
        req.video_url = "not-a-url".into();

        let err = h.evaluator.evaluate(&req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
