//! OpenAI-compatible model client: summarizer, alignment judge, transcriber

use super::{AlignmentJudge, AudioTrack, StructuredSummary, Summarizer, Transcriber, Verdict, VideoSummary};
use crate::config::{LlmConfig, SummaryMode};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Transcripts handed to the summarizer are capped at this many characters
const TRANSCRIPT_LIMIT: usize = 8000;

const FREE_SUMMARY_PROMPT: &str = "Describe in detail (120-200 words) what happens in the video, \
based ONLY on what is visible in the frames and, if provided, what is heard in the transcript. \
Mention the visual layout when it is evident (for example a person at the top and gameplay at the \
bottom). If subtitles appear, say so, and name their language only when it is clearly legible. \
Do not invent anything.";

const HYBRID_SUMMARY_PROMPT: &str = "Return ONLY JSON with EXACTLY these keys: \
{narrative, events, people, objects, locations, topics, layout_hints, heard_phrases}. \
Use only clear evidence from the images (and the transcript if included); when something is not \
visible or audible use \"unknown\". 'narrative' is 120-200 words. The list keys are arrays of short \
strings. 'layout_hints' is {facecam_top: bool|\"unknown\", gameplay_bottom: bool|\"unknown\", \
subtitles: {present: bool, language: string|\"unknown\"}}.";

fn judge_prompt(brief: &str, summary: &str, approval_threshold: f64) -> String {
    format!(
        r#"You are a STRICT campaign compliance reviewer.
Compare the video ONLY against what the campaign asks for. Do not penalise extras.
Use the provided summary text and/or JSON as the ONLY evidence. Anything not stated is unknown.

STEPS:
1) Extract the atomic requirements of the brief.
2) Mark each one met / partial / not_met based on explicit evidence.
3) match_percent = round((met + 0.5*partial) / max(total, 1) * 100, 2); approved = match_percent >= {threshold}.

CAMPAIGN BRIEF:
"""{brief}"""

VIDEO SUMMARY (text or JSON):
"""{summary}"""

OUTPUT JSON:
{{
    "match_percent": 0-100,
    "approved": true/false,
    "reasons": "2-3 sentences, no lists."
}}"#,
        threshold = approval_threshold,
        brief = brief,
        summary = summary,
    )
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// The JSON payload of a model reply, with any markdown fence removed
fn strip_fences(raw: &str) -> &str {
    fence_regex()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim()
}

/// Parse a judge reply into a verdict.
///
/// Accepts fenced JSON, the `aproved` spelling, numeric strings and list
/// reasons. `match_percent` is clamped to [0, 100] and `approved` falls back
/// to the threshold when absent.
pub fn parse_verdict(raw: &str, approval_threshold: f64) -> Result<Verdict> {
    let snippet: String = raw.chars().take(200).collect();
    let value: Value = serde_json::from_str(strip_fences(raw))
        .map_err(|e| Error::MalformedJudgeOutput(format!("{}: {}", e, snippet)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::MalformedJudgeOutput(format!("not a JSON object: {}", snippet)))?;

    let match_percent = match obj.get("match_percent") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|p| p.is_finite())
    .ok_or_else(|| Error::MalformedJudgeOutput(format!("missing match_percent: {}", snippet)))?
    .clamp(0.0, 100.0);

    let approved = obj
        .get("approved")
        .or_else(|| obj.get("aproved"))
        .and_then(Value::as_bool)
        .unwrap_or(match_percent >= approval_threshold);

    let reasons = match obj.get("reasons") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    };
    let reasons = if reasons.is_empty() {
        "No reasons given.".to_string()
    } else {
        reasons
    };

    Ok(Verdict {
        approved,
        match_percent,
        reasons,
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible API
pub struct LlmClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    summary_model: String,
    judge_model: String,
    transcription_model: String,
    summary_mode: SummaryMode,
    retries: usize,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key(),
            summary_model: config.summary_model.clone(),
            judge_model: config.judge_model.clone(),
            transcription_model: config.transcription_model.clone(),
            summary_mode: config.summary_mode_kind()?,
            retries: 2,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid LLM base URL: {}", e)))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        wrap: fn(String) -> Error,
    ) -> Result<T> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            let req = request
                .try_clone()
                .ok_or_else(|| wrap("Failed to clone model request".to_string()))?;
            match req.send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => return ok.json::<T>().await.map_err(|e| wrap(e.to_string())),
                    Err(e) => last_err = Some(wrap(e.to_string())),
                },
                Err(e) => last_err = Some(wrap(e.to_string())),
            }

            if attempt < self.retries {
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| wrap("Model request failed".to_string())))
    }

    async fn chat(&self, body: Value, wrap: fn(String) -> Error) -> Result<String> {
        let url = self.endpoint("v1/chat/completions")?;
        let request = self.authorized(self.client.post(url).json(&body));
        let response: ChatResponse = self.send_with_retry(request, wrap).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| wrap("empty model reply".to_string()))
    }
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, frames: &[Vec<u8>], transcript: Option<&str>) -> Result<VideoSummary> {
        let instructions = match self.summary_mode {
            SummaryMode::Free => FREE_SUMMARY_PROMPT,
            SummaryMode::Hybrid => HYBRID_SUMMARY_PROMPT,
        };

        let mut content = vec![
            json!({"type": "text", "text": instructions}),
            json!({"type": "text", "text": "Representative frames:"}),
        ];
        for frame in frames {
            let encoded = base64::engine::general_purpose::STANDARD.encode(frame);
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/jpeg;base64,{}", encoded)}
            }));
        }
        if let Some(text) = transcript.filter(|t| !t.trim().is_empty()) {
            let text: String = text.chars().take(TRANSCRIPT_LIMIT).collect();
            content.push(json!({"type": "text", "text": format!("TRANSCRIPT:\n{}", text)}));
        }

        let mut body = json!({
            "model": self.summary_model,
            "messages": [{"role": "user", "content": content}],
        });
        match self.summary_mode {
            SummaryMode::Free => {
                body["max_tokens"] = json!(1200);
                body["temperature"] = json!(0.2);
            }
            SummaryMode::Hybrid => {
                body["max_tokens"] = json!(1400);
                body["temperature"] = json!(0.1);
                body["response_format"] = json!({"type": "json_object"});
            }
        }

        debug!(frames = frames.len(), mode = ?self.summary_mode, "Requesting video summary");
        let reply = self.chat(body, Error::Summarizer).await?;

        match self.summary_mode {
            SummaryMode::Free => Ok(VideoSummary::Narrative(reply)),
            SummaryMode::Hybrid => {
                let structured: StructuredSummary = serde_json::from_str(strip_fences(&reply))
                    .map_err(|e| Error::Summarizer(format!("invalid structured summary: {}", e)))?;
                Ok(VideoSummary::Structured(structured))
            }
        }
    }
}

#[async_trait]
impl AlignmentJudge for LlmClient {
    async fn judge(&self, brief: &str, summary: &VideoSummary, approval_threshold: f64) -> Result<Verdict> {
        let prompt = judge_prompt(brief, &summary.to_prompt_text(), approval_threshold);
        let body = json!({
            "model": self.judge_model,
            "messages": [{"role": "user", "content": prompt}],
            "response_format": {"type": "json_object"},
            "temperature": 0.1,
        });

        let reply = self.chat(body, Error::Judge).await?;
        parse_verdict(&reply, approval_threshold)
    }
}

#[async_trait]
impl Transcriber for LlmClient {
    async fn transcribe(&self, audio: &AudioTrack) -> Result<Option<String>> {
        let bytes = tokio::fs::read(&audio.path).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "text")
            .part("file", part);

        let url = self.endpoint("v1/audio/transcriptions")?;
        let response = self
            .authorized(self.client.post(url).multipart(form))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Transcription(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transcription(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            warn!(path = %audio.path.display(), "Empty transcription");
            return Ok(None);
        }
        Ok(Some(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, mode: &str) -> LlmClient {
        let config = LlmConfig {
            base_url: format!("{}/", server.uri()),
            summary_mode: mode.to_string(),
            timeout_secs: 5,
            ..Default::default()
        };
        LlmClient::new(&config)
            .unwrap()
            .with_api_key(Some("sk-test".to_string()))
    }

    fn chat_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[test]
    fn test_parse_verdict_plain() {
        let v = parse_verdict(
            r#"{"match_percent": 82.5, "approved": true, "reasons": "Meets the brief."}"#,
            70.0,
        )
        .unwrap();
        assert!(v.approved);
        assert_eq!(v.match_percent, 82.5);
        assert_eq!(v.reasons, "Meets the brief.");
    }

    #[test]
    fn test_parse_verdict_tolerant() {
        let raw = "Here you go:\n```json\n{\"match_percent\": \"140%\", \"aproved\": false, \"reasons\": [\"a\", \"b\"]}\n```";
        let v = parse_verdict(raw, 70.0).unwrap();
        assert_eq!(v.match_percent, 100.0);
        assert!(!v.approved);
        assert_eq!(v.reasons, "a b");

        let v = parse_verdict(r#"{"match_percent": 65}"#, 60.0).unwrap();
        assert!(v.approved);
        assert_eq!(v.reasons, "No reasons given.");

        let v = parse_verdict(r#"{"match_percent": -3}"#, 60.0).unwrap();
        assert_eq!(v.match_percent, 0.0);
        assert!(!v.approved);
    }

    #[test]
    fn test_parse_verdict_malformed() {
        assert!(matches!(
            parse_verdict("I think it matches", 70.0),
            Err(Error::MalformedJudgeOutput(_))
        ));
        assert!(matches!(
            parse_verdict("[1, 2]", 70.0),
            Err(Error::MalformedJudgeOutput(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"approved": true}"#, 70.0),
            Err(Error::MalformedJudgeOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_judge_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(chat_reply(
                r#"{"match_percent": 75, "aproved": true, "reasons": "Facecam on top."}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, "free");
        let verdict = client
            .judge("Facecam on top", &VideoSummary::Narrative("A facecam".into()), 70.0)
            .await
            .unwrap();
        assert!(verdict.approved);
        assert_eq!(verdict.match_percent, 75.0);
    }

    #[tokio::test]
    async fn test_judge_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server, "free");
        let err = client
            .judge("brief", &VideoSummary::Narrative("x".into()), 70.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Judge(_)));
    }

    #[tokio::test]
    async fn test_hybrid_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(chat_reply(
                r#"{"narrative": "Gameplay with a streamer", "people": ["streamer"], "layout_hints": {"facecam_top": true}}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, "hybrid");
        let summary = client
            .summarize(&[vec![0xFF, 0xD8, 0xFF]], Some("hello chat"))
            .await
            .unwrap();
        match summary {
            VideoSummary::Structured(s) => {
                assert_eq!(s.narrative, "Gameplay with a streamer");
                assert_eq!(s.people, vec!["streamer"]);
                assert_eq!(s.layout_hints.get("facecam_top"), Some(&json!(true)));
            }
            other => panic!("expected structured summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_free_summary_empty_reply_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(chat_reply("   "))
            .mount(&server)
            .await;

        let client = client_for(&server, "free");
        let err = client.summarize(&[], None).await.unwrap_err();
        assert!(matches!(err, Error::Summarizer(_)));
    }

    #[tokio::test]
    async fn test_transcription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hola a todos\n"))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let wav = tmp.path().join("audio.wav");
        std::fs::write(&wav, vec![0u8; 128]).unwrap();

        let client = client_for(&server, "free");
        let text = client
            .transcribe(&AudioTrack {
                path: wav,
                duration_secs: 1.0,
            })
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("hola a todos"));
    }
}
