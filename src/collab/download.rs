//! Video downloaders

use super::{Downloader, LocalVideo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_5 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.5 Mobile/15E148 Safari/604.1";

fn limit_bytes(size_limit_mb: u64) -> u64 {
    size_limit_mb.saturating_mul(1024 * 1024)
}

/// Local file name for a URL: content hash plus the URL's extension
fn file_name_for(url: &str) -> String {
    let ext = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
        })
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string());
    let hash = blake3::hash(url.as_bytes()).to_hex().to_string();
    format!("dl_{}.{}", &hash[..16], ext)
}

/// Direct HTTP(S) downloads with a running size check
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    async fn fetch_inner(&self, url: &str, path: &Path, limit: u64, timeout: Duration) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(Error::Download(format!(
                    "{} bytes exceeds the {} byte limit",
                    length, limit
                )));
            }
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > limit {
                return Err(Error::Download(format!(
                    "download exceeded the {} byte limit",
                    limit
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        size_limit_mb: u64,
        timeout: Duration,
    ) -> Result<LocalVideo> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(file_name_for(url));
        debug!(url, path = %path.display(), "Downloading video");

        match self.fetch_inner(url, &path, limit_bytes(size_limit_mb), timeout).await {
            Ok(size_bytes) => {
                info!(url, size_bytes, "Downloaded video");
                Ok(LocalVideo {
                    url: url.to_string(),
                    path,
                    size_bytes,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(match e {
                    Error::Download(_) => e,
                    other => Error::Download(format!("{}: {}", url, other)),
                })
            }
        }
    }
}

/// Downloads through the `yt-dlp` executable (social media pages)
pub struct YtDlpDownloader {
    program: String,
}

impl YtDlpDownloader {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn args(url: &str, dest_dir: &Path, size_limit_mb: u64, timeout: Duration) -> Vec<String> {
        let template = dest_dir.join("%(id)s.%(ext)s");
        let mut args = vec![
            "--no-playlist".to_string(),
            "--format".to_string(),
            "mp4/bestvideo+bestaudio/best".to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--retries".to_string(),
            "5".to_string(),
            "--fragment-retries".to_string(),
            "5".to_string(),
            "--max-filesize".to_string(),
            format!("{}M", size_limit_mb),
            "--socket-timeout".to_string(),
            timeout.as_secs().max(1).to_string(),
            "--output".to_string(),
            template.to_string_lossy().to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
        ];

        if url.to_lowercase().contains("tiktok.com") {
            args.extend([
                "--user-agent".to_string(),
                MOBILE_USER_AGENT.to_string(),
                "--referer".to_string(),
                "https://www.tiktok.com/".to_string(),
            ]);
        }

        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        size_limit_mb: u64,
        timeout: Duration,
    ) -> Result<LocalVideo> {
        tokio::fs::create_dir_all(dest_dir).await?;
        debug!(url, "Downloading video with yt-dlp");

        let output = tokio::process::Command::new(&self.program)
            .args(Self::args(url, dest_dir, size_limit_mb, timeout))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Download(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Download(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| Error::Download(format!("yt-dlp produced no file for {}", url)))?;

        // --max-filesize skips oversized files without failing
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::Download(format!("{}: {}", path.display(), e)))?;
        if metadata.len() > limit_bytes(size_limit_mb) {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(Error::Download(format!(
                "{} exceeds the {} MB limit",
                url, size_limit_mb
            )));
        }

        info!(url, size_bytes = metadata.len(), "Downloaded video");
        Ok(LocalVideo {
            url: url.to_string(),
            path,
            size_bytes: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_file_name_for() {
        assert!(file_name_for("https://cdn.example.com/a/clip.MOV").ends_with(".mov"));
        assert!(file_name_for("https://www.tiktok.com/@user/video/123").ends_with(".mp4"));
        assert_ne!(
            file_name_for("https://cdn.example.com/a.mp4"),
            file_name_for("https://cdn.example.com/b.mp4")
        );
    }

    #[test]
    fn test_yt_dlp_args() {
        let dir = Path::new("/tmp/req");
        let args = YtDlpDownloader::args(
            "https://www.tiktok.com/@u/video/1",
            dir,
            200,
            Duration::from_secs(30),
        );
        assert!(args.contains(&"200M".to_string()));
        assert!(args.contains(&"30".to_string()));
        assert!(args.contains(&MOBILE_USER_AGENT.to_string()));
        assert_eq!(args.last().unwrap(), "https://www.tiktok.com/@u/video/1");

        let args = YtDlpDownloader::args("https://youtube.com/x", dir, 10, Duration::from_secs(5));
        assert!(!args.contains(&"--user-agent".to_string()));
    }

    #[tokio::test]
    async fn test_http_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new("test").unwrap();
        let video = downloader
            .fetch(&format!("{}/v.mp4", server.uri()), tmp.path(), 1, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(video.size_bytes, 2048);
        assert_eq!(std::fs::read(&video.path).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_http_download_size_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024 * 1024 + 1]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new("test").unwrap();
        let url = format!("{}/big.mp4", server.uri());
        let err = downloader
            .fetch(&url, tmp.path(), 1, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Download(_)));
        assert!(!tmp.path().join(file_name_for(&url)).exists());
    }

    #[tokio::test]
    async fn test_http_download_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new("test").unwrap();
        let err = downloader
            .fetch(&format!("{}/gone.mp4", server.uri()), tmp.path(), 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Download(_)));
    }
}
