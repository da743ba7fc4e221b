use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{error, info, warn};

/// Retry policy for a single artifact download.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Bound on each individual request.
    pub timeout: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct Downloader {
    client: Client,
    policy: DownloadPolicy,
}

impl Downloader {
    pub fn new(policy: DownloadPolicy) -> Self {
        Self {
            client: Client::builder()
                .timeout(policy.timeout)
                .build()
                .expect("Failed to build HTTP client"),
            policy,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.policy.attempts
    }

    /// Downloads `url` to `target`, returning the path on success.
    ///
    /// An existing `target` counts as success without a request. Non-200
    /// responses, HTML bodies and transport errors each consume an attempt.
    /// Returns `None` once every attempt has failed; nothing is left at
    /// `target` in that case.
    pub async fn download(&self, url: &str, target: &Path) -> Option<PathBuf> {
        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            info!("PDF already present: {}", target.display());
            return Some(target.to_path_buf());
        }

        let attempts = self.policy.attempts;
        for attempt in 1..=attempts {
            match self.try_once(url, target).await {
                Ok(()) => {
                    info!("Downloaded {url} to {}", target.display());
                    return Some(target.to_path_buf());
                }
                Err(e) => warn!("Download attempt {attempt}/{attempts} for {url} failed: {e}"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        error!("Giving up on {url} after {attempts} attempts");
        None
    }

    async fn try_once(&self, url: &str, target: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            bail!("HTTP {status}");
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;
        if is_html_response(content_type.as_deref(), &body) {
            bail!("got HTML instead of PDF (content-type={content_type:?})");
        }

        write_atomic(target, body).await
    }
}

fn is_html_response(content_type: Option<&str>, body: &[u8]) -> bool {
    if content_type.is_some_and(|v| v.to_ascii_lowercase().contains("text/html")) {
        return true;
    }
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let head: Vec<u8> = body[start..]
        .iter()
        .take(14)
        .map(u8::to_ascii_lowercase)
        .collect();
    head.starts_with(b"<!doctype html") || head.starts_with(b"<html")
}

/// Writes through a temp file in the target directory so a failed or
/// interrupted write never leaves a partial PDF behind.
async fn write_atomic(target: &Path, body: Bytes) -> Result<()> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&body)?;
        tmp.persist(&target)?;
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;

    /// Serves a fixed response at `/paper.pdf` and counts requests.
    async fn serve(status: AxumStatus, body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/paper.pdf",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (status, body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/paper.pdf"), hits)
    }

    fn downloader(attempts: u32) -> Downloader {
        Downloader::new(DownloadPolicy {
            attempts,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        })
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_non_200() {
        let (url, hits) = serve(AxumStatus::SERVICE_UNAVAILABLE, b"busy").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2401.00001.pdf");

        let result = downloader(4).download(&url, &target).await;

        assert!(result.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert!(!target.exists());
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_writes_file_on_200() {
        let (url, hits) = serve(AxumStatus::OK, b"%PDF-1.4 fake body").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("2401.00001.pdf");

        let result = downloader(3).download(&url, &target).await;

        assert_eq!(result.as_deref(), Some(target.as_path()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.4 fake body");
    }

    #[tokio::test]
    async fn test_existing_file_skips_request() {
        let (url, hits) = serve(AxumStatus::OK, b"%PDF-new").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("p.pdf");
        std::fs::write(&target, b"%PDF-old").unwrap();

        let result = downloader(3).download(&url, &target).await;

        assert!(result.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-old");
    }

    #[tokio::test]
    async fn test_html_body_counts_as_failed_attempt() {
        let (url, hits) = serve(AxumStatus::OK, b"  <!DOCTYPE html><html>captcha</html>").await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("p.pdf");

        let result = downloader(2).download(&url, &target).await;

        assert!(result.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!target.exists());
    }

    #[test]
    fn test_is_html_response() {
        assert!(is_html_response(Some("text/html; charset=utf-8"), b"%PDF"));
        assert!(is_html_response(None, b"\n<HTML><body>"));
        assert!(!is_html_response(Some("application/pdf"), b"%PDF-1.7"));
        assert!(!is_html_response(None, b""));
    }
}
