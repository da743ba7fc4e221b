// Paper artifacts: PDF download with bounded retries, local archive, text extraction.
// Files are keyed by paper id; an existing file is trusted without re-validation.

pub mod download;
pub mod pdf;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

pub use download::{DownloadPolicy, Downloader};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Could not retrieve {url} after {attempts} attempts")]
    Unavailable { url: String, attempts: u32 },

    #[error("Could not extract text from {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Where the pipeline gets paper PDFs from.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Local path of the paper's PDF, downloading it first if needed.
    async fn obtain(&self, paper_id: &str, url: &str) -> Result<PathBuf, ArtifactError>;

    /// Removes a local PDF that turned out to be unusable.
    async fn discard(&self, path: &Path);
}

/// PDFs stored as `<dir>/<paper id>.pdf`.
pub struct PaperArchive {
    dir: PathBuf,
    downloader: Downloader,
}

impl PaperArchive {
    pub fn new(dir: impl Into<PathBuf>, downloader: Downloader) -> Self {
        Self {
            dir: dir.into(),
            downloader,
        }
    }

    pub fn path_for(&self, paper_id: &str) -> PathBuf {
        self.dir.join(format!("{}.pdf", paper_id.replace('/', "_")))
    }
}

#[async_trait]
impl ArtifactStore for PaperArchive {
    async fn obtain(&self, paper_id: &str, url: &str) -> Result<PathBuf, ArtifactError> {
        let target = self.path_for(paper_id);
        self.downloader
            .download(url, &target)
            .await
            .ok_or_else(|| ArtifactError::Unavailable {
                url: url.to_string(),
                attempts: self.downloader.attempts(),
            })
    }

    async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("Removed unusable PDF {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove unusable PDF {}: {e}", path.display()),
        }
    }
}
