//! Per-paper retrieval context.
//!
//! The first question about a paper builds an index from its PDF: the text
//! is cut into overlapping chunks, each chunk is embedded, and the result is
//! saved as `<index dir>/<paper id>.json`. Later questions load that file.
//! A question is answered from the chunks closest to it by cosine similarity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::{pdf, ArtifactError};
use crate::models::paper::PaperRow;
use crate::responder::embeddings::Embedder;

pub const CHUNK_CHARS: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;
pub const TOP_K: usize = 4;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("No local PDF for paper {0}")]
    MissingArtifact(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("No embeddings backend configured")]
    NoEmbedder,

    #[error("Paper {0} has no text to index")]
    EmptyIndex(String),

    #[error("Embeddings HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embeddings API error (status {status}): {message}")]
    Embedding { status: u16, message: String },

    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Supplies the text an answer should be grounded on.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context_for(&self, paper: &PaperRow, question: &str) -> Result<String, ContextError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperIndex {
    pub paper_id: String,
    pub chunks: Vec<IndexedChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

impl PaperIndex {
    /// Texts of the `k` chunks most similar to `query`, best first.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<&str> {
        let query_norm = norm(query);
        if query_norm == 0.0 {
            return Vec::new();
        }
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .filter(|c| c.embedding.len() == query.len())
            .map(|c| (cosine(query, query_norm, &c.embedding), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(_, c)| c.text.as_str())
            .collect()
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(query: &[f32], query_norm: f32, other: &[f32]) -> f32 {
    let other_norm = norm(other);
    if other_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(other).map(|(a, b)| a * b).sum();
    dot / (query_norm * other_norm)
}

/// Splits `text` into chunks of `size` characters, each starting `size - overlap`
/// characters after the previous one. Blank chunks are dropped.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Embedding-backed context, indexes persisted per paper id.
pub struct EmbeddingContextProvider {
    index_dir: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
}

impl EmbeddingContextProvider {
    pub fn new(index_dir: impl Into<PathBuf>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            index_dir: index_dir.into(),
            embedder,
        }
    }

    pub fn index_path(&self, paper_id: &str) -> PathBuf {
        self.index_dir
            .join(format!("{}.json", paper_id.replace('/', "_")))
    }

    fn embedder(&self) -> Result<&Arc<dyn Embedder>, ContextError> {
        self.embedder.as_ref().ok_or(ContextError::NoEmbedder)
    }

    /// Builds and saves the index for `paper_id` from its text.
    pub async fn build_index(&self, paper_id: &str, text: &str) -> Result<PaperIndex, ContextError> {
        let texts = chunk_text(text, CHUNK_CHARS, CHUNK_OVERLAP);
        if texts.is_empty() {
            return Err(ContextError::EmptyIndex(paper_id.to_string()));
        }
        let vectors = self.embedder()?.embed(&texts).await?;
        let index = PaperIndex {
            paper_id: paper_id.to_string(),
            chunks: texts
                .into_iter()
                .zip(vectors)
                .map(|(text, embedding)| IndexedChunk { text, embedding })
                .collect(),
        };

        tokio::fs::create_dir_all(&self.index_dir).await?;
        tokio::fs::write(self.index_path(paper_id), serde_json::to_vec(&index)?).await?;
        info!("Built retrieval index for {paper_id} ({} chunks)", index.chunks.len());
        Ok(index)
    }

    async fn load_or_build(&self, paper: &PaperRow) -> Result<PaperIndex, ContextError> {
        let path = self.index_path(&paper.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Loading retrieval index {}", path.display());
            let bytes = tokio::fs::read(&path).await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let pdf_path = Path::new(&paper.local_pdf);
        if paper.local_pdf.is_empty() || !tokio::fs::try_exists(pdf_path).await.unwrap_or(false) {
            return Err(ContextError::MissingArtifact(paper.id.clone()));
        }
        let text = pdf::extract_text(pdf_path).await?;
        self.build_index(&paper.id, &text).await
    }
}

#[async_trait]
impl ContextProvider for EmbeddingContextProvider {
    async fn context_for(&self, paper: &PaperRow, question: &str) -> Result<String, ContextError> {
        let index = self.load_or_build(paper).await?;
        let query = self
            .embedder()?
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(index.top_k(&query, TOP_K).join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::paper::PaperStatus;

    /// Two-dimensional "embedding": counts of the words "routing" and "dataset".
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ContextError> {
            Ok(inputs
                .iter()
                .map(|t| {
                    vec![
                        t.matches("routing").count() as f32,
                        t.matches("dataset").count() as f32,
                    ]
                })
                .collect())
        }
    }

    fn paper(id: &str, local_pdf: &str) -> PaperRow {
        PaperRow {
            id: id.to_string(),
            title: "Sparse MoE".to_string(),
            summary: String::new(),
            link: String::new(),
            pdf_link: String::new(),
            local_pdf: local_pdf.to_string(),
            chat_topic: "2024-07-30 MoE".to_string(),
            status: PaperStatus::Completed,
            error_message: None,
            retry_count: 0,
            created_at: "2024-07-30T00:00:00.000000Z".to_string(),
            updated_at: "2024-07-30T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn test_chunk_text_overlaps() {
        let text: String = ('a'..='z').cycle().take(2500).collect();
        let chunks = chunk_text(&text, CHUNK_CHARS, CHUNK_OVERLAP);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[2].chars().count(), 900);
        let tail: String = chunks[0].chars().skip(800).collect();
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn test_chunk_text_short_and_blank() {
        assert_eq!(chunk_text("short", 1000, 200), vec!["short"]);
        assert!(chunk_text("   \n ", 1000, 200).is_empty());
    }

    #[test]
    fn test_top_k_ranks_by_cosine() {
        let index = PaperIndex {
            paper_id: "p".to_string(),
            chunks: vec![
                IndexedChunk { text: "about data".into(), embedding: vec![0.0, 1.0] },
                IndexedChunk { text: "about routing".into(), embedding: vec![1.0, 0.1] },
                IndexedChunk { text: "mixed".into(), embedding: vec![1.0, 1.0] },
                IndexedChunk { text: "wrong dim".into(), embedding: vec![1.0] },
            ],
        };
        assert_eq!(index.top_k(&[1.0, 0.0], 2), vec!["about routing", "mixed"]);
        assert!(index.top_k(&[0.0, 0.0], 2).is_empty());
    }

    #[tokio::test]
    async fn test_built_index_is_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            EmbeddingContextProvider::new(dir.path(), Some(Arc::new(KeywordEmbedder)));

        let text = format!("{}{}", "routing ".repeat(150), "dataset ".repeat(150));
        let built = provider.build_index("2401.00001", &text).await.unwrap();
        assert!(provider.index_path("2401.00001").exists());

        // No local PDF: the persisted index must be what answers.
        let context = provider
            .context_for(&paper("2401.00001", ""), "which dataset?")
            .await
            .unwrap();
        assert!(context.contains("dataset"));
        assert!(built.chunks.len() >= 2);
    }

    #[tokio::test]
    async fn test_missing_pdf_without_index() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            EmbeddingContextProvider::new(dir.path(), Some(Arc::new(KeywordEmbedder)));

        let err = provider
            .context_for(&paper("2401.00002", "/nonexistent/2401.00002.pdf"), "q")
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::MissingArtifact(id) if id == "2401.00002"));
    }

    #[tokio::test]
    async fn test_no_embedder_cannot_build() {
        let dir = tempfile::tempdir().unwrap();
        let provider = EmbeddingContextProvider::new(dir.path(), None);

        let err = provider.build_index("p", "some text").await.unwrap_err();
        assert!(matches!(err, ContextError::NoEmbedder));
    }
}
