use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::summary::SummaryError;

/// Failure while turning one candidate into a published, persisted paper.
///
/// The pipeline records `to_string()` of this error as the paper's
/// `error_message`, so messages are written for a human reading the store.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Summarization error: {0}")]
    Summary(#[from] SummaryError),

    #[error("Publish failed for topic '{0}'")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
