use std::path::Path;

use crate::artifact::ArtifactError;

/// Extracts the plain text of a PDF.
///
/// Extraction is CPU-bound and can panic on malformed files, so it runs on the
/// blocking pool; a panic surfaces as `ArtifactError::Unreadable`.
pub async fn extract_text(path: &Path) -> Result<String, ArtifactError> {
    let owned = path.to_path_buf();
    let unreadable = |reason: String| ArtifactError::Unreadable {
        path: path.display().to_string(),
        reason,
    };

    tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
        .await
        .map_err(|e| unreadable(format!("extraction task failed: {e}")))?
        .map_err(|e| unreadable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_garbage_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let err = extract_text(&path).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Unreadable { .. }));
    }
}
