use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::responder::context::ContextError;

/// Inputs per embeddings request.
const BATCH_SIZE: usize = 64;

/// Turns texts into vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ContextError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ContextError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: batch,
            })
            .send()
            .await?;

        let status = response.status();
        let payload = response.text().await?;
        if !status.is_success() {
            return Err(ContextError::Embedding {
                status: status.as_u16(),
                message: payload,
            });
        }

        let mut data: EmbeddingsResponse = serde_json::from_str(&payload)?;
        if data.data.len() != batch.len() || data.data.iter().any(|r| r.embedding.is_empty()) {
            return Err(ContextError::Embedding {
                status: status.as_u16(),
                message: format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    data.data.len()
                ),
            });
        }
        data.data.sort_by_key(|r| r.index);
        Ok(data.data.into_iter().map(|r| r.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ContextError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        debug!("Embedded {} inputs with {}", inputs.len(), self.model);
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1/")
    }

    fn embedder(base: &str) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            base,
            "sk-test".to_string(),
            "text-embedding-3-small".to_string(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_embed_restores_input_order() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                let n = body["input"].as_array().map(Vec::len).unwrap_or(0);
                let data: Vec<Value> = (0..n)
                    .rev()
                    .map(|i| json!({"index": i, "embedding": [i as f32, 1.0]}))
                    .collect();
                Json(json!({"data": data}))
            }),
        );
        let base = serve(router).await;

        let inputs: Vec<String> = (0..3).map(|i| format!("chunk {i}")).collect();
        let vectors = embedder(&base).embed(&inputs).await.unwrap();
        assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_embed_surfaces_api_errors() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid key") }),
        );
        let base = serve(router).await;

        let err = embedder(&base)
            .embed(&["q".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Embedding { status: 401, .. }));
    }
}
