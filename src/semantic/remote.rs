//! HTTP embedding backend for OpenAI-compatible `/embeddings` endpoints
//! (OpenAI, Ollama, llama.cpp server, LM Studio, ...).
//!
//! Requests are not retried; a failed call surfaces as `EmbeddingFailed`.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::semantic::embeddings::{Embedder, EmbeddingError};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl RemoteEmbedder {
    /// Connect to `endpoint` serving `model`.
    ///
    /// When `dimensions` is `None` the backend is probed once with a short
    /// text to learn the vector size.
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
        dimensions: Option<usize>,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let mut embedder = Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            dimensions: dimensions.unwrap_or(0),
        };

        if dimensions.is_none() {
            let probe = embedder.request(&["test".to_string()]).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to probe dimensions: {e}"))
            })?;
            embedder.dimensions = probe.first().map(Vec::len).unwrap_or(0);
            if embedder.dimensions == 0 {
                return Err(EmbeddingError::InitFailed(
                    "Backend returned an empty embedding".to_string(),
                ));
            }
        }

        log::info!(
            "Using remote embedding model '{}' at {} ({} dimensions)",
            embedder.model,
            embedder.endpoint,
            embedder.dimensions
        );

        Ok(embedder)
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "status={status} body={body}"
            )));
        }

        let body = response
            .text()
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        parse_response(&body, texts.len())
    }
}

/// Decode a response body, restoring input order from `index` when present.
fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::EmbeddingFailed(format!("malformed response: {e}")))?;

    if parsed.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: parsed.data.len(),
        });
    }

    parsed.data.sort_by_key(|d| d.index.unwrap_or(0));

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

impl Embedder for RemoteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_restores_order() {
        let body = r#"{
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "nomic-embed-text"
        }"#;

        let vectors = parse_response(body, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_response_without_index() {
        let body = r#"{"data": [{"embedding": [0.5, 0.5, 0.5]}]}"#;
        let vectors = parse_response(body, 1).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5, 0.5]]);
    }

    #[test]
    fn test_parse_response_count_mismatch() {
        let body = r#"{"data": [{"embedding": [0.5]}]}"#;
        assert!(matches!(
            parse_response(body, 2),
            Err(EmbeddingError::CountMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_parse_response_malformed() {
        assert!(matches!(
            parse_response("<html>oops</html>", 1),
            Err(EmbeddingError::EmbeddingFailed(_))
        ));
    }

    #[test]
    fn test_known_dimensions_skip_probe() {
        let embedder = RemoteEmbedder::new(
            "http://127.0.0.1:9/v1/embeddings",
            "nomic-embed-text",
            None,
            Duration::from_millis(200),
            Some(768),
        )
        .unwrap();

        assert_eq!(embedder.dimensions(), 768);
        assert_eq!(embedder.name(), "nomic-embed-text");
    }

    #[test]
    fn test_unreachable_backend_is_embedding_failure() {
        let embedder = RemoteEmbedder::new(
            "http://127.0.0.1:9/v1/embeddings",
            "nomic-embed-text",
            None,
            Duration::from_millis(200),
            Some(768),
        )
        .unwrap();

        assert!(matches!(
            embedder.embed("hello"),
            Err(EmbeddingError::EmbeddingFailed(_))
        ));
    }
}
