//! Ollama embedding backend.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use lore_core::{EmbeddingBackend, LoreError, Result};

use crate::http;

/// Model pulls can take minutes.
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Backend for a local Ollama daemon (`/api/embeddings`).
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
    probe_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            timeout,
            probe_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::request_error(e, "ollama embed", self.timeout))?;
        let response = http::check_status(response, &self.model).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LoreError::embedding(format!("Invalid ollama response: {}", e)))?;
        http::parse_vector(json.get("embedding"), "ollama")
    }

    async fn check_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let healthy = response.status().is_success();
                if !healthy {
                    debug!("Ollama probe at {} failed: HTTP {}", self.base_url, response.status());
                }
                healthy
            }
            Err(e) => {
                debug!("Ollama probe at {} failed: {}", self.base_url, e);
                false
            }
        }
    }

    async fn provision_model(&self) -> Result<()> {
        info!(model = %self.model, "Pulling embedding model");

        let url = format!("{}/api/pull", self.base_url);
        let body = serde_json::json!({
            "name": self.model,
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .timeout(PULL_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::request_error(e, "ollama pull", PULL_TIMEOUT))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            warn!(model = %self.model, "Model pull failed: HTTP {}", status);
            return Err(LoreError::Remote { status, message });
        }

        info!(model = %self.model, "Embedding model pulled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: String) -> OllamaBackend {
        OllamaBackend::new(
            url,
            "nomic-embed-text",
            3,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embedding": [0.1, 0.2, 0.3]}"#)
            .create_async()
            .await;

        let vector = backend(server.url()).embed("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
        assert!((vector[1] - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_model_is_classified() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(404)
            .with_body(r#"{"error": "model \"nomic-embed-text\" not found, try pulling it first"}"#)
            .create_async()
            .await;

        let err = backend(server.url()).embed("hello").await.unwrap_err();
        assert!(matches!(err, LoreError::ModelNotFound { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = backend(server.url()).embed("hello").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_check_connection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models": []}"#)
            .create_async()
            .await;

        assert!(backend(server.url()).check_connection().await);
        assert!(!backend("http://127.0.0.1:1".to_string()).check_connection().await);
    }

    #[tokio::test]
    async fn test_provision_model() {
        let mut server = mockito::Server::new_async().await;
        let pull = server
            .mock("POST", "/api/pull")
            .with_status(200)
            .with_body(r#"{"status": "success"}"#)
            .create_async()
            .await;

        backend(server.url()).provision_model().await.unwrap();
        pull.assert_async().await;
    }
}
