//! OpenAI-compatible embedding backend (`/v1/embeddings`).
//!
//! Works with LM Studio, llama.cpp server, vLLM and the hosted API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use lore_core::{EmbeddingBackend, LoreError, Result};

use crate::http;

pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
    timeout: Duration,
    probe_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        api_key: Option<String>,
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            api_key,
            timeout,
            probe_timeout,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| http::request_error(e, "openai embed", self.timeout))?;
        let response = http::check_status(response, &self.model).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LoreError::embedding(format!("Invalid openai response: {}", e)))?;

        let first = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .ok_or_else(|| LoreError::embedding("Invalid openai response: missing data array"))?;
        http::parse_vector(first.get("embedding"), "openai")
    }

    async fn check_connection(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self
            .request(self.client.get(&url))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("OpenAI-compatible probe at {} failed: {}", self.base_url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embed_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"index": 0, "embedding": [1.0, 0.0]}]}"#)
            .create_async()
            .await;

        let backend = OpenAiBackend::new(
            server.url(),
            "text-embedding-3-small",
            2,
            Some("secret".to_string()),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(backend.embed("hi").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_client_error_is_not_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(400)
            .with_body("bad input")
            .create_async()
            .await;

        let backend = OpenAiBackend::new(
            server.url(),
            "m",
            2,
            None,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();

        let err = backend.embed("hi").await.unwrap_err();
        assert!(matches!(err, LoreError::Remote { status: 400, .. }));
        assert!(!err.is_transient());
    }
}
