//! Backend detection: probe configured backends in priority order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use lore_core::{BackendConfig, BackendKind, EmbeddingBackend, EmbeddingConfig, LoreError, Result};

use crate::mock::MockEmbedder;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;

/// Instantiate one configured backend.
pub fn build_backend(
    backend: &BackendConfig,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingBackend>> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let probe_timeout = Duration::from_millis(config.probe_timeout_ms.max(1));

    Ok(match backend.kind {
        BackendKind::Ollama => Arc::new(OllamaBackend::new(
            &backend.url,
            &config.model,
            config.dimension,
            timeout,
            probe_timeout,
        )?),
        BackendKind::OpenAi => {
            let api_key = backend
                .api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok());
            Arc::new(OpenAiBackend::new(
                &backend.url,
                &config.model,
                config.dimension,
                api_key,
                timeout,
                probe_timeout,
            )?)
        }
        BackendKind::Mock => Arc::new(MockEmbedder::with_dimension(config.dimension)),
    })
}

fn probe_label(backend: &BackendConfig) -> String {
    match backend.kind {
        BackendKind::Ollama => format!("ollama@{}", backend.url),
        BackendKind::OpenAi => format!("openai@{}", backend.url),
        BackendKind::Mock => "mock".to_string(),
    }
}

/// Health-checked backend selection, cached for the process lifetime.
pub struct BackendRegistry {
    config: EmbeddingConfig,
    selected: RwLock<Option<Arc<dyn EmbeddingBackend>>>,
}

impl BackendRegistry {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            selected: RwLock::new(None),
        }
    }

    /// The cached backend, probing on first use.
    pub async fn get(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        if let Some(backend) = self.selected.read().await.as_ref() {
            return Ok(backend.clone());
        }
        self.reprobe().await
    }

    /// Drop the cached choice and probe again.
    pub async fn reprobe(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        let mut selected = self.selected.write().await;
        let backend = self.detect().await?;
        *selected = Some(backend.clone());
        Ok(backend)
    }

    async fn probe_all(&self) -> Result<Option<Arc<dyn EmbeddingBackend>>> {
        for candidate in &self.config.backends {
            let backend = build_backend(candidate, &self.config)?;
            if backend.check_connection().await {
                info!(
                    backend = %probe_label(candidate),
                    model = %backend.model(),
                    "Using embedding backend"
                );
                return Ok(Some(backend));
            }
        }
        Ok(None)
    }

    async fn detect(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        if let Some(backend) = self.probe_all().await? {
            return Ok(backend);
        }

        let attempted: Vec<String> = self.config.backends.iter().map(probe_label).collect();

        if !self.config.auto_setup {
            return Err(LoreError::BackendUnavailable { attempted });
        }

        if !self.start_local_daemon() {
            return Err(LoreError::BackendUnavailable { attempted });
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.auto_setup_wait_secs);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Some(backend) = self.probe_all().await? {
                return Ok(backend);
            }
        }

        warn!("Auto-started embedding backend never answered its probe");
        Err(LoreError::BackendUnavailable { attempted })
    }

    /// Launch `ollama serve` in the background if an Ollama backend is configured.
    fn start_local_daemon(&self) -> bool {
        if !self
            .config
            .backends
            .iter()
            .any(|b| b.kind == BackendKind::Ollama)
        {
            return false;
        }

        info!("No embedding backend answered; starting `ollama serve`");
        match tokio::process::Command::new("ollama")
            .arg("serve")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(false)
            .spawn()
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to start ollama: {}", e);
                false
            }
        }
    }
}
