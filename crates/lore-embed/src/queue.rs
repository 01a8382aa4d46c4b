//! Embedding queue: batched, bounded-concurrency embedding with retry.
//!
//! Requests land on an unbounded channel. A dispatcher task drains up to
//! `batch_size` of them into a batch, waits for one of `max_concurrent`
//! permits and runs the batch on its own task. Inside a batch every
//! request is embedded in parallel and answered individually.
//!
//! Query embeds go through [`EmbeddingQueue::embed_now`], which calls the
//! backend directly and never waits behind queued indexing work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use lore_core::{EmbeddingBackend, EmbeddingConfig, EmbeddingScheme, LoreError, Result};

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub max_retries: u32,
    /// Linear backoff unit: attempt N waits N * retry_delay.
    pub retry_delay: Duration,
    /// Hard wall-clock limit per embed call.
    pub timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for QueueOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

struct PendingRequest {
    text: String,
    reply: oneshot::Sender<Result<Vec<f32>>>,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Shared embedding front-end for every sync engine.
pub struct EmbeddingQueue {
    sender: mpsc::UnboundedSender<PendingRequest>,
    counters: Arc<Counters>,
    backend: Arc<dyn EmbeddingBackend>,
    options: QueueOptions,
}

impl EmbeddingQueue {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn EmbeddingBackend>, options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(dispatch(
            receiver,
            backend.clone(),
            options.clone(),
            counters.clone(),
        ));

        Self {
            sender,
            counters,
            backend,
            options,
        }
    }

    /// Embed one text, waiting for its batch to complete.
    pub async fn embed(&self, text: impl Into<String>) -> Result<Vec<f32>> {
        let (reply, response) = oneshot::channel();
        self.counters.queued.fetch_add(1, Ordering::SeqCst);

        if self
            .sender
            .send(PendingRequest {
                text: text.into(),
                reply,
            })
            .is_err()
        {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(LoreError::internal("embedding queue has shut down"));
        }

        response
            .await
            .map_err(|_| LoreError::internal("embedding request dropped"))?
    }

    /// Embed one text immediately, outside the batch queue.
    ///
    /// Same timeout and retry policy as queued requests, but not counted
    /// by [`EmbeddingQueue::pending`] or [`EmbeddingQueue::drain`].
    pub async fn embed_now(&self, text: &str) -> Result<Vec<f32>> {
        embed_with_retry(self.backend.as_ref(), text, &self.options).await
    }

    /// Wait until nothing is queued or in flight.
    pub async fn drain(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Requests queued or in flight.
    pub fn pending(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
            + self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn backend(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.backend
    }

    /// Scheme tag for vectors produced by this queue.
    pub fn scheme(&self) -> EmbeddingScheme {
        EmbeddingScheme::current(self.backend.model())
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<PendingRequest>,
    backend: Arc<dyn EmbeddingBackend>,
    options: QueueOptions,
    counters: Arc<Counters>,
) {
    let permits = Arc::new(Semaphore::new(options.max_concurrent));

    while let Some(first) = receiver.recv().await {
        let mut batch = vec![first];
        while batch.len() < options.batch_size {
            match receiver.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        counters.queued.fetch_sub(batch.len(), Ordering::SeqCst);
        counters.in_flight.fetch_add(batch.len(), Ordering::SeqCst);
        debug!(size = batch.len(), "Dispatching embedding batch");

        let backend = backend.clone();
        let options = options.clone();
        let counters = counters.clone();
        tokio::spawn(async move {
            let _permit = permit;
            join_all(batch.into_iter().map(|request| {
                let backend = backend.clone();
                let options = &options;
                let counters = counters.clone();
                async move {
                    let result = embed_with_retry(backend.as_ref(), &request.text, options).await;
                    // Receiver may have given up; nothing to do then.
                    let _ = request.reply.send(result);
                    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }))
            .await;
        });
    }
}

/// Embed with timeout, linear backoff on transient errors and one model provision.
async fn embed_with_retry(
    backend: &dyn EmbeddingBackend,
    text: &str,
    options: &QueueOptions,
) -> Result<Vec<f32>> {
    let mut attempt: u32 = 0;
    let mut provisioned = false;

    loop {
        let result = match tokio::time::timeout(options.timeout, backend.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(LoreError::Timeout {
                operation: format!("{} embed", backend.name()),
                millis: options.timeout.as_millis() as u64,
            }),
        };

        let error = match result {
            Ok(vector) => {
                if vector.len() != backend.dimension() {
                    return Err(LoreError::DimensionMismatch {
                        expected: backend.dimension(),
                        actual: vector.len(),
                    });
                }
                return Ok(vector);
            }
            Err(e) => e,
        };

        match error {
            LoreError::ModelNotFound { ref model } if !provisioned => {
                warn!(model = %model, "Embedding model missing, provisioning once");
                provisioned = true;
                backend.provision_model().await?;
            }
            e if e.is_transient() && attempt < options.max_retries => {
                attempt += 1;
                let delay = options.retry_delay * attempt;
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying embed: {}", e);
                tokio::time::sleep(delay).await;
            }
            e => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    fn options() -> QueueOptions {
        QueueOptions {
            batch_size: 4,
            max_concurrent: 2,
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    /// Fails transiently a fixed number of times, then delegates to the mock.
    struct Flaky {
        inner: MockEmbedder,
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn model(&self) -> &str {
            "flaky"
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(LoreError::network("connection reset"));
            }
            self.inner.embed(text).await
        }
        async fn check_connection(&self) -> bool {
            true
        }
    }

    /// Reports a missing model until provisioned.
    struct NeedsPull {
        inner: MockEmbedder,
        pulled: AtomicBool,
        pulls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for NeedsPull {
        fn name(&self) -> &str {
            "needs-pull"
        }
        fn model(&self) -> &str {
            "absent"
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if !self.pulled.load(Ordering::SeqCst) {
                return Err(LoreError::ModelNotFound {
                    model: "absent".to_string(),
                });
            }
            self.inner.embed(text).await
        }
        async fn check_connection(&self) -> bool {
            true
        }
        async fn provision_model(&self) -> Result<()> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.pulled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Counts concurrently running embeds.
    struct Slow {
        inner: MockEmbedder,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn model(&self) -> &str {
            "slow"
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }
        async fn check_connection(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_embed_through_queue() {
        let queue = EmbeddingQueue::new(Arc::new(MockEmbedder::with_dimension(8)), options());
        let vector = queue.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), 8);
        queue.drain().await;
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = Arc::new(Flaky {
            inner: MockEmbedder::with_dimension(8),
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let queue = EmbeddingQueue::new(backend.clone(), options());

        assert!(queue.embed("retry me").await.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let backend = Arc::new(Flaky {
            inner: MockEmbedder::with_dimension(8),
            failures_left: AtomicUsize::new(100),
            calls: AtomicUsize::new(0),
        });
        let queue = EmbeddingQueue::new(backend.clone(), options());

        let err = queue.embed("never").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_missing_model_provisioned_once() {
        let backend = Arc::new(NeedsPull {
            inner: MockEmbedder::with_dimension(8),
            pulled: AtomicBool::new(false),
            pulls: AtomicUsize::new(0),
        });
        let queue = EmbeddingQueue::new(backend.clone(), options());

        assert!(queue.embed("pull first").await.is_ok());
        assert!(queue.embed("already pulled").await.is_ok());
        assert_eq!(backend.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let backend = Arc::new(Slow {
            inner: MockEmbedder::with_dimension(8),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = Arc::new(EmbeddingQueue::new(backend.clone(), options()));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.embed(format!("text number {}", i)).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        // max_concurrent batches of batch_size requests each
        assert!(backend.peak.load(Ordering::SeqCst) <= 8);
        queue.drain().await;
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_embed_now_skips_queued_work() {
        let backend = Arc::new(Slow {
            inner: MockEmbedder::with_dimension(8),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = Arc::new(EmbeddingQueue::new(backend, options()));

        // 160 requests at 8 per 20ms round keep the queue busy for ~400ms.
        let tasks: Vec<_> = (0..160)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.embed(format!("backlog {}", i)).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.pending() > 0);

        let start = std::time::Instant::now();
        let vector = queue.embed_now("urgent query").await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(vector.len(), 8);
        assert!(queue.pending() > 0, "backlog finished before the direct embed");
        assert!(elapsed < Duration::from_millis(150), "direct embed took {:?}", elapsed);

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_wrong_length_vector_rejected() {
        struct Liar;

        #[async_trait]
        impl EmbeddingBackend for Liar {
            fn name(&self) -> &str {
                "liar"
            }
            fn model(&self) -> &str {
                "liar"
            }
            fn dimension(&self) -> usize {
                4
            }
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0; 3])
            }
            async fn check_connection(&self) -> bool {
                true
            }
        }

        let queue = EmbeddingQueue::new(Arc::new(Liar), options());
        let err = queue.embed("x").await.unwrap_err();
        assert!(matches!(err, LoreError::DimensionMismatch { expected: 4, actual: 3 }));
    }
}
