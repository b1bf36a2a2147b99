//! Queue listeners.
//!
//! Each listener owns one polling task and a pool of workers fed through a bounded job
//! channel. The polling task consults the listener's feature flag before every receive,
//! so flipping the flag off pauses consumption without restarting the process.

pub mod dlq;
pub mod handlers;

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ListenerSettings;
use crate::error::AppError;
use crate::metrics::{Metrics, MESSAGES_PROCESSED, PROCESSING_DISABLED};
use crate::ports::{FeatureFlags, MessageQueue, QueueError, QueueMessage};
use crate::services::Shutdown;
use crate::utils::sanitize::sanitize_body;

pub use dlq::DeadLetters;
pub use handlers::{
    IncomingPaymentHandler, PaymentUpdateHandler, SubmitPaymentHandler, UncheckedPaymentHandler,
};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unparseable message body: {0}")]
    Parse(#[from] serde_json::Error),

    /// The message is left on the queue for redelivery.
    #[error("processing stopped on shutdown: {0}")]
    Interrupted(#[source] AppError),

    #[error("processing failed: {0}")]
    Failed(#[source] AppError),
}

impl HandlerError {
    pub fn failed(err: impl Into<AppError>) -> Self {
        let err = err.into();
        if err.is_interrupted() {
            HandlerError::Interrupted(err)
        } else {
            HandlerError::Failed(err)
        }
    }
}

/// Processes one message body. Parse and processing errors send the message to the
/// dead-letter queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &str) -> Result<(), HandlerError>;
}

/// Process-wide failure counter that disables a feature flag once `threshold` processing
/// failures have been seen. The counter is never reset.
pub struct CircuitBreaker {
    threshold: u32,
    flag: String,
    failures: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, flag: impl Into<String>) -> Self {
        Self {
            threshold,
            flag: flag.into(),
            failures: AtomicU32::new(0),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Returns true when this failure opened the circuit.
    async fn record_failure(&self, flags: &dyn FeatureFlags, queue: &str) -> bool {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.threshold {
            return false;
        }

        match flags.disable(&self.flag).await {
            Ok(()) => {
                error!(
                    queue = %queue,
                    flag = %self.flag,
                    failures,
                    threshold = self.threshold,
                    "Failure threshold reached, processing disabled"
                );
                true
            }
            Err(e) => {
                error!(queue = %queue, flag = %self.flag, "Failed to disable feature flag: {}", e);
                false
            }
        }
    }
}

/// What happened to a message after a worker finished with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Processed,
    DeadLettered,
    /// Dead-lettering failed; the message stays on the source queue and is redelivered
    /// once its visibility timeout lapses.
    Returned,
}

pub struct QueueListener {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn MessageHandler>,
    flags: Arc<dyn FeatureFlags>,
    metrics: Arc<dyn Metrics>,
    settings: ListenerSettings,
    dead_letters: DeadLetters,
    circuit: Option<CircuitBreaker>,
    shutdown: Shutdown,
}

impl QueueListener {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn MessageHandler>,
        flags: Arc<dyn FeatureFlags>,
        metrics: Arc<dyn Metrics>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            flags,
            metrics,
            settings,
            dead_letters: DeadLetters::none(),
            circuit: None,
            shutdown: Shutdown::new(),
        }
    }

    /// Shares a stop signal with other listeners and use cases, so one
    /// [`stop_listening`](Self::stop_listening) stops them all.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_dead_letters(mut self, dead_letters: DeadLetters) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit: CircuitBreaker) -> Self {
        self.circuit = Some(circuit);
        self
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn circuit(&self) -> Option<&CircuitBreaker> {
        self.circuit.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    /// Cuts short any receive or sleep in progress. Workers finish the message they hold
    /// and drain whatever is already queued for them without pausing between messages.
    pub fn stop_listening(&self) {
        self.shutdown.trigger();
    }

    /// Runs until [`stop_listening`](Self::stop_listening) is called.
    pub async fn run(self: Arc<Self>) {
        let workers = self.settings.workers.max(1);
        let (jobs, receiver) = mpsc::channel::<QueueMessage>(workers);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles: Vec<_> = (0..workers)
            .map(|worker| tokio::spawn(self.clone().work(worker, receiver.clone())))
            .collect();

        info!(queue = %self.name(), workers, "Listener started");
        self.poll(jobs).await;

        for handle in handles {
            if let Err(e) = handle.await {
                error!(queue = %self.name(), "Listener worker panicked: {}", e);
            }
        }
        info!(queue = %self.name(), "Listener stopped");
    }

    async fn poll(&self, jobs: mpsc::Sender<QueueMessage>) {
        let queue = self.name().to_string();

        while self.is_listening() {
            if !self.flags.is_enabled(&self.settings.feature_flag).await {
                self.metrics.increment(PROCESSING_DISABLED, &[("queue", queue.as_str())]);
                debug!(queue = %queue, flag = %self.settings.feature_flag, "Processing disabled");
                self.pause(self.settings.disabled_sleep).await;
                continue;
            }

            let received = tokio::select! {
                received = self
                    .queue
                    .receive(self.settings.receive_batch_size, self.settings.wait_time) => received,
                _ = self.shutdown.triggered() => break,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    error!(queue = %queue, "Failed to receive messages: {}", e);
                    self.pause(self.settings.receive_error_sleep).await;
                    continue;
                }
            };

            for message in messages {
                if jobs.send(message).await.is_err() {
                    warn!(queue = %queue, "All listener workers are gone");
                    return;
                }
            }
        }
    }

    async fn work(self: Arc<Self>, worker: usize, jobs: Arc<Mutex<mpsc::Receiver<QueueMessage>>>) {
        loop {
            let message = jobs.lock().await.recv().await;
            let Some(message) = message else {
                debug!(queue = %self.name(), worker, "Worker exiting");
                return;
            };

            self.process_message(message).await;

            if !self.settings.delay_between_messages.is_zero() {
                self.shutdown.sleep(self.settings.delay_between_messages).await;
            }
        }
    }

    /// Handles one received message and settles it on the source queue.
    pub async fn process_message(&self, message: QueueMessage) -> MessageOutcome {
        let queue = self.name().to_string();

        let err = match self.handler.handle(&message.body).await {
            Ok(()) => {
                self.metrics.increment(MESSAGES_PROCESSED, &[("queue", queue.as_str())]);
                self.delete_with_retry(&message).await;
                return MessageOutcome::Processed;
            }
            Err(err) => err,
        };

        match &err {
            HandlerError::Parse(_) => {
                error!(queue = %queue, message_id = %message.id, body = %sanitize_body(&message.body), "{}", err);
            }
            HandlerError::Interrupted(source) => {
                info!(
                    queue = %queue,
                    message_id = %message.id,
                    kind = source.kind(),
                    "Left message for redelivery: {}",
                    err
                );
                return MessageOutcome::Returned;
            }
            HandlerError::Failed(source) => {
                error!(
                    queue = %queue,
                    message_id = %message.id,
                    kind = source.kind(),
                    retryable = source.is_retryable(),
                    "{}",
                    err
                );
                if let Some(circuit) = &self.circuit {
                    circuit.record_failure(self.flags.as_ref(), &queue).await;
                }
            }
        }

        if self
            .dead_letters
            .park(&queue, &message.body, self.metrics.as_ref())
            .await
            .is_err()
        {
            return MessageOutcome::Returned;
        }
        self.delete_with_retry(&message).await;
        MessageOutcome::DeadLettered
    }

    /// Retries only while the queue reports the failure as retryable. After shutdown the
    /// remaining retries run without pausing.
    async fn delete_with_retry(&self, message: &QueueMessage) -> bool {
        let backoff = ConstantBuilder::default()
            .with_delay(self.settings.delete_retry_sleep)
            .with_max_times(self.settings.delete_retries as usize);
        let (queue, receipt_handle) = (&self.queue, message.receipt_handle.as_str());
        let sleeper = self.shutdown.clone();

        let deleted = (|| async move { queue.delete(receipt_handle).await })
            .retry(backoff)
            .sleep(move |delay| {
                let shutdown = sleeper.clone();
                async move {
                    shutdown.sleep(delay).await;
                }
            })
            .when(|e: &QueueError| e.is_retryable())
            .notify(|e, delay| {
                warn!(
                    queue = %self.name(),
                    message_id = %message.id,
                    "Delete failed, retrying in {:?}: {}",
                    delay,
                    e
                );
            })
            .await;

        match deleted {
            Ok(()) => true,
            Err(e) => {
                error!(
                    queue = %self.name(),
                    message_id = %message.id,
                    retryable = e.is_retryable(),
                    "Giving up on deleting message, it may be redelivered: {}",
                    e
                );
                false
            }
        }
    }

    async fn pause(&self, duration: Duration) {
        self.shutdown.sleep(duration).await;
    }
}
