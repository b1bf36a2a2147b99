//! Collaborator traits the use cases depend on. Implementations live in `adapters`
//! and `services`; tests use the in-memory adapters.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Event, PaymentInstruction, PaymentStatus, ProviderEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payment with business id {0} already exists")]
    Duplicate(String),

    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("payment {0} is already in a terminal state")]
    AlreadyTerminal(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt payment record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable persistence of payment aggregates.
///
/// Writes are durable before returning. Concurrent writes to the same id are serialized
/// by the store; no ordering holds across ids.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts the aggregate. Fails with [`StoreError::Duplicate`] when another accepted
    /// aggregate already carries the same business id.
    async fn store(&self, payment: &PaymentInstruction) -> StoreResult<()>;

    /// Appends `event` and sets `status` atomically, bumping the version.
    async fn update_payment(&self, id: Uuid, status: PaymentStatus, event: &Event) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<PaymentInstruction>;

    async fn get_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Vec<PaymentInstruction>>;
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// Server-side or connectivity failure; the call may succeed if repeated.
    #[error("transient queue error on {queue}: {message}")]
    Transient { queue: String, message: String },

    #[error("queue error on {queue}: {message}")]
    Permanent { queue: String, message: String },
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Transient { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Long-polls for up to `max_messages`, waiting at most `wait` when the queue is empty.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError>;

    async fn send(&self, body: &str) -> Result<(), QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("no destination configured for payment provider {0}")]
    NoDestination(String),
}

/// Publishes provider events downstream. Delivery is at-least-once; consumers dedupe on
/// [`ProviderEvent::dedup_key`].
#[async_trait]
pub trait PaymentStatusNotifier: Send + Sync {
    async fn send_payment_status(&self, event: &ProviderEvent) -> Result<(), NotifierError>;
}

/// Hands a routed instruction to its payment provider's request channel.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send_payment_request(&self, payment: &PaymentInstruction) -> Result<(), NotifierError>;
}

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("feature flag not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Global kill switches. Implementations must tolerate concurrent reads from many workers.
#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn is_enabled(&self, flag: &str) -> bool;

    async fn disable(&self, flag: &str) -> Result<(), FlagError>;
}

/// Runs a task once after a delay. Production uses tokio timers; tests drive it by hand.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, after: Duration, task: BoxFuture<'static, ()>);
}
