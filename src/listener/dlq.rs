//! Dead-letter policy shared by all listeners.

use std::sync::Arc;
use tracing::{error, warn};

use crate::metrics::{Metrics, MESSAGES_DEAD_LETTERED};
use crate::ports::{MessageQueue, QueueError};
use crate::utils::sanitize::sanitize_body;

/// Where poison messages go. Without a dead-letter queue the message is only dropped
/// from its source queue.
#[derive(Clone, Default)]
pub struct DeadLetters {
    queue: Option<Arc<dyn MessageQueue>>,
}

impl DeadLetters {
    pub fn new(queue: Option<Arc<dyn MessageQueue>>) -> Self {
        Self { queue }
    }

    pub fn to(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue: Some(queue) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.queue.is_some()
    }

    /// Copies `body` to the dead-letter queue. The caller deletes the source message
    /// only when this succeeds.
    pub async fn park(&self, source: &str, body: &str, metrics: &dyn Metrics) -> Result<(), QueueError> {
        let Some(queue) = &self.queue else {
            warn!(queue = %source, body = %sanitize_body(body), "No dead-letter queue configured, dropping message");
            return Ok(());
        };

        queue.send(body).await.map_err(|e| {
            error!(queue = %source, dlq = %queue.name(), "Failed to dead-letter message: {}", e);
            e
        })?;
        metrics.increment(MESSAGES_DEAD_LETTERED, &[("queue", source)]);
        warn!(queue = %source, dlq = %queue.name(), body = %sanitize_body(body), "Message dead-lettered");
        Ok(())
    }
}
