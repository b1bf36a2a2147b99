//! Queue-backed implementations of the notifier and request-sender ports.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{PaymentInstruction, PaymentProvider, ProviderEvent, ProviderEventType};
use crate::ports::{MessageQueue, NotifierError, PaymentStatusNotifier, RequestSender};

/// SUBMITTED events go to the unchecked queue for status polling; terminal events go to
/// the payment-updates queue.
pub struct QueueStatusNotifier {
    unchecked: Arc<dyn MessageQueue>,
    updates: Arc<dyn MessageQueue>,
}

impl QueueStatusNotifier {
    pub fn new(unchecked: Arc<dyn MessageQueue>, updates: Arc<dyn MessageQueue>) -> Self {
        Self { unchecked, updates }
    }
}

#[async_trait]
impl PaymentStatusNotifier for QueueStatusNotifier {
    async fn send_payment_status(&self, event: &ProviderEvent) -> Result<(), NotifierError> {
        let body = serde_json::to_string(event)?;
        let queue = match event.event_type {
            ProviderEventType::Submitted => &self.unchecked,
            ProviderEventType::Processed | ProviderEventType::Failure => &self.updates,
        };

        queue.send(&body).await?;
        debug!(
            payment_id = %event.payment_id(),
            event_type = ?event.event_type,
            queue = queue.name(),
            "Provider event published"
        );
        Ok(())
    }
}

/// Forwards every event unchanged to a single queue.
pub struct QueuePublisher {
    queue: Arc<dyn MessageQueue>,
}

impl QueuePublisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl PaymentStatusNotifier for QueuePublisher {
    async fn send_payment_status(&self, event: &ProviderEvent) -> Result<(), NotifierError> {
        let body = serde_json::to_string(event)?;
        self.queue.send(&body).await?;
        Ok(())
    }
}

pub struct QueueRequestSender {
    banking_circle: Arc<dyn MessageQueue>,
    islandsbanki: Arc<dyn MessageQueue>,
}

impl QueueRequestSender {
    pub fn new(banking_circle: Arc<dyn MessageQueue>, islandsbanki: Arc<dyn MessageQueue>) -> Self {
        Self {
            banking_circle,
            islandsbanki,
        }
    }
}

#[async_trait]
impl RequestSender for QueueRequestSender {
    async fn send_payment_request(&self, payment: &PaymentInstruction) -> Result<(), NotifierError> {
        let queue = match payment.payment_provider() {
            PaymentProvider::BankingCircle => &self.banking_circle,
            PaymentProvider::Islandsbanki => &self.islandsbanki,
            PaymentProvider::Unset => {
                return Err(NotifierError::NoDestination(
                    PaymentProvider::Unset.as_str().to_string(),
                ))
            }
        };

        let body = serde_json::to_string(payment)?;
        queue.send(&body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::in_memory::InMemoryQueue;
    use crate::domain::{FailureReason, IncomingInstruction, ProviderFailureCode};

    fn routed(sender: &str) -> PaymentInstruction {
        let mut incoming = IncomingInstruction::default();
        incoming.merchant.contract_number = "9876862".to_string();
        incoming.metadata.sender = sender.to_string();
        let mut payment = PaymentInstruction::create(incoming);
        payment.route_to_payment_provider().unwrap();
        payment.submit_for_processing().unwrap();
        payment
    }

    #[tokio::test]
    async fn splits_events_by_type() {
        let unchecked = Arc::new(InMemoryQueue::new("unchecked"));
        let updates = Arc::new(InMemoryQueue::new("updates"));
        let notifier = QueueStatusNotifier::new(unchecked.clone(), updates.clone());

        let submitted = ProviderEvent::submitted(routed(""), "bc-1", "ref").unwrap();
        let failed = ProviderEvent::failed(
            routed(""),
            "",
            "",
            FailureReason::new(ProviderFailureCode::NoSourceAccount, "no source account"),
        )
        .unwrap();

        notifier.send_payment_status(&submitted).await.unwrap();
        notifier.send_payment_status(&failed).await.unwrap();

        assert_eq!(unchecked.sent().len(), 1);
        assert_eq!(updates.sent().len(), 1);

        let parsed: ProviderEvent = serde_json::from_str(&unchecked.sent()[0]).unwrap();
        assert_eq!(parsed, submitted);
    }

    #[tokio::test]
    async fn requests_follow_the_provider() {
        let banking_circle = Arc::new(InMemoryQueue::new("bc"));
        let islandsbanki = Arc::new(InMemoryQueue::new("isb"));
        let sender = QueueRequestSender::new(banking_circle.clone(), islandsbanki.clone());

        sender.send_payment_request(&routed("SAXO-1")).await.unwrap();
        sender.send_payment_request(&routed("ISB-7")).await.unwrap();

        assert_eq!(banking_circle.sent().len(), 1);
        assert_eq!(islandsbanki.sent().len(), 1);

        let unrouted = PaymentInstruction::create(IncomingInstruction::default());
        assert!(matches!(
            sender.send_payment_request(&unrouted).await,
            Err(NotifierError::NoDestination(_))
        ));
    }
}
