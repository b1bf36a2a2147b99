//! Check-status use case.
//! Polls the provider for a submitted payment until it leaves PendingProcessing, then
//! publishes the terminal provider event.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{
    FailureReason, PaymentInstruction, ProviderEvent, ProviderEventError, ProviderEventType,
    ProviderFailureCode,
};
use crate::metrics::{Metrics, MISSING_FUNDING, PAYMENT_PROCESSING_DURATION};
use crate::ports::{NotifierError, PaymentStatusNotifier};
use crate::provider::{PaymentProviderApi, ProviderError, ProviderStatus};
use crate::services::Shutdown;

#[derive(Debug, Error)]
pub enum CheckStatusError {
    #[error("status check needs a provider payment id")]
    MissingProviderPaymentId,

    #[error("expected a SUBMITTED event, got {0:?}")]
    NotSubmitted(ProviderEventType),

    #[error("transport error checking provider payment {provider_payment_id}: {source}")]
    Transport {
        provider_payment_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("status check for provider payment {provider_payment_id} failed: {source}")]
    Provider {
        provider_payment_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider payment {0} is still pending")]
    StillPending(String),

    #[error("status check for provider payment {0} stopped on shutdown")]
    Interrupted(String),

    #[error(transparent)]
    Event(#[from] ProviderEventError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

/// A submitted payment awaiting its terminal provider status.
#[derive(Debug, Clone)]
pub struct StatusCheck {
    pub payment: PaymentInstruction,
    pub provider_payment_id: String,
    pub banking_reference: String,
    pub started_at: DateTime<Utc>,
}

impl TryFrom<ProviderEvent> for StatusCheck {
    type Error = CheckStatusError;

    fn try_from(event: ProviderEvent) -> Result<Self, Self::Error> {
        if event.event_type != ProviderEventType::Submitted {
            return Err(CheckStatusError::NotSubmitted(event.event_type));
        }
        event.validate()?;

        Ok(Self {
            started_at: event.created_on,
            payment: event.instruction,
            provider_payment_id: event.provider_payment_id,
            banking_reference: event.banking_reference,
        })
    }
}

fn failure_code_for(status: &ProviderStatus) -> ProviderFailureCode {
    match status {
        ProviderStatus::PendingProcessing => ProviderFailureCode::StuckInPending,
        ProviderStatus::Rejected => ProviderFailureCode::RejectedCode,
        ProviderStatus::MissingFunding => ProviderFailureCode::MissingFunding,
        _ => ProviderFailureCode::UnhandledPaymentProviderStatus,
    }
}

pub struct CheckStatus {
    provider: Arc<dyn PaymentProviderApi>,
    notifier: Arc<dyn PaymentStatusNotifier>,
    metrics: Arc<dyn Metrics>,
    max_iterations: u32,
    delay: Duration,
    shutdown: Shutdown,
}

impl CheckStatus {
    pub fn new(
        provider: Arc<dyn PaymentProviderApi>,
        notifier: Arc<dyn PaymentStatusNotifier>,
        metrics: Arc<dyn Metrics>,
        max_iterations: u32,
        delay: Duration,
    ) -> Self {
        Self {
            provider,
            notifier,
            metrics,
            max_iterations: max_iterations.max(1),
            delay,
            shutdown: Shutdown::new(),
        }
    }

    /// Polling stops between iterations once the signal fires and nothing is published.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Returns the terminal status that was published.
    pub async fn execute(&self, check: StatusCheck) -> Result<ProviderStatus, CheckStatusError> {
        if check.provider_payment_id.is_empty() {
            return Err(CheckStatusError::MissingProviderPaymentId);
        }

        let status = self.poll(&check).await?;
        let currency = check.payment.incoming_instruction().currency_code().to_string();
        let status_tag = status.to_string();
        let elapsed = (Utc::now() - check.started_at).to_std().unwrap_or_default();
        self.metrics.record_duration(
            PAYMENT_PROCESSING_DURATION,
            elapsed,
            &[("currency", currency.as_str()), ("status", status_tag.as_str())],
        );

        let payment_id = check.payment.id();
        let provider_payment_id = check.provider_payment_id.clone();
        let event = if status == ProviderStatus::Processed {
            ProviderEvent::processed(check.payment, check.provider_payment_id, check.banking_reference)?
        } else {
            let reason = FailureReason::new(
                failure_code_for(&status),
                format!("payment {provider_payment_id} ended with provider status {status}"),
            );
            ProviderEvent::failed(
                check.payment,
                check.provider_payment_id,
                check.banking_reference,
                reason,
            )?
        };
        self.notifier.send_payment_status(&event).await?;

        info!(
            %payment_id,
            %provider_payment_id,
            provider_status = %status,
            event_type = ?event.event_type,
            "Payment status check finished"
        );

        if status == ProviderStatus::PendingProcessing {
            return Err(CheckStatusError::StillPending(provider_payment_id));
        }
        Ok(status)
    }

    /// Polls until the status leaves PendingProcessing or the iterations run out. Errors
    /// are tolerated on every iteration but the last.
    async fn poll(&self, check: &StatusCheck) -> Result<ProviderStatus, CheckStatusError> {
        let currency = check.payment.incoming_instruction().currency_code();
        let mut status = ProviderStatus::PendingProcessing;

        for iteration in 1..=self.max_iterations {
            match self.provider.check_payment_status(&check.provider_payment_id).await {
                Ok(polled) => {
                    if polled == ProviderStatus::MissingFunding {
                        self.metrics.increment(MISSING_FUNDING, &[("currency", currency)]);
                    }
                    if polled != ProviderStatus::PendingProcessing {
                        return Ok(polled);
                    }
                    status = polled;
                }
                Err(source) if iteration == self.max_iterations => {
                    let provider_payment_id = check.provider_payment_id.clone();
                    return Err(if source.is_transport() {
                        CheckStatusError::Transport {
                            provider_payment_id,
                            source,
                        }
                    } else {
                        CheckStatusError::Provider {
                            provider_payment_id,
                            source,
                        }
                    });
                }
                Err(e) => {
                    warn!(
                        provider_payment_id = %check.provider_payment_id,
                        iteration,
                        "Status check failed, will retry: {}",
                        e
                    );
                }
            }

            if iteration < self.max_iterations && !self.shutdown.sleep(self.delay).await {
                return Err(CheckStatusError::Interrupted(check.provider_payment_id.clone()));
            }
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::in_memory::InMemoryQueue;
    use crate::adapters::queue_notifier::QueueStatusNotifier;
    use crate::domain::IncomingInstruction;
    use crate::metrics::RecordingMetrics;
    use crate::provider::{BankingCircleClient, StaticToken};

    struct Fixture {
        updates: Arc<InMemoryQueue>,
        metrics: Arc<RecordingMetrics>,
        use_case: CheckStatus,
    }

    fn fixture(base_url: String, max_iterations: u32) -> Fixture {
        fixture_with_delay(base_url, max_iterations, Duration::ZERO)
    }

    fn fixture_with_delay(base_url: String, max_iterations: u32, delay: Duration) -> Fixture {
        let unchecked = Arc::new(InMemoryQueue::new("unchecked"));
        let updates = Arc::new(InMemoryQueue::new("updates"));
        let metrics = Arc::new(RecordingMetrics::new());
        let client = BankingCircleClient::new(
            reqwest::Client::new(),
            base_url,
            Arc::new(StaticToken("token".to_string())),
            metrics.clone(),
        );
        let use_case = CheckStatus::new(
            Arc::new(client),
            Arc::new(QueueStatusNotifier::new(unchecked, updates.clone())),
            metrics.clone(),
            max_iterations,
            delay,
        );
        Fixture {
            updates,
            metrics,
            use_case,
        }
    }

    fn check() -> StatusCheck {
        let mut incoming = IncomingInstruction::default();
        incoming.merchant.contract_number = "9876862".to_string();
        incoming.payment.currency.iso_code = "EUR".to_string();
        let mut payment = PaymentInstruction::create(incoming);
        payment.route_to_payment_provider().unwrap();
        payment.submit_for_processing().unwrap();
        StatusCheck {
            payment,
            provider_payment_id: "bc-1".to_string(),
            banking_reference: "Settlm 9876862 20210525".to_string(),
            started_at: Utc::now(),
        }
    }

    async fn respond_with(server: &mut mockito::Server, status: &str) -> mockito::Mock {
        server
            .mock("GET", "/payments/singles/bc-1/status")
            .with_status(200)
            .with_body(format!(r#"{{"status": "{status}"}}"#))
            .create_async()
            .await
    }

    fn published(queue: &InMemoryQueue) -> Vec<ProviderEvent> {
        queue
            .sent()
            .iter()
            .map(|body| serde_json::from_str(body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn processed_publishes_processed_event() {
        let mut server = mockito::Server::new_async().await;
        let _mock = respond_with(&mut server, "Processed").await;

        let f = fixture(server.url(), 10);
        let status = f.use_case.execute(check()).await.unwrap();

        assert_eq!(status, ProviderStatus::Processed);
        let events = published(&f.updates);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ProviderEventType::Processed);
        assert_eq!(events[0].banking_reference, "Settlm 9876862 20210525");
        assert_eq!(f.metrics.durations(PAYMENT_PROCESSING_DURATION), 1);
    }

    #[tokio::test]
    async fn stuck_payment_fails_and_reports_still_pending() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/payments/singles/bc-1/status")
            .with_status(200)
            .with_body(r#"{"status": "PendingProcessing"}"#)
            .expect(3)
            .create_async()
            .await;

        let f = fixture(server.url(), 3);
        let err = f.use_case.execute(check()).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, CheckStatusError::StillPending(ref id) if id == "bc-1"));
        let events = published(&f.updates);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].failure_reason.as_ref().unwrap().code,
            ProviderFailureCode::StuckInPending
        );
    }

    #[tokio::test]
    async fn missing_funding_is_counted_and_failed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = respond_with(&mut server, "MissingFunding").await;

        let f = fixture(server.url(), 10);
        f.use_case.execute(check()).await.unwrap();

        assert_eq!(f.metrics.counter(MISSING_FUNDING, &[("currency", "EUR")]), 1);
        let events = published(&f.updates);
        assert_eq!(
            events[0].failure_reason.as_ref().unwrap().code,
            ProviderFailureCode::MissingFunding
        );
    }

    #[tokio::test]
    async fn unknown_status_is_unhandled() {
        let mut server = mockito::Server::new_async().await;
        let _mock = respond_with(&mut server, "ScaExpired").await;

        let f = fixture(server.url(), 10);
        let status = f.use_case.execute(check()).await.unwrap();

        assert_eq!(status, ProviderStatus::Other("ScaExpired".to_string()));
        let events = published(&f.updates);
        assert_eq!(
            events[0].failure_reason.as_ref().unwrap().code,
            ProviderFailureCode::UnhandledPaymentProviderStatus
        );
    }

    #[tokio::test]
    async fn persistent_transport_error_surfaces_without_event() {
        let f = fixture("http://127.0.0.1:9".to_string(), 2);
        let err = f.use_case.execute(check()).await.unwrap_err();

        assert!(matches!(err, CheckStatusError::Transport { .. }));
        assert!(f.updates.sent().is_empty());
    }

    #[tokio::test]
    async fn transient_error_then_processed_publishes_once() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/payments/singles/bc-1/status")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let processed = server
            .mock("GET", "/payments/singles/bc-1/status")
            .with_status(200)
            .with_body(r#"{"status": "Processed"}"#)
            .expect(1)
            .create_async()
            .await;

        let f = fixture(server.url(), 3);
        let status = f.use_case.execute(check()).await.unwrap();

        failing.assert_async().await;
        processed.assert_async().await;
        assert_eq!(status, ProviderStatus::Processed);
        let events = published(&f.updates);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ProviderEventType::Processed);
        assert!(events[0].failure_reason.is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_polling_without_publishing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = respond_with(&mut server, "PendingProcessing").await;

        let shutdown = Shutdown::new();
        let mut f = fixture_with_delay(server.url(), 10, Duration::from_secs(3600));
        f.use_case = f.use_case.with_shutdown(shutdown.clone());

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger();
        };
        let (result, ()) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(f.use_case.execute(check()), stop) },
        )
        .await
        .expect("polling delay ignored shutdown");

        assert!(matches!(result, Err(CheckStatusError::Interrupted(ref id)) if id == "bc-1"));
        assert!(f.updates.sent().is_empty());
    }

    #[test]
    fn only_submitted_events_start_a_check() {
        let failed = ProviderEvent::failed(
            check().payment,
            "",
            "",
            FailureReason::new(ProviderFailureCode::TransportFailure, "timeout"),
        )
        .unwrap();
        assert!(matches!(
            StatusCheck::try_from(failed),
            Err(CheckStatusError::NotSubmitted(ProviderEventType::Failure))
        ));

        let submitted = ProviderEvent::submitted(check().payment, "bc-9", "ref").unwrap();
        let started = StatusCheck::try_from(submitted).unwrap();
        assert_eq!(started.provider_payment_id, "bc-9");
    }
}
