//! Make-payment use case.
//! Accepts an incoming instruction, persists the aggregate and hands it to its provider.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    DomainFailure, FailureCode, IncomingInstruction, PaymentInstruction, TransitionError,
};
use crate::metrics::{Metrics, INCORRECT_ACCOUNT_NUMBER, PAYMENTS_AMOUNT, PAYMENTS_COUNT};
use crate::ports::{NotifierError, PaymentStore, RequestSender, StoreError};
use crate::validation::{validate_instruction, ValidationErrors};

#[derive(Debug, Error)]
pub enum MakePaymentError {
    #[error("payment instruction {payment_id} rejected: {errors}")]
    Validation {
        payment_id: Uuid,
        errors: ValidationErrors,
    },

    #[error("duplicated payment instruction {business_id}, recorded as {payment_id}")]
    Duplicate { business_id: String, payment_id: Uuid },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to hand payment {payment_id} to its provider: {source}")]
    Send {
        payment_id: Uuid,
        #[source]
        source: NotifierError,
    },
}

pub struct MakePayment {
    store: Arc<dyn PaymentStore>,
    request_sender: Arc<dyn RequestSender>,
    metrics: Arc<dyn Metrics>,
}

impl MakePayment {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        request_sender: Arc<dyn RequestSender>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            store,
            request_sender,
            metrics,
        }
    }

    /// Returns the id of the submitted aggregate.
    pub async fn execute(&self, incoming: IncomingInstruction) -> Result<Uuid, MakePaymentError> {
        let raw_account_number = incoming.merchant.account.account_number.clone();
        let mut payment = PaymentInstruction::create(incoming.clone());

        if payment.incoming_instruction().merchant.account.account_number != raw_account_number {
            self.metrics.increment(INCORRECT_ACCOUNT_NUMBER, &[]);
            info!(payment_id = %payment.id(), "Merchant account number normalized");
        }

        if let Err(errors) = validate_instruction(payment.incoming_instruction()) {
            warn!(
                payment_id = %payment.id(),
                correlation_id = %incoming.correlation_id,
                "Payment instruction failed validation: {}",
                errors
            );
            payment.reject(DomainFailure::new(FailureCode::FailedValidation, errors.to_string()))?;
            self.store.store(&payment).await?;
            return Err(MakePaymentError::Validation {
                payment_id: payment.id(),
                errors,
            });
        }

        payment.apply_currency_rules()?;
        let provider = payment.route_to_payment_provider()?;
        payment.submit_for_processing()?;

        match self.store.store(&payment).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(business_id)) => {
                let payment_id = self.record_duplicate(incoming).await?;
                warn!(%business_id, %payment_id, "Duplicated payment instruction recorded as failed");
                return Err(MakePaymentError::Duplicate {
                    business_id,
                    payment_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.request_sender
            .send_payment_request(&payment)
            .await
            .map_err(|source| MakePaymentError::Send {
                payment_id: payment.id(),
                source,
            })?;

        let currency = payment.incoming_instruction().currency_code();
        let tags = [("provider", provider.as_str()), ("currency", currency)];
        self.metrics.increment(PAYMENTS_COUNT, &tags);
        if let Ok(amount) = payment.incoming_instruction().payment.amount.parse::<f64>() {
            self.metrics.record_amount(PAYMENTS_AMOUNT, amount, &tags);
        }

        info!(
            payment_id = %payment.id(),
            provider = %provider,
            business_id = %payment.business_id(),
            "Payment submitted for processing"
        );
        Ok(payment.id())
    }

    /// Persists a fresh aggregate for a re-delivered instruction, failed as a duplicate.
    async fn record_duplicate(&self, incoming: IncomingInstruction) -> Result<Uuid, MakePaymentError> {
        let mut duplicate = PaymentInstruction::create(incoming);
        duplicate.apply_currency_rules()?;
        duplicate.route_to_payment_provider()?;
        duplicate.submit_for_processing()?;
        duplicate.fail(DomainFailure::duplicate(), None)?;
        self.store.store(&duplicate).await?;
        Ok(duplicate.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::in_memory::{InMemoryPaymentStore, InMemoryQueue};
    use crate::adapters::queue_notifier::QueueRequestSender;
    use crate::domain::{EventType, PaymentStatus};
    use crate::metrics::RecordingMetrics;
    use chrono::NaiveDate;

    struct Fixture {
        store: Arc<InMemoryPaymentStore>,
        banking_circle: Arc<InMemoryQueue>,
        islandsbanki: Arc<InMemoryQueue>,
        metrics: Arc<RecordingMetrics>,
        use_case: MakePayment,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryPaymentStore::new());
        let banking_circle = Arc::new(InMemoryQueue::new("banking-circle"));
        let islandsbanki = Arc::new(InMemoryQueue::new("islandsbanki"));
        let metrics = Arc::new(RecordingMetrics::new());
        let use_case = MakePayment::new(
            store.clone(),
            Arc::new(QueueRequestSender::new(banking_circle.clone(), islandsbanki.clone())),
            metrics.clone(),
        );
        Fixture {
            store,
            banking_circle,
            islandsbanki,
            metrics,
            use_case,
        }
    }

    fn incoming(amount: &str, currency: &str) -> IncomingInstruction {
        let mut incoming = IncomingInstruction::default();
        incoming.correlation_id = "corr-1".to_string();
        incoming.merchant.contract_number = "9876862".to_string();
        incoming.merchant.name = "Catarina & Riya".to_string();
        incoming.merchant.account.account_number = "GB33BUKB20201555555555".to_string();
        incoming.metadata.source = "Solanteq".to_string();
        incoming.payment.amount = amount.to_string();
        incoming.payment.currency.iso_code = currency.to_string();
        incoming.payment.currency.iso_number = "978".to_string();
        incoming.payment.execution_date = NaiveDate::from_ymd_opt(2021, 5, 25);
        incoming
    }

    #[tokio::test]
    async fn submits_valid_instruction() {
        let f = fixture();
        let id = f.use_case.execute(incoming("1234.56", "EUR")).await.unwrap();

        let stored = f.store.get(id).await.unwrap();
        assert_eq!(stored.status(), PaymentStatus::SubmittedForProcessing);
        assert_eq!(f.banking_circle.sent().len(), 1);
        assert!(f.islandsbanki.sent().is_empty());
        assert_eq!(
            f.metrics.counter(PAYMENTS_COUNT, &[("provider", "bankingCircle"), ("currency", "EUR")]),
            1
        );
        assert_eq!(f.metrics.amounts(PAYMENTS_AMOUNT), vec![1234.56]);
    }

    #[tokio::test]
    async fn counts_normalized_account_numbers() {
        let f = fixture();
        let mut raw = incoming("10", "EUR");
        raw.merchant.account.account_number = "gb 33BUKb2020 1555 555555".to_string();
        let id = f.use_case.execute(raw).await.unwrap();

        assert_eq!(f.metrics.counter(INCORRECT_ACCOUNT_NUMBER, &[]), 1);
        let stored = f.store.get(id).await.unwrap();
        assert_eq!(
            stored.incoming_instruction().merchant.account.account_number,
            "GB33BUKB20201555555555"
        );
    }

    #[tokio::test]
    async fn rejects_invalid_instruction_without_sending() {
        let f = fixture();
        let mut invalid = incoming("10", "EUR");
        invalid.merchant.account.account_number = String::new();

        let err = f.use_case.execute(invalid).await.unwrap_err();
        let MakePaymentError::Validation { payment_id, errors } = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(errors.to_string().contains("AccountNumber should not be empty"));

        let stored = f.store.get(payment_id).await.unwrap();
        assert_eq!(stored.status(), PaymentStatus::Rejected);
        let failure = stored.last_event().and_then(|e| e.failure()).unwrap();
        assert_eq!(failure.code, FailureCode::FailedValidation);
        assert!(f.banking_circle.sent().is_empty());
    }

    #[tokio::test]
    async fn records_duplicates_as_failed() {
        let f = fixture();
        f.use_case.execute(incoming("10", "EUR")).await.unwrap();
        let err = f.use_case.execute(incoming("10", "EUR")).await.unwrap_err();

        let MakePaymentError::Duplicate { payment_id, business_id } = err else {
            panic!("expected duplicate error, got {err:?}");
        };
        assert_eq!(business_id, "9876862#2021-05-25#10");

        let duplicate = f.store.get(payment_id).await.unwrap();
        assert_eq!(duplicate.status(), PaymentStatus::Failed);
        assert_eq!(duplicate.last_event().unwrap().event_type(), EventType::ProcessingFailed);
        assert!(duplicate.last_event().and_then(|e| e.failure()).unwrap().is_duplicate());
        assert_eq!(f.banking_circle.sent().len(), 1);
        assert_eq!(f.store.len().await, 2);
    }

    #[tokio::test]
    async fn rounds_huf_amounts_up() {
        let f = fixture();
        let id = f.use_case.execute(incoming("1704.51", "HUF")).await.unwrap();

        let stored = f.store.get(id).await.unwrap();
        assert_eq!(stored.incoming_instruction().payment.amount, "1705");
    }

    #[tokio::test]
    async fn routes_icelandic_payments_to_islandsbanki() {
        let f = fixture();
        let mut isk = incoming("5000", "ISK");
        isk.payment.currency.iso_number = "352".to_string();
        f.use_case.execute(isk).await.unwrap();

        assert_eq!(f.islandsbanki.sent().len(), 1);
        assert!(f.banking_circle.sent().is_empty());
    }
}
