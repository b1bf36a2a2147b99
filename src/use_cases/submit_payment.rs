//! Submit-payment use case.
//! Sends a routed Banking Circle instruction to the provider and publishes the outcome.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::source_accounts::SourceAccounts;
use crate::domain::{
    FailureReason, PaymentInstruction, PaymentProvider, ProviderEvent, ProviderEventError,
    ProviderFailureCode,
};
use crate::ports::{NotifierError, PaymentStatusNotifier};
use crate::provider::{PaymentProviderApi, PaymentRequest, ProviderError};

#[derive(Debug, Error)]
pub enum SubmitPaymentError {
    #[error("payment {payment_id} is routed to {provider}, not Banking Circle")]
    WrongProvider {
        payment_id: Uuid,
        provider: PaymentProvider,
    },

    #[error("no source account for currency {currency} (high risk: {high_risk})")]
    NoSourceAccount { currency: String, high_risk: bool },

    #[error("payment request failed after attempts {correlation_ids:?}: {source}")]
    Provider {
        correlation_ids: Vec<String>,
        #[source]
        source: ProviderError,
    },

    #[error("payment request stopped on shutdown after attempts {correlation_ids:?}: {source}")]
    Interrupted {
        correlation_ids: Vec<String>,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Event(#[from] ProviderEventError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

fn failure_code_for(error: &ProviderError) -> ProviderFailureCode {
    match error {
        ProviderError::Transport { .. } => ProviderFailureCode::TransportFailure,
        ProviderError::InvalidPaymentRequest { .. } => ProviderFailureCode::RejectedCode,
        _ => ProviderFailureCode::UnhandledPaymentProviderStatus,
    }
}

pub struct SubmitPayment {
    provider: Arc<dyn PaymentProviderApi>,
    notifier: Arc<dyn PaymentStatusNotifier>,
    source_accounts: Arc<SourceAccounts>,
}

impl SubmitPayment {
    pub fn new(
        provider: Arc<dyn PaymentProviderApi>,
        notifier: Arc<dyn PaymentStatusNotifier>,
        source_accounts: Arc<SourceAccounts>,
    ) -> Self {
        Self {
            provider,
            notifier,
            source_accounts,
        }
    }

    /// Returns the provider payment id.
    pub async fn execute(&self, payment: PaymentInstruction) -> Result<String, SubmitPaymentError> {
        if payment.payment_provider() != PaymentProvider::BankingCircle {
            return Err(SubmitPaymentError::WrongProvider {
                payment_id: payment.id(),
                provider: payment.payment_provider(),
            });
        }

        let currency = payment.incoming_instruction().currency_code().to_string();
        let high_risk = payment.incoming_instruction().merchant.high_risk;

        let Some(source) = self.source_accounts.get(&currency, high_risk) else {
            let err = SubmitPaymentError::NoSourceAccount { currency, high_risk };
            error!(payment_id = %payment.id(), "{}", err);
            let event = ProviderEvent::failed(
                payment,
                "",
                "",
                FailureReason::new(ProviderFailureCode::NoSourceAccount, err.to_string()),
            )?;
            self.notifier.send_payment_status(&event).await?;
            return Err(err);
        };

        let request = PaymentRequest::for_instruction(&payment, source);
        let submission = self.provider.request_payment(&request).await;

        match submission.result {
            Ok(response) => {
                info!(
                    payment_id = %payment.id(),
                    provider_payment_id = %response.provider_payment_id,
                    provider_status = %response.status,
                    correlation_ids = ?submission.correlation_ids,
                    "Payment accepted by Banking Circle"
                );
                let provider_payment_id = response.provider_payment_id.clone();
                let event = ProviderEvent::submitted(
                    payment,
                    response.provider_payment_id,
                    response.banking_reference,
                )?;
                self.notifier.send_payment_status(&event).await?;
                Ok(provider_payment_id)
            }
            // No outcome is published; the instruction is redelivered and submitted again.
            Err(source) if source.is_interrupted() => {
                warn!(
                    payment_id = %payment.id(),
                    correlation_ids = ?submission.correlation_ids,
                    "Banking Circle payment request stopped on shutdown: {}",
                    source
                );
                Err(SubmitPaymentError::Interrupted {
                    correlation_ids: submission.correlation_ids,
                    source,
                })
            }
            Err(source) => {
                error!(
                    payment_id = %payment.id(),
                    correlation_ids = ?submission.correlation_ids,
                    "Banking Circle payment request failed: {}",
                    source
                );
                let event = ProviderEvent::failed(
                    payment,
                    "",
                    request.debtor_reference.clone(),
                    FailureReason::new(failure_code_for(&source), source.to_string()),
                )?;
                self.notifier.send_payment_status(&event).await?;
                Err(SubmitPaymentError::Provider {
                    correlation_ids: submission.correlation_ids,
                    source,
                })
            }
        }
    }
}
