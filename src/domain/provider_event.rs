//! Provider event envelope exchanged between pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::FailureCode;
use super::payment::{PaymentInstruction, PaymentProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventType {
    Submitted,
    Processed,
    Failure,
}

/// Provider-level failure codes, mapped onto [`FailureCode`] when tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderFailureCode {
    StuckInPending,
    RejectedCode,
    MissingFunding,
    UnhandledPaymentProviderStatus,
    TransportFailure,
    NoSourceAccount,
}

impl ProviderFailureCode {
    pub fn to_domain(self) -> FailureCode {
        match self {
            ProviderFailureCode::RejectedCode => FailureCode::RejectedPayment,
            ProviderFailureCode::StuckInPending => FailureCode::StuckPayment,
            ProviderFailureCode::TransportFailure => FailureCode::TransportMishap,
            ProviderFailureCode::NoSourceAccount => FailureCode::NoSourceAcct,
            ProviderFailureCode::MissingFunding => FailureCode::MissingFunds,
            ProviderFailureCode::UnhandledPaymentProviderStatus => FailureCode::Unhandled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub code: ProviderFailureCode,
    pub message: String,
}

impl FailureReason {
    pub fn new(code: ProviderFailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderEventError {
    #[error("provider name must not be empty")]
    EmptyProviderName,
    #[error("{0:?} event requires a provider payment id")]
    MissingProviderPaymentId(ProviderEventType),
    #[error("FAILURE event requires a failure reason")]
    MissingFailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub created_on: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: ProviderEventType,
    pub instruction: PaymentInstruction,
    pub provider_name: String,
    #[serde(default)]
    pub provider_payment_id: String,
    #[serde(default)]
    pub banking_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl ProviderEvent {
    pub fn submitted(
        instruction: PaymentInstruction,
        provider_payment_id: impl Into<String>,
        banking_reference: impl Into<String>,
    ) -> Result<Self, ProviderEventError> {
        Self::build(
            ProviderEventType::Submitted,
            instruction,
            provider_payment_id.into(),
            banking_reference.into(),
            None,
        )
    }

    pub fn processed(
        instruction: PaymentInstruction,
        provider_payment_id: impl Into<String>,
        banking_reference: impl Into<String>,
    ) -> Result<Self, ProviderEventError> {
        Self::build(
            ProviderEventType::Processed,
            instruction,
            provider_payment_id.into(),
            banking_reference.into(),
            None,
        )
    }

    /// The provider payment id may be empty when the payment never reached the provider.
    pub fn failed(
        instruction: PaymentInstruction,
        provider_payment_id: impl Into<String>,
        banking_reference: impl Into<String>,
        reason: FailureReason,
    ) -> Result<Self, ProviderEventError> {
        Self::build(
            ProviderEventType::Failure,
            instruction,
            provider_payment_id.into(),
            banking_reference.into(),
            Some(reason),
        )
    }

    fn build(
        event_type: ProviderEventType,
        instruction: PaymentInstruction,
        provider_payment_id: String,
        banking_reference: String,
        failure_reason: Option<FailureReason>,
    ) -> Result<Self, ProviderEventError> {
        let provider_name = match instruction.payment_provider() {
            PaymentProvider::Unset => String::new(),
            provider => provider.as_str().to_string(),
        };

        let event = Self {
            created_on: Utc::now(),
            event_type,
            instruction,
            provider_name,
            provider_payment_id,
            banking_reference,
            failure_reason,
        };
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), ProviderEventError> {
        if self.provider_name.trim().is_empty() {
            return Err(ProviderEventError::EmptyProviderName);
        }

        match self.event_type {
            ProviderEventType::Submitted | ProviderEventType::Processed
                if self.provider_payment_id.is_empty() =>
            {
                Err(ProviderEventError::MissingProviderPaymentId(self.event_type))
            }
            ProviderEventType::Failure
                if self
                    .failure_reason
                    .as_ref()
                    .map_or(true, |reason| reason.message.trim().is_empty()) =>
            {
                Err(ProviderEventError::MissingFailureReason)
            }
            _ => Ok(()),
        }
    }

    pub fn payment_id(&self) -> uuid::Uuid {
        self.instruction.id()
    }

    /// Idempotency key for downstream consumers.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{:?}:{}",
            self.instruction.id(),
            self.event_type,
            self.provider_payment_id
        )
    }
}
