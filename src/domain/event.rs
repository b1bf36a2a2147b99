//! Typed events recorded on a payment instruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::payment::PaymentProvider;

pub const DUPLICATE_PAYMENT_MESSAGE: &str = "duplicated payment instruction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Received,
    SubmittedToPaymentProvider,
    ProcessingSucceeded,
    ProcessingFailed,
    Rejected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Received => "DOMAIN.RECEIVED",
            EventType::SubmittedToPaymentProvider => "DOMAIN.SUBMITTED_TO_PAYMENT_PROVIDER",
            EventType::ProcessingSucceeded => "DOMAIN.PROCESSING_SUCCEEDED",
            EventType::ProcessingFailed => "DOMAIN.PROCESSING_FAILED",
            EventType::Rejected => "DOMAIN.REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ProcessingSucceeded | EventType::ProcessingFailed | EventType::Rejected
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure codes carried by domain failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    StuckPayment,
    RejectedPayment,
    Unhandled,
    TransportMishap,
    NoSourceAcct,
    FailedValidation,
    MissingFunds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainFailure {
    pub code: FailureCode,
    pub message: String,
}

impl DomainFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn duplicate() -> Self {
        Self::new(FailureCode::RejectedPayment, DUPLICATE_PAYMENT_MESSAGE)
    }

    pub fn is_duplicate(&self) -> bool {
        self.code == FailureCode::RejectedPayment && self.message == DUPLICATE_PAYMENT_MESSAGE
    }
}

/// Per-event payload, tagged by the event type on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum EventDetails {
    #[serde(rename = "DOMAIN.RECEIVED", rename_all = "camelCase")]
    Received { correlation_id: String },
    #[serde(rename = "DOMAIN.SUBMITTED_TO_PAYMENT_PROVIDER", rename_all = "camelCase")]
    SubmittedToPaymentProvider { payment_provider: PaymentProvider },
    #[serde(rename = "DOMAIN.PROCESSING_SUCCEEDED", rename_all = "camelCase")]
    ProcessingSucceeded {
        payment_provider: PaymentProvider,
        provider_payment_id: String,
        banking_reference: String,
    },
    #[serde(rename = "DOMAIN.PROCESSING_FAILED", rename_all = "camelCase")]
    ProcessingFailed {
        failure: DomainFailure,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_payment_id: Option<String>,
    },
    #[serde(rename = "DOMAIN.REJECTED", rename_all = "camelCase")]
    Rejected { failure: DomainFailure },
}

impl EventDetails {
    pub fn event_type(&self) -> EventType {
        match self {
            EventDetails::Received { .. } => EventType::Received,
            EventDetails::SubmittedToPaymentProvider { .. } => EventType::SubmittedToPaymentProvider,
            EventDetails::ProcessingSucceeded { .. } => EventType::ProcessingSucceeded,
            EventDetails::ProcessingFailed { .. } => EventType::ProcessingFailed,
            EventDetails::Rejected { .. } => EventType::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub created_on: DateTime<Utc>,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl Event {
    pub fn new(details: EventDetails) -> Self {
        Self {
            created_on: Utc::now(),
            details,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.details.event_type()
    }

    pub fn failure(&self) -> Option<&DomainFailure> {
        match &self.details {
            EventDetails::ProcessingFailed { failure, .. } | EventDetails::Rejected { failure } => {
                Some(failure)
            }
            _ => None,
        }
    }
}
