//! Framework-agnostic payment domain.

pub mod event;
pub mod instruction;
pub mod payment;
pub mod provider_event;

pub use event::{DomainFailure, Event, EventDetails, EventType, FailureCode};
pub use instruction::{normalize_account_number, IncomingInstruction};
pub use payment::{PaymentInstruction, PaymentProvider, PaymentStatus, TransitionError};
pub use provider_event::{
    FailureReason, ProviderEvent, ProviderEventError, ProviderEventType, ProviderFailureCode,
};
