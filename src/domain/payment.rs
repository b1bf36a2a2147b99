//! Payment instruction aggregate.
//!
//! Holds one requested settlement payment through its lifecycle. Every state change goes
//! through a method on [`PaymentInstruction`], bumps the version and appends exactly one
//! [`Event`], so `version == events.len()` holds for every instance.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::event::{DomainFailure, Event, EventDetails, EventType};
use super::instruction::{normalize_account_number, IncomingInstruction, CURRENCY_HUF, CURRENCY_ISK};
use super::provider_event::{ProviderEvent, ProviderEventError, ProviderEventType};

pub const SOURCE_SOLANTEQ: &str = "Solanteq";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentProvider {
    #[serde(rename = "bankingCircle")]
    BankingCircle,
    #[serde(rename = "islandsbanki")]
    Islandsbanki,
    #[default]
    #[serde(rename = "unset")]
    Unset,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::BankingCircle => "bankingCircle",
            PaymentProvider::Islandsbanki => "islandsbanki",
            PaymentProvider::Unset => "unset",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Received,
    Rejected,
    SubmittedForProcessing,
    Successful,
    Failed,
    /// Accepted from older snapshots; never produced by a transition.
    Submitted,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Received => "Received",
            PaymentStatus::Rejected => "Rejected",
            PaymentStatus::SubmittedForProcessing => "SubmittedForProcessing",
            PaymentStatus::Successful => "Successful",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Submitted => "Submitted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Successful | PaymentStatus::Failed | PaymentStatus::Rejected
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Received" => Ok(PaymentStatus::Received),
            "Rejected" => Ok(PaymentStatus::Rejected),
            "SubmittedForProcessing" => Ok(PaymentStatus::SubmittedForProcessing),
            "Successful" => Ok(PaymentStatus::Successful),
            "Failed" => Ok(PaymentStatus::Failed),
            "Submitted" => Ok(PaymentStatus::Submitted),
            other => Err(TransitionError::InconsistentSnapshot(format!(
                "unknown status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("cannot {action} payment {id} in status {status}")]
    InvalidTransition {
        id: Uuid,
        status: PaymentStatus,
        action: &'static str,
    },

    #[error("payment {id} is already routed to {current}")]
    ProviderAlreadySet { id: Uuid, current: PaymentProvider },

    #[error("payment {id} has not been routed to a payment provider")]
    ProviderUnset { id: Uuid },

    #[error("invalid amount {amount:?}")]
    InvalidAmount { amount: String },

    #[error("provider event for payment {event_payment} applied to payment {id}")]
    ForeignEvent { id: Uuid, event_payment: Uuid },

    #[error("provider event of type {0:?} is not terminal")]
    NotTerminal(ProviderEventType),

    #[error(transparent)]
    InvalidProviderEvent(#[from] ProviderEventError),

    #[error("inconsistent payment snapshot: {0}")]
    InconsistentSnapshot(String),
}

/// Wire form of the aggregate. Deserialization goes through [`PaymentInstruction::restore`]
/// so a snapshot that breaks the version/event invariants is refused.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSnapshot {
    pub incoming_instruction: IncomingInstruction,
    pub id: Uuid,
    pub version: u32,
    pub payment_provider: PaymentProvider,
    pub status: PaymentStatus,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PaymentSnapshot")]
pub struct PaymentInstruction {
    incoming_instruction: IncomingInstruction,
    id: Uuid,
    version: u32,
    payment_provider: PaymentProvider,
    status: PaymentStatus,
    events: Vec<Event>,
}

impl TryFrom<PaymentSnapshot> for PaymentInstruction {
    type Error = TransitionError;

    fn try_from(snapshot: PaymentSnapshot) -> Result<Self, Self::Error> {
        Self::restore(snapshot)
    }
}

impl PaymentInstruction {
    /// Creates a new aggregate in `Received` with the account number normalized.
    pub fn create(incoming: IncomingInstruction) -> Self {
        let mut incoming = incoming;
        incoming.merchant.account.account_number =
            normalize_account_number(&incoming.merchant.account.account_number);

        let received = Event::new(EventDetails::Received {
            correlation_id: incoming.correlation_id.clone(),
        });

        Self {
            incoming_instruction: incoming,
            id: Uuid::new_v4(),
            version: 1,
            payment_provider: PaymentProvider::Unset,
            status: PaymentStatus::Received,
            events: vec![received],
        }
    }

    /// Rebuilds an aggregate from persisted or wire state.
    pub fn restore(snapshot: PaymentSnapshot) -> Result<Self, TransitionError> {
        let first = snapshot
            .events
            .first()
            .ok_or_else(|| TransitionError::InconsistentSnapshot("no events".to_string()))?;

        if first.event_type() != EventType::Received {
            return Err(TransitionError::InconsistentSnapshot(format!(
                "first event is {}",
                first.event_type()
            )));
        }

        if snapshot.version as usize != snapshot.events.len() {
            return Err(TransitionError::InconsistentSnapshot(format!(
                "version {} does not match {} events",
                snapshot.version,
                snapshot.events.len()
            )));
        }

        Ok(Self {
            incoming_instruction: snapshot.incoming_instruction,
            id: snapshot.id,
            version: snapshot.version,
            payment_provider: snapshot.payment_provider,
            status: snapshot.status,
            events: snapshot.events,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn payment_provider(&self) -> PaymentProvider {
        self.payment_provider
    }

    pub fn incoming_instruction(&self) -> &IncomingInstruction {
        &self.incoming_instruction
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Duplicate-detection key: `contractNumber#YYYY-MM-DD#amount`.
    pub fn business_id(&self) -> String {
        let incoming = &self.incoming_instruction;
        let date = incoming
            .payment
            .execution_date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        format!(
            "{}#{}#{}",
            incoming.merchant.contract_number, date, incoming.payment.amount
        )
    }

    /// True for aggregates that do not take part in business-id uniqueness: validation
    /// rejections and the failed records written for re-delivered duplicates.
    pub fn is_exempt_from_uniqueness(&self) -> bool {
        match self.status {
            PaymentStatus::Rejected => true,
            PaymentStatus::Failed => self
                .last_event()
                .and_then(Event::failure)
                .is_some_and(DomainFailure::is_duplicate),
            _ => false,
        }
    }

    pub fn reject(&mut self, failure: DomainFailure) -> Result<(), TransitionError> {
        self.require(PaymentStatus::Received, "reject")?;
        self.apply(PaymentStatus::Rejected, EventDetails::Rejected { failure });
        Ok(())
    }

    /// Applies currency-specific amount rules before submission. HUF amounts are rounded
    /// up to the next integer.
    pub fn apply_currency_rules(&mut self) -> Result<(), TransitionError> {
        self.require(PaymentStatus::Received, "adjust amount of")?;

        if self.incoming_instruction.currency_code() == CURRENCY_HUF {
            let rounded = round_up_to_integer(&self.incoming_instruction.payment.amount)?;
            self.incoming_instruction.payment.amount = rounded;
        }

        Ok(())
    }

    /// Chooses the payment provider. Once set the provider never changes.
    pub fn route_to_payment_provider(&mut self) -> Result<PaymentProvider, TransitionError> {
        let chosen = route(&self.incoming_instruction);

        match self.payment_provider {
            PaymentProvider::Unset => {
                self.payment_provider = chosen;
                Ok(chosen)
            }
            current if current == chosen => Ok(current),
            current => Err(TransitionError::ProviderAlreadySet {
                id: self.id,
                current,
            }),
        }
    }

    pub fn submit_for_processing(&mut self) -> Result<(), TransitionError> {
        self.require(PaymentStatus::Received, "submit")?;
        if self.payment_provider == PaymentProvider::Unset {
            return Err(TransitionError::ProviderUnset { id: self.id });
        }

        self.apply(
            PaymentStatus::SubmittedForProcessing,
            EventDetails::SubmittedToPaymentProvider {
                payment_provider: self.payment_provider,
            },
        );
        Ok(())
    }

    pub fn succeed(
        &mut self,
        provider_payment_id: impl Into<String>,
        banking_reference: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.require(PaymentStatus::SubmittedForProcessing, "complete")?;
        self.apply(
            PaymentStatus::Successful,
            EventDetails::ProcessingSucceeded {
                payment_provider: self.payment_provider,
                provider_payment_id: provider_payment_id.into(),
                banking_reference: banking_reference.into(),
            },
        );
        Ok(())
    }

    pub fn fail(
        &mut self,
        failure: DomainFailure,
        provider_payment_id: Option<String>,
    ) -> Result<(), TransitionError> {
        self.require(PaymentStatus::SubmittedForProcessing, "fail")?;
        self.apply(
            PaymentStatus::Failed,
            EventDetails::ProcessingFailed {
                failure,
                provider_payment_id,
            },
        );
        Ok(())
    }

    /// Terminal transition driven by a PROCESSED or FAILURE provider event.
    pub fn track_provider_event(&mut self, event: &ProviderEvent) -> Result<(), TransitionError> {
        event.validate()?;

        if event.instruction.id() != self.id {
            return Err(TransitionError::ForeignEvent {
                id: self.id,
                event_payment: event.instruction.id(),
            });
        }

        match event.event_type {
            ProviderEventType::Processed => {
                self.succeed(&event.provider_payment_id, &event.banking_reference)
            }
            ProviderEventType::Failure => {
                let failure = event
                    .failure_reason
                    .as_ref()
                    .map(|reason| DomainFailure::new(reason.code.to_domain(), &reason.message))
                    .ok_or(ProviderEventError::MissingFailureReason)?;
                let provider_payment_id =
                    Some(event.provider_payment_id.clone()).filter(|id| !id.is_empty());
                self.fail(failure, provider_payment_id)
            }
            ProviderEventType::Submitted => Err(TransitionError::NotTerminal(event.event_type)),
        }
    }

    fn require(&self, expected: PaymentStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError::InvalidTransition {
                id: self.id,
                status: self.status,
                action,
            });
        }
        Ok(())
    }

    fn apply(&mut self, status: PaymentStatus, details: EventDetails) {
        self.status = status;
        self.events.push(Event::new(details));
        self.version += 1;
    }
}

/// Deterministic provider selection, evaluated in order.
pub fn route(incoming: &IncomingInstruction) -> PaymentProvider {
    let sender = incoming.metadata.sender.as_str();

    if sender.starts_with("ISB") || sender.starts_with("RB") {
        return PaymentProvider::Islandsbanki;
    }
    if sender.starts_with("SAXO") {
        return PaymentProvider::BankingCircle;
    }
    if sender.is_empty()
        && incoming.metadata.source == SOURCE_SOLANTEQ
        && incoming.currency_code() == CURRENCY_ISK
    {
        return PaymentProvider::Islandsbanki;
    }

    PaymentProvider::BankingCircle
}

/// Rounds a positive decimal string up to the next integer: `"0.1"` becomes `"1"`.
pub fn round_up_to_integer(amount: &str) -> Result<String, TransitionError> {
    let value = BigDecimal::from_str(amount.trim()).map_err(|_| TransitionError::InvalidAmount {
        amount: amount.to_string(),
    })?;

    let truncated = value.with_scale(0);
    let rounded = if truncated < value {
        truncated + BigDecimal::from(1)
    } else {
        truncated
    };

    Ok(rounded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::FailureCode;
    use crate::domain::instruction::{Currency, Metadata};
    use crate::domain::provider_event::{FailureReason, ProviderFailureCode};
    use chrono::NaiveDate;

    fn incoming(contract: &str, amount: &str, currency: &str) -> IncomingInstruction {
        let mut incoming = IncomingInstruction::default();
        incoming.merchant.contract_number = contract.to_string();
        incoming.merchant.name = "Merchant".to_string();
        incoming.merchant.account.account_number = "gb 33BUKb2020 1555 555555".to_string();
        incoming.payment.amount = amount.to_string();
        incoming.payment.currency = Currency {
            iso_code: currency.to_string(),
            iso_number: "978".to_string(),
        };
        incoming.payment.execution_date = NaiveDate::from_ymd_opt(2021, 5, 25);
        incoming.correlation_id = "corr-1".to_string();
        incoming
    }

    fn submitted(incoming: IncomingInstruction) -> PaymentInstruction {
        let mut payment = PaymentInstruction::create(incoming);
        payment.route_to_payment_provider().unwrap();
        payment.submit_for_processing().unwrap();
        payment
    }

    #[test]
    fn create_starts_received_with_normalized_account() {
        let payment = PaymentInstruction::create(incoming("9876862", "1234.56", "EUR"));

        assert_eq!(payment.status(), PaymentStatus::Received);
        assert_eq!(payment.version(), 1);
        assert_eq!(payment.events().len(), 1);
        assert_eq!(payment.events()[0].event_type(), EventType::Received);
        assert_eq!(payment.payment_provider(), PaymentProvider::Unset);
        assert_eq!(
            payment.incoming_instruction().merchant.account.account_number,
            "GB33BUKB20201555555555"
        );
    }

    #[test]
    fn business_id_uses_contract_date_and_amount() {
        let payment = PaymentInstruction::create(incoming("9876862", "1234.56", "EUR"));
        assert_eq!(payment.business_id(), "9876862#2021-05-25#1234.56");
    }

    #[test]
    fn successful_lifecycle_keeps_version_in_step_with_events() {
        let mut payment = submitted(incoming("9876862", "1234.56", "EUR"));
        payment.succeed("pp-1", "Settlm 9876862 20210525").unwrap();

        assert_eq!(payment.status(), PaymentStatus::Successful);
        assert_eq!(payment.version() as usize, payment.events().len());
        let types: Vec<_> = payment.events().iter().map(Event::event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::Received,
                EventType::SubmittedToPaymentProvider,
                EventType::ProcessingSucceeded
            ]
        );
    }

    #[test]
    fn rejected_only_from_received() {
        let mut payment = submitted(incoming("9876862", "1", "EUR"));
        let err = payment
            .reject(DomainFailure::new(FailureCode::FailedValidation, "x"))
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_transitions_require_submission() {
        let mut payment = PaymentInstruction::create(incoming("9876862", "1", "EUR"));
        assert!(payment.succeed("pp", "ref").is_err());
        assert!(payment.fail(DomainFailure::duplicate(), None).is_err());
        assert_eq!(payment.version(), 1);
    }

    #[test]
    fn submit_requires_routing() {
        let mut payment = PaymentInstruction::create(incoming("9876862", "1", "EUR"));
        assert!(matches!(
            payment.submit_for_processing(),
            Err(TransitionError::ProviderUnset { .. })
        ));
    }

    #[test]
    fn routes_by_sender_source_and_currency() {
        let mut base = incoming("9876862", "1", "EUR");
        assert_eq!(route(&base), PaymentProvider::BankingCircle);

        base.metadata.sender = "ISB-0101".to_string();
        assert_eq!(route(&base), PaymentProvider::Islandsbanki);

        base.metadata.sender = "RB".to_string();
        assert_eq!(route(&base), PaymentProvider::Islandsbanki);

        base.metadata.sender = "SAXO".to_string();
        base.payment.currency.iso_code = "ISK".to_string();
        assert_eq!(route(&base), PaymentProvider::BankingCircle);

        base.metadata = Metadata {
            source: SOURCE_SOLANTEQ.to_string(),
            ..Metadata::default()
        };
        assert_eq!(route(&base), PaymentProvider::Islandsbanki);

        base.payment.currency.iso_code = "EUR".to_string();
        assert_eq!(route(&base), PaymentProvider::BankingCircle);
    }

    #[test]
    fn provider_is_never_changed_once_set() {
        let mut payment = PaymentInstruction::create(incoming("9876862", "1", "EUR"));
        assert_eq!(
            payment.route_to_payment_provider().unwrap(),
            PaymentProvider::BankingCircle
        );

        payment.incoming_instruction.metadata.sender = "ISB".to_string();
        assert!(matches!(
            payment.route_to_payment_provider(),
            Err(TransitionError::ProviderAlreadySet { .. })
        ));
        assert_eq!(payment.payment_provider(), PaymentProvider::BankingCircle);
    }

    #[test]
    fn rounds_huf_amounts_up() {
        assert_eq!(round_up_to_integer("0.1").unwrap(), "1");
        assert_eq!(round_up_to_integer("93456").unwrap(), "93456");
        assert_eq!(round_up_to_integer("1704.51").unwrap(), "1705");
        assert_eq!(round_up_to_integer("12.00").unwrap(), "12");
        assert!(round_up_to_integer("abc").is_err());

        let mut payment = PaymentInstruction::create(incoming("9876862", "1704.51", "HUF"));
        payment.apply_currency_rules().unwrap();
        assert_eq!(payment.incoming_instruction().payment.amount, "1705");

        let mut euro = PaymentInstruction::create(incoming("9876862", "1704.51", "EUR"));
        euro.apply_currency_rules().unwrap();
        assert_eq!(euro.incoming_instruction().payment.amount, "1704.51");
    }

    #[test]
    fn tracks_failure_event_with_domain_code() {
        let payment = submitted(incoming("9876862", "1", "EUR"));
        let event = ProviderEvent::failed(
            payment.clone(),
            "pp-9",
            "ref",
            FailureReason::new(ProviderFailureCode::MissingFunding, "no funds"),
        )
        .unwrap();

        let mut tracked = payment;
        tracked.track_provider_event(&event).unwrap();

        assert_eq!(tracked.status(), PaymentStatus::Failed);
        let failure = tracked.last_event().and_then(Event::failure).unwrap();
        assert_eq!(failure.code, FailureCode::MissingFunds);
        assert_eq!(failure.message, "no funds");
    }

    #[test]
    fn submitted_event_is_not_terminal() {
        let payment = submitted(incoming("9876862", "1", "EUR"));
        let event = ProviderEvent::submitted(payment.clone(), "pp-1", "ref").unwrap();
        let mut tracked = payment;
        assert_eq!(
            tracked.track_provider_event(&event),
            Err(TransitionError::NotTerminal(ProviderEventType::Submitted))
        );
    }

    #[test]
    fn json_round_trip_preserves_aggregate() {
        let mut payment = submitted(incoming("9876862", "1234.56", "EUR"));
        payment.fail(DomainFailure::duplicate(), None).unwrap();

        let json = serde_json::to_value(&payment).unwrap();
        for key in ["incomingInstruction", "id", "version", "paymentProvider", "status", "events"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }

        let parsed: PaymentInstruction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, payment);
        assert!(parsed.is_exempt_from_uniqueness());
    }

    #[test]
    fn restore_refuses_version_mismatch() {
        let payment = submitted(incoming("9876862", "1", "EUR"));
        let mut json = serde_json::to_value(&payment).unwrap();
        json["version"] = serde_json::json!(7);

        assert!(serde_json::from_value::<PaymentInstruction>(json).is_err());
    }
}
