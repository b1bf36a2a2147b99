//! Wire types of the Banking Circle API.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::source_accounts::SourceAccount;
use crate::domain::PaymentInstruction;
use crate::validation::sanitize_creditor_name;

pub const CHARGE_BEARER_SHARED: &str = "SHA";
pub const SETTLEMENT_PREFIX: &str = "Settlm";

/// Payment status reported by the provider. Values outside the four handled ones are kept
/// verbatim and treated as unhandled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    Processed,
    PendingProcessing,
    Rejected,
    MissingFunding,
    Other(String),
}

impl From<String> for ProviderStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Processed" => ProviderStatus::Processed,
            "PendingProcessing" => ProviderStatus::PendingProcessing,
            "Rejected" => ProviderStatus::Rejected,
            "MissingFunding" => ProviderStatus::MissingFunding,
            _ => ProviderStatus::Other(value),
        }
    }
}

impl From<ProviderStatus> for String {
    fn from(status: ProviderStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStatus::Processed => f.write_str("Processed"),
            ProviderStatus::PendingProcessing => f.write_str("PendingProcessing"),
            ProviderStatus::Rejected => f.write_str("Rejected"),
            ProviderStatus::MissingFunding => f.write_str("MissingFunding"),
            ProviderStatus::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReference {
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub currency: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceInformation {
    pub line1: String,
    pub line2: String,
    pub line3: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line4: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditorAddress {
    pub line1: String,
    pub line2: String,
    pub line3: String,
}

/// Body of `POST /payments/singles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub requested_execution_date: String,
    pub debtor_account: AccountReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor_viban: Option<String>,
    pub debtor_reference: String,
    pub debtor_narrative_to_self: String,
    pub currency_of_transfer: String,
    pub amount: Amount,
    pub charge_bearer: String,
    pub remittance_information: RemittanceInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditor_id: Option<String>,
    pub creditor_name: String,
    pub creditor_account: AccountReference,
    pub creditor_address: CreditorAddress,
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|value| !value.is_empty())
}

impl PaymentRequest {
    /// Builds the provider request for a routed instruction debited from `source`.
    pub fn for_instruction(payment: &PaymentInstruction, source: &SourceAccount) -> Self {
        let incoming = payment.incoming_instruction();
        let merchant = &incoming.merchant;
        let contract = merchant.contract_number.as_str();
        let pay_date = incoming.compact_execution_date();
        let debtor_reference = format!("{SETTLEMENT_PREFIX} {contract} {pay_date}");
        let currency = incoming.currency_code().to_string();

        let city_and_country = [merchant.address.city.trim(), merchant.address.country.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            requested_execution_date: incoming
                .payment
                .execution_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            debtor_account: AccountReference {
                account: source.account.iban.clone(),
                financial_institution: None,
                country: None,
            },
            debtor_viban: None,
            debtor_narrative_to_self: debtor_reference.clone(),
            debtor_reference,
            currency_of_transfer: currency.clone(),
            amount: Amount {
                currency,
                amount: incoming.payment.amount.clone(),
            },
            charge_bearer: CHARGE_BEARER_SHARED.to_string(),
            remittance_information: RemittanceInformation {
                line1: contract.to_string(),
                line2: format!("Paydate {pay_date}"),
                line3: SETTLEMENT_PREFIX.to_string(),
                line4: None,
            },
            creditor_id: None,
            creditor_name: sanitize_creditor_name(&merchant.name),
            creditor_account: AccountReference {
                account: merchant.account.account_number.clone(),
                financial_institution: non_empty(&merchant.account.swift),
                country: non_empty(&merchant.account.country),
            },
            creditor_address: CreditorAddress {
                line1: merchant.address.line1.clone(),
                line2: merchant.address.line2.clone(),
                line3: city_and_country,
            },
        }
    }
}

/// 201 body of `POST /payments/singles`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatedPayment {
    pub payment_id: String,
    pub status: ProviderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResponse {
    pub provider_payment_id: String,
    pub status: ProviderStatus,
    /// The debtor reference sent with the request.
    pub banking_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StatusResponse {
    pub status: ProviderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectionRecord {
    pub payment_id: String,
    pub status: String,
    pub rejection_reason: String,
    pub debtor_reference: String,
    pub currency: String,
    pub amount: BigDecimal,
    pub value_date: String,
}

impl Default for RejectionRecord {
    fn default() -> Self {
        Self {
            payment_id: String::new(),
            status: String::new(),
            rejection_reason: String::new(),
            debtor_reference: String::new(),
            currency: String::new(),
            amount: BigDecimal::from(0),
            value_date: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub currency: String,
    pub begin_of_day_balance: BigDecimal,
    #[serde(default)]
    pub intraday_amount: BigDecimal,
}
