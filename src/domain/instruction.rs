//! Incoming settlement instruction.
//! Immutable input produced by the upstream file processors.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CURRENCY_HUF: &str = "HUF";
pub const CURRENCY_ISK: &str = "ISK";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingInstruction {
    pub merchant: Merchant,
    pub metadata: Metadata,
    pub payment: Payment,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Merchant {
    pub contract_number: String,
    pub reg_number: String,
    pub name: String,
    pub email: String,
    pub address: Address,
    pub account: Account,
    pub high_risk: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub country: String,
    pub city: String,
    pub line1: String,
    pub line2: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub account_number: String,
    pub swift: String,
    pub country: String,
    pub swift_ref: String,
    pub bank_country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub source: String,
    pub filename: String,
    pub file_type: String,
    pub sender: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Payment {
    pub sender: Sender,
    /// Decimal amount as received, e.g. `"1234.56"`.
    pub amount: String,
    pub currency: Currency,
    pub execution_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sender {
    pub name: String,
    pub account_number: String,
    pub branch_code: String,
}

impl Sender {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.account_number.is_empty() && self.branch_code.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Currency {
    pub iso_code: String,
    pub iso_number: String,
}

impl IncomingInstruction {
    pub fn currency_code(&self) -> &str {
        &self.payment.currency.iso_code
    }

    /// Execution date formatted as `YYYYMMDD`, empty when absent.
    pub fn compact_execution_date(&self) -> String {
        self.payment
            .execution_date
            .map(|date| date.format("%Y%m%d").to_string())
            .unwrap_or_default()
    }
}

/// Upper-cases and strips every whitespace character.
pub fn normalize_account_number(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}
