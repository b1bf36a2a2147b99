use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAccountDetails {
    pub iban: String,
    pub account_id: String,
    #[serde(default)]
    pub max_intra_day_loan: String,
}

/// A provider-side debtor account, selected by currency and merchant risk class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAccount {
    pub currency: String,
    pub high_risk: bool,
    pub account: SourceAccountDetails,
}

#[derive(Debug, Error)]
pub enum SourceAccountError {
    #[error("invalid source account table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate source account for currency {currency} (high risk: {high_risk})")]
    Duplicate { currency: String, high_risk: bool },
}

/// Immutable lookup table keyed by `(currency, highRisk)`.
#[derive(Debug, Clone, Default)]
pub struct SourceAccounts {
    inner: HashMap<(String, bool), SourceAccount>,
}

impl SourceAccounts {
    pub fn new(accounts: Vec<SourceAccount>) -> Result<Self, SourceAccountError> {
        let mut inner = HashMap::new();
        for account in accounts {
            let key = (account.currency.clone(), account.high_risk);
            if inner.contains_key(&key) {
                return Err(SourceAccountError::Duplicate {
                    currency: account.currency,
                    high_risk: account.high_risk,
                });
            }
            inner.insert(key, account);
        }
        Ok(Self { inner })
    }

    pub fn from_json(raw: &str) -> Result<Self, SourceAccountError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::new(serde_json::from_str(raw)?)
    }

    pub fn get(&self, currency: &str, high_risk: bool) -> Option<&SourceAccount> {
        self.inner.get(&(currency.to_string(), high_risk))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
