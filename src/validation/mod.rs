use bigdecimal::BigDecimal;
use std::fmt;
use std::str::FromStr;

use crate::domain::instruction::{IncomingInstruction, CURRENCY_ISK};

pub const CONTRACT_NUMBER_MIN_LEN: usize = 7;
pub const ICELANDIC_IBAN_LEN: usize = 26;
pub const ICELANDIC_IBAN_PREFIX: &str = "IS";
pub const CREDITOR_NAME_MAX_LEN: usize = 35;
pub const ICELANDIC_SENDER_PREFIXES: &[&str] = &["ISB", "RB"];
pub const SAXO_SENDER_PREFIX: &str = "SAXO";

/// Punctuation accepted by the provider in free-text fields, besides letters and digits.
const ALLOWED_PUNCTUATION: &[char] = &['/', '-', '?', ':', '(', ')', '.', ',', '\'', '+', ' '];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Every violation found on an instruction; never empty when returned as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn check(&mut self, result: ValidationResult) {
        if let Err(err) = result {
            self.0.push(err);
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drops characters the provider refuses in names, collapses whitespace and truncates
/// to [`CREDITOR_NAME_MAX_LEN`] characters on a character boundary.
pub fn sanitize_creditor_name(name: &str) -> String {
    let allowed: String = name
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ALLOWED_PUNCTUATION.contains(ch))
        .collect();

    sanitize_string(&allowed)
        .chars()
        .take(CREDITOR_NAME_MAX_LEN)
        .collect()
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(
            field,
            format!("{field} should not be empty"),
        ));
    }

    Ok(())
}

pub fn validate_min_len(field: &'static str, value: &str, min_len: usize) -> ValidationResult {
    if value.trim().chars().count() < min_len {
        return Err(ValidationError::new(
            field,
            format!("{field} should be at least {min_len} characters"),
        ));
    }

    Ok(())
}

pub fn validate_decimal(field: &'static str, value: &str) -> ValidationResult {
    if BigDecimal::from_str(value.trim()).is_err() {
        return Err(ValidationError::new(
            field,
            format!("{field} should be a decimal number"),
        ));
    }

    Ok(())
}

/// ISO 13616 check: move the first four characters to the end, expand letters to two
/// digits (A = 10 .. Z = 35) and require the number to be 1 modulo 97.
pub fn iban_checksum_valid(iban: &str) -> bool {
    if iban.len() < 5 || !iban.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return false;
    }

    let (head, tail) = iban.split_at(4);
    let remainder = tail.chars().chain(head.chars()).fold(0u32, |acc, ch| {
        if let Some(digit) = ch.to_digit(10) {
            (acc * 10 + digit) % 97
        } else {
            let value = ch.to_ascii_uppercase() as u32 - 'A' as u32 + 10;
            (acc * 100 + value) % 97
        }
    });

    remainder == 1
}

pub fn validate_icelandic_iban(iban: &str) -> ValidationResult {
    if iban.len() != ICELANDIC_IBAN_LEN {
        return Err(ValidationError::new(
            "AccountNumber",
            format!("Icelandic IBAN should be {ICELANDIC_IBAN_LEN} characters long"),
        ));
    }

    if !iban.starts_with(ICELANDIC_IBAN_PREFIX) {
        return Err(ValidationError::new(
            "AccountNumber",
            format!("Icelandic IBAN should start with {ICELANDIC_IBAN_PREFIX}"),
        ));
    }

    if !iban_checksum_valid(iban) {
        return Err(ValidationError::new(
            "AccountNumber",
            "Icelandic IBAN checksum is invalid",
        ));
    }

    Ok(())
}

fn validate_iban_segment(
    field: &'static str,
    iban: &str,
    value: &str,
    range: std::ops::Range<usize>,
) -> ValidationResult {
    if value.is_empty() {
        return Ok(());
    }

    match iban.get(range) {
        Some(segment) if segment == value => Ok(()),
        _ => Err(ValidationError::new(
            field,
            format!("{field} {value} does not match the account IBAN"),
        )),
    }
}

pub fn is_icelandic_sender(sender: &str) -> bool {
    ICELANDIC_SENDER_PREFIXES
        .iter()
        .any(|prefix| sender.starts_with(prefix))
}

/// Validates an incoming instruction, reporting every violation rather than the first.
pub fn validate_instruction(instruction: &IncomingInstruction) -> Result<(), ValidationErrors> {
    let merchant = &instruction.merchant;
    let payment = &instruction.payment;
    let mut errors = ValidationErrors::default();

    errors.check(validate_required("ContractNumber", &merchant.contract_number).and_then(|_| {
        validate_min_len("ContractNumber", &merchant.contract_number, CONTRACT_NUMBER_MIN_LEN)
    }));
    errors.check(validate_required("Name", &merchant.name));
    errors.check(validate_required("AccountNumber", &merchant.account.account_number));
    if payment.execution_date.is_none() {
        errors.check(Err(ValidationError::new(
            "ExecutionDate",
            "ExecutionDate should not be empty",
        )));
    }
    errors.check(
        validate_required("Amount", &payment.amount)
            .and_then(|_| validate_decimal("Amount", &payment.amount)),
    );
    errors.check(validate_required("CurrencyIsoCode", &payment.currency.iso_code));
    errors.check(validate_required("CurrencyIsoNumber", &payment.currency.iso_number));
    errors.check(validate_required("Source", &instruction.metadata.source));

    if !payment.sender.is_empty() {
        errors.check(Err(ValidationError::new(
            "Sender",
            "Sender should be empty, it is set when the payment is routed",
        )));
    }

    let sender = instruction.metadata.sender.as_str();
    if is_icelandic_sender(sender) && !merchant.account.account_number.is_empty() {
        let iban = merchant.account.account_number.as_str();
        let iban_result = validate_icelandic_iban(iban);
        let iban_valid = iban_result.is_ok();
        errors.check(iban_result);

        if iban_valid {
            errors.check(validate_iban_segment("RegNumber", iban, &merchant.reg_number, 16..26));
            errors.check(validate_iban_segment("Swift", iban, &merchant.account.swift, 4..16));
        }
    }

    if sender.starts_with(SAXO_SENDER_PREFIX) && payment.currency.iso_code == CURRENCY_ISK {
        errors.check(Err(ValidationError::new(
            "Currency",
            "SAXO files should not contain ISK payments",
        )));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instruction::{Currency, Sender};
    use chrono::NaiveDate;

    const VALID_IS_IBAN: &str = "IS140159260076545510730339";

    fn valid_instruction() -> IncomingInstruction {
        let mut incoming = IncomingInstruction::default();
        incoming.merchant.contract_number = "9876862".to_string();
        incoming.merchant.name = "Catarina & Riya".to_string();
        incoming.merchant.account.account_number = "GB33BUKB20201555555555".to_string();
        incoming.metadata.source = "Solanteq".to_string();
        incoming.payment.amount = "1234.56".to_string();
        incoming.payment.currency = Currency {
            iso_code: "EUR".to_string(),
            iso_number: "978".to_string(),
        };
        incoming.payment.execution_date = NaiveDate::from_ymd_opt(2021, 5, 25);
        incoming
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn sanitizes_creditor_name() {
        assert_eq!(sanitize_creditor_name("Catarina & Riya"), "Catarina Riya");
        assert_eq!(sanitize_creditor_name("O'Brien (Ltd.)"), "O'Brien (Ltd.)");

        let long = format!("{}ð", "a".repeat(35));
        assert_eq!(long.chars().count(), 36);
        let sanitized = sanitize_creditor_name(&long);
        assert_eq!(sanitized.chars().count(), 35);
        assert_eq!(sanitized, "a".repeat(35));

        let multibyte = "ð".repeat(36);
        assert_eq!(sanitize_creditor_name(&multibyte), "ð".repeat(35));
    }

    #[test]
    fn accepts_valid_instruction() {
        assert_eq!(validate_instruction(&valid_instruction()), Ok(()));
    }

    #[test]
    fn reports_every_violation() {
        let mut incoming = valid_instruction();
        incoming.merchant.account.account_number = String::new();
        incoming.merchant.contract_number = "123".to_string();
        incoming.payment.currency.iso_number = String::new();
        incoming.payment.sender = Sender {
            name: "preset".to_string(),
            ..Sender::default()
        };

        let errors = validate_instruction(&incoming).unwrap_err();
        let messages = errors.messages();
        assert_eq!(messages.len(), 4);
        assert!(messages.contains(&"AccountNumber should not be empty".to_string()));
        assert!(messages.contains(&"ContractNumber should be at least 7 characters".to_string()));
        assert!(errors.to_string().contains("CurrencyIsoNumber should not be empty"));
    }

    #[test]
    fn rejects_non_decimal_amount() {
        let mut incoming = valid_instruction();
        incoming.payment.amount = "12,50".to_string();
        let errors = validate_instruction(&incoming).unwrap_err();
        assert_eq!(errors.errors()[0].field, "Amount");
    }

    #[test]
    fn checks_iban_checksum() {
        assert!(iban_checksum_valid(VALID_IS_IBAN));
        assert!(iban_checksum_valid("GB33BUKB20201555555555"));
        assert!(iban_checksum_valid("GB82WEST12345698765432"));
        assert!(!iban_checksum_valid("GB82WEST12345698765433"));
        assert!(!iban_checksum_valid("IS14"));
    }

    #[test]
    fn validates_icelandic_iban() {
        assert!(validate_icelandic_iban(VALID_IS_IBAN).is_ok());
        assert!(validate_icelandic_iban(&VALID_IS_IBAN[..25]).is_err());
        assert!(validate_icelandic_iban("GB33BUKB20201555555555AAAA").is_err());
        assert!(validate_icelandic_iban("IS150159260076545510730339").is_err());
    }

    #[test]
    fn checks_icelandic_reg_number_and_swift_against_iban() {
        let mut incoming = valid_instruction();
        incoming.metadata.sender = "ISB".to_string();
        incoming.merchant.account.account_number = VALID_IS_IBAN.to_string();
        incoming.merchant.reg_number = "5510730339".to_string();
        incoming.merchant.account.swift = "015926007654".to_string();
        assert_eq!(validate_instruction(&incoming), Ok(()));

        incoming.merchant.reg_number = "0000000000".to_string();
        incoming.merchant.account.swift = "XXXXXXXXXXXX".to_string();
        let errors = validate_instruction(&incoming).unwrap_err();
        let fields: Vec<_> = errors.errors().iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["RegNumber", "Swift"]);
    }

    #[test]
    fn icelandic_sender_requires_icelandic_iban() {
        let mut incoming = valid_instruction();
        incoming.metadata.sender = "RB".to_string();
        assert!(validate_instruction(&incoming).is_err());
    }

    #[test]
    fn saxo_files_cannot_carry_isk() {
        let mut incoming = valid_instruction();
        incoming.metadata.sender = "SAXO".to_string();
        incoming.payment.currency.iso_code = "ISK".to_string();

        let errors = validate_instruction(&incoming).unwrap_err();
        assert_eq!(errors.messages(), vec!["SAXO files should not contain ISK payments"]);
    }
}
