//! Message validation with bounded auto-correction.
//!
//! Each pass evaluates the full rule set. When errors remain, the validator
//! applies every deterministic correction it knows and evaluates again. The
//! loop ends on the first clean pass, when the iteration budget is spent, or
//! when a correction round changes nothing.

use crate::bank::{is_high_risk_country, BankDirectory};
use crate::bic::{self, Bic};
use crate::config::ValidationConfig;
use crate::currency;
use crate::error::ValidationError;
use crate::message::{Message, MessageType};
use chrono::{Datelike, Local, NaiveDate, Weekday};
use log::debug;
use rust_decimal::Decimal;

const VALUE_DATE_FORMAT: &str = "%y%m%d";

/// Reference fragments that mark test data.
const TEST_MARKERS: &[&str] = &["TEST", "FAKE", "DEMO"];

/// Returns `true` for characters of the SWIFT X character set.
pub fn is_swift_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "/-?:().,'+ ".contains(c)
}

/// Outcome of validating one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub passed: bool,
    /// Errors of the last evaluation pass, in rule order.
    pub errors: Vec<String>,
    /// Warnings raised by any pass, without duplicates.
    pub warnings: Vec<String>,
    /// Evaluation passes consumed.
    pub iterations: u32,
    /// Corrections applied, in the order they were made.
    pub corrections: Vec<String>,
    /// The corrected message, when any correction was applied.
    pub corrected: Option<Message>,
}

impl ValidationResult {
    /// Converts a failed result into an error for the message's trail.
    pub fn to_error(&self, message_id: &str) -> Option<ValidationError> {
        if self.passed {
            return None;
        }
        Some(ValidationError {
            message_id: message_id.to_string(),
            iterations: self.iterations,
            errors: self.errors.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct Evaluation {
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Evaluator-optimizer validator for payment messages.
#[derive(Debug, Clone)]
pub struct MessageValidator {
    config: ValidationConfig,
    reference_date: NaiveDate,
}

impl MessageValidator {
    /// Creates a validator. Value dates are judged against the configured
    /// reference date, or today's local date when none is set.
    pub fn new(config: ValidationConfig) -> Self {
        let reference_date = config
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive());
        MessageValidator {
            config,
            reference_date,
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Validates `message`, correcting what can be corrected.
    ///
    /// The input is never modified; a corrected copy is returned in the result.
    pub fn validate(&self, message: &Message, directory: &BankDirectory) -> ValidationResult {
        let budget = self.config.max_iterations.max(1);
        let mut current = message.clone();
        let mut corrections = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut iterations = 0;

        let errors = loop {
            iterations += 1;
            let evaluation = self.evaluate(&current, directory);
            for warning in evaluation.warnings {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }

            if evaluation.errors.is_empty() || iterations >= budget {
                break evaluation.errors;
            }

            let applied = self.correct(&mut current, directory);
            if applied.is_empty() {
                debug!(
                    "Message {}: no correction possible after pass {}",
                    message.id, iterations
                );
                break evaluation.errors;
            }
            for correction in &applied {
                debug!("Message {}: corrected {}", message.id, correction);
            }
            corrections.extend(applied);
        };

        ValidationResult {
            passed: errors.is_empty(),
            errors,
            warnings,
            iterations,
            corrected: (!corrections.is_empty()).then_some(current),
            corrections,
        }
    }

    fn evaluate(&self, message: &Message, directory: &BankDirectory) -> Evaluation {
        let mut eval = Evaluation::default();

        if message.id.trim().is_empty() {
            eval.errors.push("message id is missing".to_string());
        }

        self.check_reference(message, &mut eval);

        let sender = check_bic("sender", &message.sender_bic, directory, &mut eval);
        let receiver = check_bic("receiver", &message.receiver_bic, directory, &mut eval);
        if let (Some(s), Some(r)) = (&sender, &receiver) {
            if s.to_full() == r.to_full() {
                eval.errors
                    .push(format!("sender and receiver are the same bank ({})", s));
            }
        }

        check_currency(&message.currency, &mut eval);

        if message.amount.is_zero() || message.amount.is_negative() {
            eval.errors
                .push(format!("amount {} must be positive", message.amount));
        } else if message.amount.exceeds_minor_units() {
            eval.errors.push(format!(
                "amount {} has more than two decimal places",
                message.amount
            ));
        } else if message.amount.as_decimal() >= Decimal::new(1_000_000, 0) {
            eval.warnings
                .push(format!("very large amount {}", message.amount));
        } else if message.amount.as_decimal() >= Decimal::new(10_000, 0)
            && message.amount.is_multiple_of(Decimal::new(1_000, 0))
        {
            eval.warnings.push(format!("round amount {}", message.amount));
        }

        self.check_value_date(&message.value_date, &mut eval);
        self.check_remittance(message, &mut eval);

        if message.message_type.is_customer_transfer() {
            if message.ordering_customer.is_none() {
                eval.warnings
                    .push(format!("{} without ordering customer", message.message_type));
            }
            if message.beneficiary.is_none() {
                eval.warnings
                    .push(format!("{} without beneficiary", message.message_type));
            }
        }

        for (side, code) in [("sender", &message.sender_bic), ("receiver", &message.receiver_bic)] {
            if let Some(country) = bic::country_of(code) {
                let country = country.to_ascii_uppercase();
                if is_high_risk_country(&country) {
                    eval.warnings
                        .push(format!("{} in high-risk jurisdiction {}", side, country));
                }
            }
        }

        eval
    }

    fn check_reference(&self, message: &Message, eval: &mut Evaluation) {
        let reference = &message.reference;
        if reference.is_empty() {
            eval.errors.push("reference is missing".to_string());
            return;
        }
        if reference.len() > self.config.max_reference_len {
            eval.errors.push(format!(
                "reference '{}' exceeds {} characters",
                reference, self.config.max_reference_len
            ));
        }
        if reference.chars().any(|c| c == ' ' || !is_swift_char(c)) {
            eval.errors
                .push(format!("reference '{}' contains invalid characters", reference));
        }
        if reference.starts_with('/') || reference.ends_with('/') || reference.contains("//") {
            eval.errors
                .push(format!("reference '{}' has misplaced slashes", reference));
        }

        let upper = reference.to_uppercase();
        if TEST_MARKERS.iter().any(|m| upper.contains(m)) {
            eval.warnings
                .push(format!("reference '{}' looks like test data", reference));
        }
    }

    fn check_value_date(&self, value_date: &str, eval: &mut Evaluation) {
        if value_date.is_empty() {
            eval.errors.push("value date is missing".to_string());
            return;
        }
        let Some(date) = parse_value_date(value_date) else {
            eval.errors.push(format!(
                "value date '{}' is not a valid YYMMDD date",
                value_date
            ));
            return;
        };

        let distance = (date - self.reference_date).num_days().abs();
        if distance > self.config.date_plausibility_days {
            eval.errors.push(format!(
                "value date {} is more than {} days from {}",
                date, self.config.date_plausibility_days, self.reference_date
            ));
        } else if distance > self.config.date_warning_days {
            eval.warnings.push(format!(
                "value date {} is {} days from {}",
                date, distance, self.reference_date
            ));
        }
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            eval.warnings
                .push(format!("value date {} falls on a weekend", date));
        }
    }

    fn check_remittance(&self, message: &Message, eval: &mut Evaluation) {
        match &message.remittance_info {
            Some(text) => {
                if text.len() > self.config.max_remittance_len {
                    eval.errors.push(format!(
                        "remittance information exceeds {} characters",
                        self.config.max_remittance_len
                    ));
                }
                if !text.chars().all(is_swift_char) {
                    eval.errors
                        .push("remittance information contains invalid characters".to_string());
                }
            }
            None if message.message_type == MessageType::Mt103 => {
                eval.errors
                    .push("MT103 requires remittance information".to_string());
            }
            None => {}
        }
    }

    /// Applies every deterministic correction that changes the message.
    ///
    /// Returns a description of each change; an empty list means the message
    /// is at a fixed point.
    fn correct(&self, message: &mut Message, directory: &BankDirectory) -> Vec<String> {
        let mut applied = Vec::new();

        if let Some(fixed) = correct_bic(&message.sender_bic, directory) {
            applied.push(format!("sender BIC '{}' -> {}", message.sender_bic, fixed));
            message.sender_bic = fixed;
        }
        if let Some(fixed) = correct_bic(&message.receiver_bic, directory) {
            applied.push(format!(
                "receiver BIC '{}' -> {}",
                message.receiver_bic, fixed
            ));
            message.receiver_bic = fixed;
        }

        let currency = squash(&message.currency);
        if !currency.is_empty() && currency != message.currency {
            applied.push(format!("currency '{}' -> {}", message.currency, currency));
            message.currency = currency;
        }

        if message.amount.exceeds_minor_units() {
            let rounded = message.amount.rounded();
            applied.push(format!("amount {} -> {}", message.amount, rounded));
            message.amount = rounded;
        }

        let reference = if message.reference.trim().is_empty() {
            self.sanitize_reference(&message.id)
        } else {
            self.sanitize_reference(&message.reference)
        };
        if !reference.is_empty() && reference != message.reference {
            applied.push(format!("reference '{}' -> {}", message.reference, reference));
            message.reference = reference;
        }

        if let Some(date) = normalize_value_date(&message.value_date) {
            if date != message.value_date {
                applied.push(format!("value date '{}' -> {}", message.value_date, date));
                message.value_date = date;
            }
        }

        match &message.remittance_info {
            Some(text) => {
                let cleaned = self.sanitize_remittance(text);
                if !cleaned.is_empty() && cleaned != *text {
                    applied.push("remittance information cleaned".to_string());
                    message.remittance_info = Some(cleaned);
                }
            }
            None if message.message_type == MessageType::Mt103 => {
                let default = self.sanitize_remittance(&format!("/RFB/{}", message.reference));
                applied.push(format!("remittance information defaulted to {}", default));
                message.remittance_info = Some(default);
            }
            None => {}
        }

        applied
    }

    fn sanitize_reference(&self, raw: &str) -> String {
        let mut cleaned: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| *c != ' ' && is_swift_char(*c))
            .collect();
        while cleaned.contains("//") {
            cleaned = cleaned.replace("//", "/");
        }
        let mut cleaned: String = cleaned
            .trim_matches('/')
            .chars()
            .take(self.config.max_reference_len)
            .collect();
        while cleaned.ends_with('/') {
            cleaned.pop();
        }
        cleaned
    }

    fn sanitize_remittance(&self, raw: &str) -> String {
        let cleaned: String = raw
            .chars()
            .filter(|c| is_swift_char(*c))
            .take(self.config.max_remittance_len)
            .collect();
        cleaned.trim().to_string()
    }
}

/// Checks a party code; returns it parsed when it resolves in the directory.
fn check_bic(
    side: &str,
    code: &str,
    directory: &BankDirectory,
    eval: &mut Evaluation,
) -> Option<Bic> {
    if code.is_empty() {
        eval.errors.push(format!("{} BIC is missing", side));
        return None;
    }
    match Bic::parse(code) {
        Ok(bic) => {
            if directory.get(bic.as_str()).is_none() {
                eval.errors
                    .push(format!("{} BIC {} not found in bank directory", side, bic));
            }
            Some(bic)
        }
        Err(e) => {
            eval.errors.push(format!("{} {}", side, e));
            None
        }
    }
}

fn check_currency(code: &str, eval: &mut Evaluation) {
    if code.is_empty() {
        eval.errors.push("currency is missing".to_string());
    } else if !currency::is_well_formed(code) {
        eval.errors
            .push(format!("currency '{}' is not an ISO 4217 code", code));
    } else if !currency::is_known(code) {
        eval.errors.push(format!("currency {} is not supported", code));
    }
}

/// Normalizes a party code and completes it from the directory.
///
/// Returns `None` when nothing would change.
fn correct_bic(code: &str, directory: &BankDirectory) -> Option<String> {
    if code.is_empty() {
        return None;
    }
    let normalized = bic::normalize(code);
    let resolved = if directory.get(&normalized).is_some() {
        normalized
    } else if let Some(bank) = directory.complete(&normalized) {
        bank.bic.as_str().to_string()
    } else {
        normalized
    };
    (resolved != code).then_some(resolved)
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

pub(crate) fn parse_value_date(value_date: &str) -> Option<NaiveDate> {
    if value_date.len() != 6 || !value_date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value_date, VALUE_DATE_FORMAT).ok()
}

/// Rewrites `YYYYMMDD`, `YYYY-MM-DD` and similar forms as `YYMMDD`.
fn normalize_value_date(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let candidate = match digits.len() {
        6 => digits,
        8 => digits[2..].to_string(),
        _ => return None,
    };
    parse_value_date(&candidate).map(|_| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::bank::Bank;
    use std::str::FromStr;

    fn directory() -> BankDirectory {
        BankDirectory::from_banks(
            [
                ("CHASUS33XXX", 0.2),
                ("DEUTDEFF500", 0.3),
                ("BARCGB22XXX", 0.2),
                ("MELIIRTHXXX", 0.9),
            ]
            .into_iter()
            .map(|(code, risk)| Bank::new(Bic::parse(code).unwrap(), code, risk)),
        )
    }

    fn validator() -> MessageValidator {
        MessageValidator::new(ValidationConfig {
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            ..ValidationConfig::default()
        })
    }

    fn mt103() -> Message {
        Message::new(
            "M1",
            MessageType::Mt103,
            Amount::from_str("2500.00").unwrap(),
            "USD",
        )
        .with_reference("INV2024031501")
        .with_parties("CHASUS33", "BARCGB22XXX")
        .with_value_date("240315")
        .with_customers("ACME CORP", "GLOBEX LTD")
        .with_remittance("/INV/2024-0042")
    }

    #[test]
    fn test_clean_message_passes_in_one_pass() {
        let result = validator().validate(&mt103(), &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert_eq!(result.iterations, 1);
        assert!(result.corrections.is_empty());
        assert!(result.corrected.is_none());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_branch_is_completed_in_one_correction() {
        let message = mt103().with_parties("CHASUS33XXX", "DEUTDEFF");
        let result = validator().validate(&message, &directory());

        assert!(result.passed, "{:?}", result.errors);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.corrections.len(), 1);
        let corrected = result.corrected.unwrap();
        assert_eq!(corrected.receiver_bic, "DEUTDEFF500");
        assert_eq!(message.receiver_bic, "DEUTDEFF");
    }

    #[test]
    fn test_several_format_problems_corrected_together() {
        let mut message = mt103().with_parties(" chasus33 ", "barcgb22xxx");
        message.currency = "usd ".to_string();
        message.amount = Amount::from_str("1234.567").unwrap();
        message.value_date = "2024-03-18".to_string();
        message.reference = " inv 42 ".to_string();

        let result = validator().validate(&message, &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert_eq!(result.iterations, 2);

        let corrected = result.corrected.unwrap();
        assert_eq!(corrected.sender_bic, "CHASUS33");
        assert_eq!(corrected.receiver_bic, "BARCGB22XXX");
        assert_eq!(corrected.currency, "USD");
        assert_eq!(corrected.amount.to_string(), "1234.57");
        assert_eq!(corrected.value_date, "240318");
        assert_eq!(corrected.reference, "INV42");
    }

    #[test]
    fn test_unknown_bank_stops_at_fixed_point() {
        let message = mt103().with_parties("ZZZZUS33", "BARCGB22");
        let result = validator().validate(&message, &directory());

        assert!(!result.passed);
        assert_eq!(result.iterations, 1);
        assert!(result.corrected.is_none());
        assert!(result.errors[0].contains("not found in bank directory"));
    }

    #[test]
    fn test_iteration_budget_is_respected() {
        let validator = MessageValidator::new(ValidationConfig {
            max_iterations: 1,
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            ..ValidationConfig::default()
        });
        let message = mt103().with_parties("CHASUS33", "DEUTDEFF");
        let result = validator.validate(&message, &directory());

        assert!(!result.passed);
        assert_eq!(result.iterations, 1);
        let err = result.to_error(&message.id).unwrap();
        assert_eq!(err.iterations, 1);
    }

    #[test]
    fn test_iterations_never_exceed_budget() {
        let validator = validator();
        let mut message = mt103().with_parties("chasus33", "deutdeff");
        message.currency = "xx".to_string();
        let result = validator.validate(&message, &directory());
        assert!(!result.passed);
        assert!(result.iterations <= 3);
    }

    #[test]
    fn test_same_sender_and_receiver() {
        let message = mt103().with_parties("CHASUS33", "CHASUS33XXX");
        let result = validator().validate(&message, &directory());
        assert!(!result.passed);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("sender and receiver are the same bank")));
    }

    #[test]
    fn test_non_positive_amount_is_not_correctable() {
        let mut message = mt103();
        message.amount = Amount::ZERO;
        let result = validator().validate(&message, &directory());
        assert!(!result.passed);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_unsupported_currency() {
        let mut message = mt103();
        message.currency = "XYZ".to_string();
        let result = validator().validate(&message, &directory());
        assert!(!result.passed);
        assert!(result.errors[0].contains("not supported"));
    }

    #[test]
    fn test_value_date_plausibility() {
        let far = validator().validate(&mt103().with_value_date("260101"), &directory());
        assert!(!far.passed);

        let distant = validator().validate(&mt103().with_value_date("240520"), &directory());
        assert!(distant.passed);
        assert!(distant.warnings.iter().any(|w| w.contains("days from")));

        let weekend = validator().validate(&mt103().with_value_date("240316"), &directory());
        assert!(weekend.passed);
        assert!(weekend.warnings.iter().any(|w| w.contains("weekend")));

        let garbage = validator().validate(&mt103().with_value_date("soon"), &directory());
        assert!(!garbage.passed);
    }

    #[test]
    fn test_mt103_remittance_is_defaulted() {
        let mut message = mt103();
        message.remittance_info = None;
        let result = validator().validate(&message, &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert_eq!(
            result.corrected.unwrap().remittance_info.as_deref(),
            Some("/RFB/INV2024031501")
        );
    }

    #[test]
    fn test_mt202_needs_no_customer_fields() {
        let message = Message::new(
            "M2",
            MessageType::Mt202,
            Amount::from_str("75000.50").unwrap(),
            "EUR",
        )
        .with_parties("DEUTDEFF500", "BARCGB22")
        .with_value_date("240315");
        let result = validator().validate(&message, &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_cover_payment_warns_about_customer_fields() {
        let message = Message::new(
            "M3",
            MessageType::Mt202Cov,
            Amount::from_str("75000.50").unwrap(),
            "EUR",
        )
        .with_parties("DEUTDEFF500", "BARCGB22")
        .with_value_date("240315");
        let result = validator().validate(&message, &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert!(result
            .warnings
            .contains(&"MT202COV without ordering customer".to_string()));
        assert!(result
            .warnings
            .contains(&"MT202COV without beneficiary".to_string()));
    }

    #[test]
    fn test_warnings_do_not_fail_validation() {
        let message = mt103()
            .with_reference("TEST0001")
            .with_parties("CHASUS33", "MELIIRTH");
        let mut message = message;
        message.amount = Amount::from_str("50000").unwrap();

        let result = validator().validate(&message, &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.contains("test data")));
        assert!(result.warnings.iter().any(|w| w.contains("high-risk")));
        assert!(result.warnings.iter().any(|w| w.contains("round amount")));
    }

    #[test]
    fn test_invalid_remittance_characters_are_stripped() {
        let message = mt103().with_remittance("Invoice #42 & co");
        let result = validator().validate(&message, &directory());
        assert!(result.passed, "{:?}", result.errors);
        assert_eq!(
            result.corrected.unwrap().remittance_info.as_deref(),
            Some("Invoice 42  co")
        );
    }

    #[test]
    fn test_normalize_value_date() {
        assert_eq!(normalize_value_date("20240315").as_deref(), Some("240315"));
        assert_eq!(normalize_value_date("24/03/15").as_deref(), Some("240315"));
        assert_eq!(normalize_value_date("20241315"), None);
        assert_eq!(normalize_value_date("2024"), None);
    }

    #[test]
    fn test_swift_character_set() {
        assert!(is_swift_char('A'));
        assert!(is_swift_char('/'));
        assert!(!is_swift_char('#'));
        assert!(!is_swift_char('é'));
    }
}
