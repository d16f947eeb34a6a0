//! Fraud scoring and routing.
//!
//! A message's composite score is the weighted mean of three sub-scores:
//!
//! - **digit anomaly**: first-digit test over the sender's recent amounts
//! - **rules**: share of rule heuristics the message triggers
//! - **amount pattern**: suspicious shapes of the amount itself, raised
//!   further by a risky reference or a stale value date
//!
//! The composite picks the routing class. Scoring reads the bank directory,
//! the amount population and the router's reference date only, so identical
//! inputs give identical scores.

use crate::amount::Amount;
use crate::bank::{is_high_risk_country, BankDirectory};
use crate::benford::{self, NEUTRAL_SCORE};
use crate::bic;
use crate::config::FraudConfig;
use crate::currency;
use crate::message::Message;
use crate::validator::parse_value_date;
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Number of rule heuristics the rule sub-score is normalized by.
pub const RULE_COUNT: usize = 6;

/// Large amounts are expected to carry whole or half units.
const PRECISION_CHECK_FLOOR: i64 = 100_000;

/// Reference fragments typical of test or fabricated traffic.
const TEST_PATTERNS: &[&str] = &["TEST", "FAKE", "DEMO"];

/// Keyboard runs that show up in typed-in references.
const KEYBOARD_PATTERNS: &[&str] = &[
    "QWERTY", "ASDF", "ZXCV", "QWER", "ASDFG", "ZXCVB", "123456", "1234", "234567", "345678",
];

/// Fraud-risk bucket deciding downstream handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingClass {
    Low,
    Medium,
    High,
}

impl fmt::Display for RoutingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoutingClass::Low => "LOW",
            RoutingClass::Medium => "MEDIUM",
            RoutingClass::High => "HIGH",
        };
        f.write_str(name)
    }
}

/// Risk assessment of one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudScore {
    /// Weighted composite in `[0, 1]`.
    pub composite: f64,
    pub digit_anomaly: f64,
    /// Amounts the first-digit test ran on.
    pub digit_population: usize,
    /// `None` when the population was too small to test.
    pub chi_square: Option<f64>,
    pub rules_triggered: usize,
    pub rule_score: f64,
    /// Amount shape plus `reference_risk` and `timing_risk`, capped at 1.
    pub amount_pattern: f64,
    pub reference_risk: f64,
    /// Zero when the router has no reference date or the value date is unreadable.
    pub timing_risk: f64,
    /// Human-readable list of everything that raised the score.
    pub indicators: Vec<String>,
    pub routing: RoutingClass,
}

/// Scores messages and assigns routing classes.
#[derive(Debug, Clone)]
pub struct FraudRouter {
    config: FraudConfig,
    directory: Arc<BankDirectory>,
    reference_date: Option<NaiveDate>,
}

impl FraudRouter {
    pub fn new(config: FraudConfig, directory: Arc<BankDirectory>) -> Self {
        FraudRouter {
            config,
            directory,
            reference_date: None,
        }
    }

    /// Judges value dates against `date`; without one the timing signal is off.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Scores `message` against `population`, the recent amounts of its sender.
    pub fn score(&self, message: &Message, population: &[Amount]) -> FraudScore {
        let mut indicators = Vec::new();

        let (digit_anomaly, chi_square, digit_population) =
            match benford::analyze(population, self.config.min_population, self.config.sensitivity)
            {
                Ok(analysis) => {
                    if analysis.score >= 0.5 {
                        indicators.push(format!(
                            "first-digit distribution of {} recent amounts deviates (chi-square {:.2})",
                            analysis.population, analysis.chi_square
                        ));
                    }
                    (analysis.score, Some(analysis.chi_square), analysis.population)
                }
                Err(e) => {
                    debug!("Message {}: digit test skipped: {}", message.id, e);
                    (NEUTRAL_SCORE, None, population.len())
                }
            };

        let rules_triggered = self.evaluate_rules(message, &mut indicators);
        let rule_score = rules_triggered as f64 / RULE_COUNT as f64;
        self.bank_risk(message, &mut indicators);
        let reference_risk = reference_risk(&message.reference, &mut indicators);
        let timing_risk = self.timing_risk(&message.value_date, &mut indicators);
        let amount_pattern = (self.amount_pattern(message.amount, &mut indicators)
            + reference_risk
            + timing_risk)
            .min(1.0);
        self.test_patterns(message, &mut indicators);

        let weights = &self.config.weights;
        let composite = ((weights.digit_anomaly * digit_anomaly
            + weights.rules * rule_score
            + weights.amount_pattern * amount_pattern)
            / weights.total())
        .clamp(0.0, 1.0);
        let routing = self.classify(composite);

        debug!(
            "Message {}: composite {:.3} (digit {:.3}, rules {}/{}, pattern {:.2}) -> {}",
            message.id,
            composite,
            digit_anomaly,
            rules_triggered,
            RULE_COUNT,
            amount_pattern,
            routing
        );

        FraudScore {
            composite,
            digit_anomaly,
            digit_population,
            chi_square,
            rules_triggered,
            rule_score,
            amount_pattern,
            reference_risk,
            timing_risk,
            indicators,
            routing,
        }
    }

    /// Maps a composite score to its routing class.
    pub fn classify(&self, composite: f64) -> RoutingClass {
        if composite >= self.config.high_threshold {
            RoutingClass::High
        } else if composite < self.config.low_threshold {
            RoutingClass::Low
        } else {
            RoutingClass::Medium
        }
    }

    fn evaluate_rules(&self, message: &Message, indicators: &mut Vec<String>) -> usize {
        let config = &self.config;
        let amount = message.amount;
        let value = amount.as_decimal();
        let mut triggered = 0;
        let mut trigger = |fired: bool, indicator: String| {
            if fired {
                triggered += 1;
                indicators.push(indicator);
            }
        };

        trigger(
            self.is_round(amount),
            format!("round amount {}", amount),
        );

        let near_floor = config.reporting_threshold * (Decimal::ONE - config.reporting_margin);
        trigger(
            value >= near_floor && value < config.reporting_threshold,
            format!(
                "amount {} just below reporting threshold {}",
                amount, config.reporting_threshold
            ),
        );

        let sender = self.directory.get(&message.sender_bic);
        let receiver = self.directory.get(&message.receiver_bic);
        let risk_product = match (sender, receiver) {
            (Some(s), Some(r)) => s.risk_weight * r.risk_weight,
            _ => 0.0,
        };
        trigger(
            risk_product > config.bank_risk_cutoff,
            format!("combined bank risk {:.2}", risk_product),
        );

        let sender_country = sender
            .map(|b| b.country.clone())
            .or_else(|| bic::country_of(&message.sender_bic).map(str::to_ascii_uppercase))
            .unwrap_or_default();
        let receiver_country = receiver
            .map(|b| b.country.clone())
            .or_else(|| bic::country_of(&message.receiver_bic).map(str::to_ascii_uppercase))
            .unwrap_or_default();
        trigger(
            currency::is_foreign_to(&message.currency, &sender_country, &receiver_country),
            format!(
                "{} is foreign to both {} and {}",
                message.currency, sender_country, receiver_country
            ),
        );

        trigger(
            value >= config.very_large_amount,
            format!("very large amount {}", amount),
        );

        let risky: Vec<&str> = [sender_country.as_str(), receiver_country.as_str()]
            .into_iter()
            .filter(|c| is_high_risk_country(c))
            .collect();
        trigger(
            !risky.is_empty(),
            format!("high-risk jurisdiction {}", risky.join("/")),
        );

        triggered
    }

    fn amount_pattern(&self, amount: Amount, indicators: &mut Vec<String>) -> f64 {
        let value = amount.as_decimal();
        let mut score: f64 = 0.0;

        if self.is_round(amount) {
            score += 0.2;
        }
        if value < self.config.small_amount {
            indicators.push(format!("unusually small amount {}", amount));
            score += 0.2;
        }
        if value >= self.config.very_large_amount {
            score += 0.3;
        }
        if has_repeated_digits(&amount.whole_digits()) {
            indicators.push("amount contains a repeated digit run".to_string());
            score += 0.15;
        }
        if value > Decimal::new(PRECISION_CHECK_FLOOR, 0) {
            let cents = (value.fract() * Decimal::ONE_HUNDRED).trunc();
            if !cents.is_zero() && cents != Decimal::new(50, 0) {
                indicators.push("unusual precision for a large amount".to_string());
                score += 0.1;
            }
        }

        score.min(1.0)
    }

    /// Flags value dates lying well before the reference date.
    fn timing_risk(&self, value_date: &str, indicators: &mut Vec<String>) -> f64 {
        let (Some(today), Some(date)) = (self.reference_date, parse_value_date(value_date)) else {
            return 0.0;
        };
        let age = (today - date).num_days();
        if age > self.config.stale_value_days {
            indicators.push(format!("value date {} is {} days in the past", date, age));
            0.2
        } else {
            0.0
        }
    }

    fn bank_risk(&self, message: &Message, indicators: &mut Vec<String>) {
        for code in [&message.sender_bic, &message.receiver_bic] {
            if let Some(bank) = self.directory.get(code).filter(|b| b.is_high_risk()) {
                indicators.push(format!(
                    "bank {} carries risk weight {:.2}",
                    bank.bic, bank.risk_weight
                ));
            }
        }
    }

    fn test_patterns(&self, message: &Message, indicators: &mut Vec<String>) {
        let reference = message.reference.to_uppercase();
        if TEST_PATTERNS.iter().any(|p| reference.starts_with(p))
            || reference.contains("999")
            || reference.contains("000000")
        {
            indicators.push(format!("reference '{}' matches a test pattern", message.reference));
        }
        for code in [&message.sender_bic, &message.receiver_bic] {
            if TEST_PATTERNS.iter().any(|p| code.starts_with(p)) {
                indicators.push(format!("BIC {} matches a test pattern", code));
            }
        }
    }

    fn is_round(&self, amount: Amount) -> bool {
        amount.as_decimal() >= self.config.round_amount_floor
            && amount.is_multiple_of(self.config.round_amount_multiple)
    }
}

/// Scores a reference by how fabricated it looks.
fn reference_risk(reference: &str, indicators: &mut Vec<String>) -> f64 {
    let mut score: f64 = 0.0;
    let mut flag = |fired: bool, weight: f64, indicator: &str| {
        if fired {
            indicators.push(format!("reference '{}' {}", reference, indicator));
            score += weight;
        }
    };

    let distinct: HashSet<char> = reference.chars().collect();
    let length = reference.chars().count();
    flag(
        !reference.is_empty() && distinct.len() <= 2,
        0.2,
        "has very low entropy",
    );
    flag(
        length > 8 && reference.chars().all(|c| c.is_ascii_digit()),
        0.1,
        "is a long all-numeric string",
    );
    flag(
        length > 6 && reference.chars().all(|c| c.is_ascii_alphabetic()),
        0.1,
        "is all alphabetic",
    );
    let upper = reference.to_ascii_uppercase();
    flag(
        KEYBOARD_PATTERNS.iter().any(|p| upper.contains(p)),
        0.15,
        "contains a keyboard pattern",
    );
    flag(has_sequential_run(&upper), 0.2, "contains a sequential run");

    score.min(1.0)
}

/// Returns `true` if the digits, or the letters, of `text` hold three
/// ascending consecutive characters such as `345` or `KLM`.
fn has_sequential_run(text: &str) -> bool {
    let ascending = |chars: Vec<u8>| chars.windows(3).any(|w| w[1] == w[0] + 1 && w[2] == w[1] + 1);
    let digits: Vec<u8> = text.bytes().filter(u8::is_ascii_digit).collect();
    let letters: Vec<u8> = text.bytes().filter(u8::is_ascii_alphabetic).collect();
    ascending(digits) || ascending(letters)
}

/// Returns `true` if three consecutive digits are identical.
fn has_repeated_digits(digits: &str) -> bool {
    digits
        .as_bytes()
        .windows(3)
        .any(|w| w[0] == w[1] && w[1] == w[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::Bank;
    use crate::bic::Bic;
    use crate::message::MessageType;
    use std::str::FromStr;

    fn directory() -> Arc<BankDirectory> {
        Arc::new(BankDirectory::from_banks(
            [
                ("CHASUS33XXX", 0.2),
                ("DEUTDEFF500", 0.3),
                ("BNPAFRPPXXX", 0.25),
                ("MELIIRTHXXX", 0.9),
                ("KORKKPPYXXX", 0.8),
            ]
            .into_iter()
            .map(|(code, risk)| Bank::new(Bic::parse(code).unwrap(), code, risk)),
        ))
    }

    fn router() -> FraudRouter {
        FraudRouter::new(FraudConfig::default(), directory())
    }

    fn message(amount: &str, currency: &str, sender: &str, receiver: &str) -> Message {
        Message::new(
            "M1",
            MessageType::Mt103,
            Amount::from_str(amount).unwrap(),
            currency,
        )
        .with_reference("INV42")
        .with_parties(sender, receiver)
    }

    fn population(counts: [i64; 9]) -> Vec<Amount> {
        counts
            .iter()
            .zip(1i64..)
            .flat_map(|(&count, digit)| {
                (0..count).map(move |i| Amount::new(Decimal::new(digit * 100 + i, 0)))
            })
            .collect()
    }

    fn benford_population() -> Vec<Amount> {
        population([30, 18, 12, 10, 8, 7, 6, 5, 4])
    }

    #[test]
    fn test_round_usd_transfer_routes_low() {
        let score = router().score(
            &message("10000.00", "USD", "CHASUS33", "DEUTDEFF500"),
            &benford_population(),
        );

        assert!(score.digit_anomaly < 0.01);
        assert_eq!(score.rules_triggered, 1);
        assert!((score.amount_pattern - 0.35).abs() < 1e-9);
        assert!(score.composite < 0.3, "composite {}", score.composite);
        assert_eq!(score.routing, RoutingClass::Low);
    }

    #[test]
    fn test_score_is_deterministic() {
        let router = router();
        let msg = message("9500.00", "JPY", "DEUTDEFF500", "BNPAFRPP");
        let population = population([3, 3, 3, 3, 3, 3, 3, 3, 3]);
        assert_eq!(router.score(&msg, &population), router.score(&msg, &population));
    }

    #[test]
    fn test_sparse_population_is_neutral() {
        let score = router().score(
            &message("2500.00", "USD", "CHASUS33", "DEUTDEFF500"),
            &population([1, 1, 1, 0, 0, 0, 0, 0, 0]),
        );
        assert_eq!(score.digit_anomaly, NEUTRAL_SCORE);
        assert_eq!(score.chi_square, None);
        assert_eq!(score.digit_population, 3);
    }

    #[test]
    fn test_individual_rules() {
        let router = router();
        let pop = benford_population();

        let near = router.score(&message("9500.00", "USD", "CHASUS33", "DEUTDEFF500"), &pop);
        assert_eq!(near.rules_triggered, 1);
        assert!(near.indicators[0].contains("reporting threshold"));

        let mismatch = router.score(&message("2500.00", "JPY", "DEUTDEFF500", "BNPAFRPP"), &pop);
        assert_eq!(mismatch.rules_triggered, 1);
        assert!(mismatch.indicators[0].contains("foreign"));

        let risky = router.score(&message("2500.00", "USD", "MELIIRTH", "KORKKPPY"), &pop);
        assert_eq!(risky.rules_triggered, 2);

        let plain = router.score(&message("2512.37", "EUR", "DEUTDEFF500", "BNPAFRPP"), &pop);
        assert_eq!(plain.rules_triggered, 0);
        assert_eq!(plain.amount_pattern, 0.0);
    }

    #[test]
    fn test_suspicious_transfer_routes_high() {
        let score = router().score(
            &message("5000000.00", "JPY", "MELIIRTH", "KORKKPPY"),
            &population([0, 0, 0, 0, 0, 0, 0, 0, 60]),
        );
        assert_eq!(score.rules_triggered, 5);
        assert!(score.digit_anomaly > 0.99);
        assert_eq!(score.routing, RoutingClass::High);
        assert!(score.composite <= 1.0);
    }

    #[test]
    fn test_classify_boundaries() {
        let router = router();
        assert_eq!(router.classify(0.0), RoutingClass::Low);
        assert_eq!(router.classify(0.29), RoutingClass::Low);
        assert_eq!(router.classify(0.3), RoutingClass::Medium);
        assert_eq!(router.classify(0.69), RoutingClass::Medium);
        assert_eq!(router.classify(0.7), RoutingClass::High);
    }

    #[test]
    fn test_weights_shift_composite() {
        let mut config = FraudConfig::default();
        config.weights.digit_anomaly = 0.0;
        config.weights.amount_pattern = 0.0;
        let router = FraudRouter::new(config, directory());
        let score = router.score(
            &message("2500.00", "USD", "MELIIRTH", "KORKKPPY"),
            &[],
        );
        assert!((score.composite - 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_amount_patterns() {
        let router = router();
        let mut indicators = Vec::new();
        let small = router.amount_pattern(Amount::from_str("45.00").unwrap(), &mut indicators);
        assert!((small - 0.2).abs() < 1e-9);

        let odd_cents =
            router.amount_pattern(Amount::from_str("250123.17").unwrap(), &mut indicators);
        assert!((odd_cents - 0.1).abs() < 1e-9);

        let half = router.amount_pattern(Amount::from_str("250123.50").unwrap(), &mut indicators);
        assert_eq!(half, 0.0);
    }

    #[test]
    fn test_test_pattern_indicators() {
        let mut msg = message("2500.00", "USD", "CHASUS33", "DEUTDEFF500");
        msg.reference = "TEST-0001".to_string();
        let score = router().score(&msg, &[]);
        assert!(score
            .indicators
            .iter()
            .any(|i| i.contains("test pattern")));
    }

    #[test]
    fn test_reference_risk_heuristics() {
        let mut indicators = Vec::new();
        assert_eq!(reference_risk("INV2024001", &mut indicators), 0.0);
        assert!(indicators.is_empty());

        assert!((reference_risk("AAAA", &mut indicators) - 0.2).abs() < 1e-9);
        assert!((reference_risk("837261950", &mut indicators) - 0.1).abs() < 1e-9);
        assert!((reference_risk("PAYMENTS", &mut indicators) - 0.1).abs() < 1e-9);
        // QWERTY is a keyboard run and its letters hold no ascending triple
        assert!((reference_risk("INV7QWERTY", &mut indicators) - 0.15).abs() < 1e-9);
        // 1234 is both a keyboard run and a sequential run
        assert!((reference_risk("INV1234", &mut indicators) - 0.35).abs() < 1e-9);
        assert!(indicators.iter().any(|i| i.contains("keyboard pattern")));
        assert!(indicators.iter().any(|i| i.contains("sequential run")));
    }

    #[test]
    fn test_sequential_runs() {
        assert!(has_sequential_run("INV345"));
        assert!(has_sequential_run("9K8L7M"));
        assert!(!has_sequential_run("INV2024001"));
        assert!(!has_sequential_run("REF"));
    }

    #[test]
    fn test_risky_reference_raises_pattern_score() {
        let router = router();
        let plain = router.score(&message("2512.37", "EUR", "DEUTDEFF500", "BNPAFRPP"), &[]);
        let risky = router.score(
            &message("2512.37", "EUR", "DEUTDEFF500", "BNPAFRPP").with_reference("QWERTY123"),
            &[],
        );
        assert_eq!(plain.amount_pattern, 0.0);
        assert!(risky.reference_risk > 0.0);
        assert_eq!(risky.amount_pattern, risky.reference_risk);
        assert!(risky.composite > plain.composite);
    }

    #[test]
    fn test_stale_value_date_raises_pattern_score() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let router = router().with_reference_date(today);
        let msg = |date: &str| {
            message("2512.37", "EUR", "DEUTDEFF500", "BNPAFRPP").with_value_date(date)
        };

        let stale = router.score(&msg("240101"), &[]);
        assert!((stale.timing_risk - 0.2).abs() < 1e-9);
        assert!(stale.indicators.iter().any(|i| i.contains("74 days in the past")));

        assert_eq!(router.score(&msg("240301"), &[]).timing_risk, 0.0);
        // Future dates are the validator's concern
        assert_eq!(router.score(&msg("240601"), &[]).timing_risk, 0.0);
        assert_eq!(router.score(&msg("garbage"), &[]).timing_risk, 0.0);
        // Without a reference date the signal is off
        assert_eq!(self::router().score(&msg("240101"), &[]).timing_risk, 0.0);
    }

    #[test]
    fn test_high_risk_banks_are_named() {
        let score = router().score(&message("2512.37", "USD", "MELIIRTH", "KORKKPPY"), &[]);
        let named: Vec<&String> = score
            .indicators
            .iter()
            .filter(|i| i.contains("carries risk weight"))
            .collect();
        assert_eq!(named.len(), 2);
        assert!(named[0].contains("MELIIRTHXXX"));
    }

    #[test]
    fn test_repeated_digits() {
        assert!(has_repeated_digits("10000"));
        assert!(has_repeated_digits("47771"));
        assert!(!has_repeated_digits("12121"));
        assert!(!has_repeated_digits("11"));
    }
}
