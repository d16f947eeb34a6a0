//! Pipeline configuration.
//!
//! Every option has a default, so an empty JSON object is a valid
//! configuration. Components receive their own section in their constructor;
//! nothing reads configuration from global state.

use crate::error::{PipelineError, Result};
use crate::splitter::{self, SplitRule};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub fraud: FraudConfig,

    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub split: SplitConfig,

    /// What to do with messages routed Medium
    #[serde(default)]
    pub medium_risk: MediumRiskAction,

    /// Directory for the CSV record sink; no records are written when unset
    #[serde(default)]
    pub records_dir: Option<PathBuf>,
}

/// Handling of Medium-class messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediumRiskAction {
    /// Approve and split, keeping the score on record
    #[default]
    Approve,

    /// Send through the review conversation like High messages
    Review,
}

/// Worker pool settings for batch stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Deadline for a whole stage batch; `None` waits indefinitely
    #[serde(default = "default_batch_timeout_ms")]
    pub timeout_ms: Option<u64>,
}

/// Message validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum evaluation passes per message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Date value dates are judged against; today when unset
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,

    /// Value dates further away than this draw a warning
    #[serde(default = "default_date_warning_days")]
    pub date_warning_days: i64,

    /// Value dates further away than this are errors
    #[serde(default = "default_date_plausibility_days")]
    pub date_plausibility_days: i64,

    #[serde(default = "default_max_reference_len")]
    pub max_reference_len: usize,

    #[serde(default = "default_max_remittance_len")]
    pub max_remittance_len: usize,
}

/// Relative weights of the fraud sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FraudWeights {
    #[serde(default = "default_weight")]
    pub digit_anomaly: f64,

    #[serde(default = "default_weight")]
    pub rules: f64,

    #[serde(default = "default_weight")]
    pub amount_pattern: f64,
}

/// Fraud scoring and routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudConfig {
    #[serde(default)]
    pub weights: FraudWeights,

    /// Composite scores below this route Low
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Composite scores at or above this route High
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Smallest population the first-digit test is computed on
    #[serde(default = "default_min_population")]
    pub min_population: usize,

    /// Scale of the first-digit normalization; smaller is stricter
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    #[serde(default = "default_round_amount_floor")]
    pub round_amount_floor: Decimal,

    #[serde(default = "default_round_amount_multiple")]
    pub round_amount_multiple: Decimal,

    /// Regulatory reporting threshold (e.g. CTR)
    #[serde(default = "default_reporting_threshold")]
    pub reporting_threshold: Decimal,

    /// Fraction below the reporting threshold that counts as "near"
    #[serde(default = "default_reporting_margin")]
    pub reporting_margin: Decimal,

    /// Sender × receiver risk weight above this triggers a rule
    #[serde(default = "default_bank_risk_cutoff")]
    pub bank_risk_cutoff: f64,

    #[serde(default = "default_very_large_amount")]
    pub very_large_amount: Decimal,

    #[serde(default = "default_small_amount")]
    pub small_amount: Decimal,

    /// Recent amounts kept per sender bank
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Value dates further than this in the past raise the pattern score
    #[serde(default = "default_stale_value_days")]
    pub stale_value_days: i64,
}

/// Reasoning collaborator call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_review_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts after the first one on transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Transaction splitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_split_workers")]
    pub workers: usize,

    #[serde(default = "splitter::default_rules")]
    pub rules: Vec<SplitRule>,
}

// Default value functions for serde
fn default_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_max_iterations() -> u32 {
    3
}

fn default_date_warning_days() -> i64 {
    30
}

fn default_date_plausibility_days() -> i64 {
    365
}

fn default_max_reference_len() -> usize {
    16
}

fn default_max_remittance_len() -> usize {
    140 // 4 lines of 35 characters
}

fn default_weight() -> f64 {
    1.0
}

fn default_low_threshold() -> f64 {
    0.3
}

fn default_high_threshold() -> f64 {
    0.7
}

fn default_min_population() -> usize {
    30
}

fn default_sensitivity() -> f64 {
    0.5
}

fn default_round_amount_floor() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_round_amount_multiple() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_reporting_threshold() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_reporting_margin() -> Decimal {
    Decimal::new(10, 2)
}

fn default_bank_risk_cutoff() -> f64 {
    0.49
}

fn default_very_large_amount() -> Decimal {
    Decimal::new(1_000_000, 0)
}

fn default_small_amount() -> Decimal {
    Decimal::new(100, 0)
}

fn default_history_capacity() -> usize {
    500
}

fn default_stale_value_days() -> i64 {
    30
}

fn default_review_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_split_workers() -> usize {
    2
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            timeout_ms: default_batch_timeout_ms(),
        }
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            reference_date: None,
            date_warning_days: default_date_warning_days(),
            date_plausibility_days: default_date_plausibility_days(),
            max_reference_len: default_max_reference_len(),
            max_remittance_len: default_max_remittance_len(),
        }
    }
}

impl Default for FraudWeights {
    fn default() -> Self {
        Self {
            digit_anomaly: default_weight(),
            rules: default_weight(),
            amount_pattern: default_weight(),
        }
    }
}

impl FraudWeights {
    pub fn total(&self) -> f64 {
        self.digit_anomaly + self.rules + self.amount_pattern
    }
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            weights: FraudWeights::default(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
            min_population: default_min_population(),
            sensitivity: default_sensitivity(),
            round_amount_floor: default_round_amount_floor(),
            round_amount_multiple: default_round_amount_multiple(),
            reporting_threshold: default_reporting_threshold(),
            reporting_margin: default_reporting_margin(),
            bank_risk_cutoff: default_bank_risk_cutoff(),
            very_large_amount: default_very_large_amount(),
            small_amount: default_small_amount(),
            history_capacity: default_history_capacity(),
            stale_value_days: default_stale_value_days(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_review_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ReviewConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            workers: default_split_workers(),
            rules: splitter::default_rules(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file and check it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON text and check it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(PipelineError::InvalidConfig(msg.to_string())) };

        if self.batch.workers == 0 {
            return invalid("batch.workers must be at least 1");
        }
        if self.batch.batch_size == 0 {
            return invalid("batch.batch_size must be at least 1");
        }
        if self.batch.timeout_ms == Some(0) {
            return invalid("batch.timeout_ms must be positive");
        }
        if self.validation.max_iterations == 0 {
            return invalid("validation.max_iterations must be at least 1");
        }
        if self.validation.date_warning_days > self.validation.date_plausibility_days {
            return invalid("validation.date_warning_days exceeds date_plausibility_days");
        }

        let fraud = &self.fraud;
        let weights = [
            fraud.weights.digit_anomaly,
            fraud.weights.rules,
            fraud.weights.amount_pattern,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || fraud.weights.total() <= 0.0 {
            return invalid("fraud.weights must be non-negative with a positive sum");
        }
        if !(0.0..=1.0).contains(&fraud.low_threshold)
            || !(0.0..=1.0).contains(&fraud.high_threshold)
            || fraud.low_threshold > fraud.high_threshold
        {
            return invalid("fraud thresholds must satisfy 0 <= low <= high <= 1");
        }
        if fraud.min_population == 0 {
            return invalid("fraud.min_population must be at least 1");
        }
        if fraud.sensitivity.is_nan() || fraud.sensitivity <= 0.0 {
            return invalid("fraud.sensitivity must be positive");
        }
        if fraud.history_capacity == 0 {
            return invalid("fraud.history_capacity must be at least 1");
        }
        if fraud.stale_value_days < 0 {
            return invalid("fraud.stale_value_days must not be negative");
        }

        if self.review.timeout_ms == 0 {
            return invalid("review.timeout_ms must be positive");
        }
        if self.split.workers == 0 {
            return invalid("split.workers must be at least 1");
        }
        splitter::validate_rules(&self.split.rules)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config.batch.workers, 4);
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.validation.max_iterations, 3);
        assert_eq!(config.fraud.low_threshold, 0.3);
        assert_eq!(config.fraud.high_threshold, 0.7);
        assert_eq!(config.fraud.min_population, 30);
        assert_eq!(config.review.max_retries, 2);
        assert_eq!(config.split.rules.len(), 2);
        assert_eq!(config.medium_risk, MediumRiskAction::Approve);
        assert!(config.records_dir.is_none());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let json = r#"{
            "batch": { "workers": 8 },
            "fraud": { "weights": { "digit_anomaly": 2.0 }, "reporting_threshold": "15000" },
            "validation": { "reference_date": "2024-03-15" },
            "medium_risk": "review"
        }"#;
        let config = PipelineConfig::from_json(json).unwrap();
        assert_eq!(config.batch.workers, 8);
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.fraud.weights.digit_anomaly, 2.0);
        assert_eq!(config.fraud.weights.rules, 1.0);
        assert_eq!(config.fraud.reporting_threshold, Decimal::new(15_000, 0));
        assert_eq!(
            config.validation.reference_date,
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(config.medium_risk, MediumRiskAction::Review);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = PipelineConfig::from_json(r#"{ "batch": { "workers": 0 } }"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let json = r#"{ "fraud": { "low_threshold": 0.8, "high_threshold": 0.2 } }"#;
        assert!(PipelineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_zero_weights() {
        let json =
            r#"{ "fraud": { "weights": { "digit_anomaly": 0, "rules": 0, "amount_pattern": 0 } } }"#;
        assert!(PipelineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_rules_without_remainder() {
        let json = r#"{ "split": { "rules": [
            { "role": "company-fee", "kind": "percent", "percent": "1" }
        ] } }"#;
        assert!(PipelineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let err = PipelineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[test]
    fn test_default_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
