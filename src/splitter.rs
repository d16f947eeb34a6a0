//! Transaction splitting.
//!
//! The orchestrator turns the configured rule list into one job per fee
//! split, hands the jobs to a small worker pool, then reassembles the splits
//! in rule order. The single remainder rule (the principal) absorbs whatever
//! the other splits leave, so rounding never leaks out of the transaction.

use crate::amount::Amount;
use crate::config::SplitConfig;
use crate::error::SplitError;
use crossbeam_channel::unbounded;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;

/// Recipient of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitRole {
    CompanyFee,
    CorrespondentFee,
    TaxWithholding,
    BeneficiaryAccount,
}

impl fmt::Display for SplitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SplitRole::CompanyFee => "company-fee",
            SplitRole::CorrespondentFee => "correspondent-fee",
            SplitRole::TaxWithholding => "tax-withholding",
            SplitRole::BeneficiaryAccount => "beneficiary-account",
        };
        f.write_str(name)
    }
}

/// How a split's amount is derived from the transaction total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitKind {
    /// Percentage of the total, rounded half away from zero to minor units
    Percent { percent: Decimal },

    /// Flat amount
    Fixed { amount: Amount },

    /// Whatever is left once every other split is taken
    Remainder,
}

/// One entry of the ordered split plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRule {
    pub role: SplitRole,
    #[serde(flatten)]
    pub kind: SplitKind,
}

impl SplitRule {
    pub fn percent(role: SplitRole, percent: Decimal) -> Self {
        SplitRule {
            role,
            kind: SplitKind::Percent { percent },
        }
    }

    pub fn fixed(role: SplitRole, amount: Amount) -> Self {
        SplitRule {
            role,
            kind: SplitKind::Fixed { amount },
        }
    }

    pub fn remainder(role: SplitRole) -> Self {
        SplitRule {
            role,
            kind: SplitKind::Remainder,
        }
    }
}

/// Default plan: 0.5 % company fee, remainder to the beneficiary.
pub fn default_rules() -> Vec<SplitRule> {
    vec![
        SplitRule::percent(SplitRole::CompanyFee, Decimal::new(5, 1)),
        SplitRule::remainder(SplitRole::BeneficiaryAccount),
    ]
}

/// Checks that a rule set can produce a balanced split.
pub fn validate_rules(rules: &[SplitRule]) -> Result<(), SplitError> {
    let remainders = rules
        .iter()
        .filter(|r| matches!(r.kind, SplitKind::Remainder))
        .count();
    if remainders != 1 {
        return Err(SplitError::InvalidRules(format!(
            "exactly one remainder rule required, found {}",
            remainders
        )));
    }

    let mut percent_total = Decimal::ZERO;
    for rule in rules {
        match &rule.kind {
            SplitKind::Percent { percent } => {
                if percent.is_sign_negative() || *percent > Decimal::ONE_HUNDRED {
                    return Err(SplitError::InvalidRules(format!(
                        "{} percentage {} outside [0, 100]",
                        rule.role, percent
                    )));
                }
                percent_total += *percent;
            }
            SplitKind::Fixed { amount } => {
                if amount.is_negative() {
                    return Err(SplitError::InvalidRules(format!(
                        "{} fixed amount {} is negative",
                        rule.role, amount
                    )));
                }
            }
            SplitKind::Remainder => {}
        }
    }

    if percent_total > Decimal::ONE_HUNDRED {
        return Err(SplitError::InvalidRules(format!(
            "percentages sum to {}",
            percent_total
        )));
    }
    Ok(())
}

/// A single component of a settled transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSplit {
    pub role: SplitRole,
    pub amount: Amount,
}

/// An accepted transfer and its settlement components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub message_id: String,
    pub currency: String,
    pub total: Amount,
    /// Splits in rule order; empty until split.
    pub splits: Vec<TransactionSplit>,
}

impl Transaction {
    pub fn new(message_id: impl Into<String>, currency: impl Into<String>, total: Amount) -> Self {
        Transaction {
            message_id: message_id.into(),
            currency: currency.into(),
            total,
            splits: Vec::new(),
        }
    }

    /// Sum of all split amounts.
    pub fn split_total(&self) -> Amount {
        self.splits.iter().map(|s| s.amount).sum()
    }

    /// Amount allocated to `role`, if present.
    pub fn amount_for(&self, role: SplitRole) -> Option<Amount> {
        self.splits
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.amount)
    }
}

/// Splits transactions according to an ordered rule plan.
#[derive(Debug, Clone)]
pub struct TransactionSplitter {
    rules: Vec<SplitRule>,
    workers: usize,
}

impl TransactionSplitter {
    /// Creates a splitter, rejecting rule sets that cannot balance.
    pub fn new(rules: Vec<SplitRule>, workers: usize) -> Result<Self, SplitError> {
        validate_rules(&rules)?;
        Ok(TransactionSplitter {
            rules,
            workers: workers.max(1),
        })
    }

    pub fn from_config(config: &SplitConfig) -> Result<Self, SplitError> {
        Self::new(config.rules.clone(), config.workers)
    }

    /// Splits `transaction` and checks that the splits sum to its total.
    ///
    /// Percent shares are truncated to minor units and fixed amounts are
    /// capped at what earlier rules left over, so the remainder split is
    /// never negative. Any existing splits on the transaction are replaced.
    pub fn split(&self, mut transaction: Transaction) -> Result<Transaction, SplitError> {
        let total = transaction.total;
        let computed = self.compute_allocations(total);

        let mut available = total;
        let mut granted = Vec::with_capacity(self.rules.len());
        for (idx, rule) in self.rules.iter().enumerate() {
            if matches!(rule.kind, SplitKind::Remainder) {
                granted.push(None);
                continue;
            }
            let wanted = computed[idx].ok_or(SplitError::WorkerLost(idx))?;
            let amount = wanted.min(available);
            if amount < wanted {
                warn!(
                    "Split {}: {} capped at {} (wanted {})",
                    transaction.message_id, rule.role, amount, wanted
                );
            }
            available -= amount;
            granted.push(Some(amount));
        }

        let splits = self
            .rules
            .iter()
            .zip(granted)
            .map(|(rule, amount)| TransactionSplit {
                role: rule.role,
                amount: amount.unwrap_or(available),
            })
            .collect();
        transaction.splits = splits;

        let sum = transaction.split_total();
        if sum != total {
            return Err(SplitError::InvariantViolated {
                message_id: transaction.message_id.clone(),
                total: total.to_string(),
                sum: sum.to_string(),
            });
        }

        debug!(
            "Split {} of {} {} into {} parts",
            transaction.message_id,
            total,
            transaction.currency,
            transaction.splits.len()
        );
        Ok(transaction)
    }

    /// Computes every non-remainder split on the worker pool.
    ///
    /// The result is indexed by rule position; remainder slots stay `None`.
    fn compute_allocations(&self, total: Amount) -> Vec<Option<Amount>> {
        let mut amounts = vec![None; self.rules.len()];

        let (job_tx, job_rx) = unbounded::<(usize, SplitKind)>();
        let (out_tx, out_rx) = unbounded::<(usize, Amount)>();

        let mut job_count = 0;
        for (idx, rule) in self.rules.iter().enumerate() {
            if matches!(rule.kind, SplitKind::Remainder) {
                continue;
            }
            if job_tx.send((idx, rule.kind.clone())).is_ok() {
                job_count += 1;
            }
        }
        drop(job_tx);

        if job_count == 0 {
            return amounts;
        }

        thread::scope(|scope| {
            for worker_id in 0..self.workers.min(job_count) {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("split-worker-{}", worker_id))
                    .spawn_scoped(scope, move || {
                        for (idx, kind) in job_rx.iter() {
                            if out_tx.send((idx, allocate(total, &kind))).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn split worker {}: {}", worker_id, e);
                }
            }
        });
        drop(out_tx);

        for (idx, amount) in out_rx.try_iter() {
            amounts[idx] = Some(amount);
        }
        amounts
    }
}

/// Amount of a single non-remainder split.
fn allocate(total: Amount, kind: &SplitKind) -> Amount {
    match kind {
        SplitKind::Percent { percent } => total.percent(*percent),
        SplitKind::Fixed { amount } => amount.rounded(),
        SplitKind::Remainder => Amount::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn pct(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_default_rules_split_fee_and_principal() {
        let splitter = TransactionSplitter::new(default_rules(), 2).unwrap();
        let tx = splitter
            .split(Transaction::new("M1", "USD", amt("10000.00")))
            .unwrap();

        assert_eq!(tx.splits.len(), 2);
        assert_eq!(tx.splits[0].role, SplitRole::CompanyFee);
        assert_eq!(tx.splits[0].amount.to_string(), "50.00");
        assert_eq!(tx.splits[1].role, SplitRole::BeneficiaryAccount);
        assert_eq!(tx.splits[1].amount.to_string(), "9950.00");
        assert_eq!(tx.split_total(), amt("10000.00"));
    }

    #[test]
    fn test_remainder_absorbs_rounding() {
        let rules = vec![
            SplitRule::percent(SplitRole::CompanyFee, pct("33.333")),
            SplitRule::percent(SplitRole::CorrespondentFee, pct("33.333")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
        ];
        let splitter = TransactionSplitter::new(rules, 3).unwrap();

        for total in ["0.01", "0.05", "1.00", "99.99", "100.01", "123456.78"] {
            let tx = splitter
                .split(Transaction::new("M", "EUR", amt(total)))
                .unwrap();
            assert_eq!(tx.split_total(), amt(total), "total {}", total);
        }
    }

    #[test]
    fn test_rule_order_is_preserved_with_many_workers() {
        let rules = vec![
            SplitRule::fixed(SplitRole::CorrespondentFee, amt("15")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
            SplitRule::percent(SplitRole::CompanyFee, pct("1")),
            SplitRule::percent(SplitRole::TaxWithholding, pct("2.5")),
        ];
        let splitter = TransactionSplitter::new(rules, 8).unwrap();
        let tx = splitter
            .split(Transaction::new("M", "GBP", amt("2000.00")))
            .unwrap();

        let roles: Vec<_> = tx.splits.iter().map(|s| s.role).collect();
        assert_eq!(
            roles,
            vec![
                SplitRole::CorrespondentFee,
                SplitRole::BeneficiaryAccount,
                SplitRole::CompanyFee,
                SplitRole::TaxWithholding,
            ]
        );
        assert_eq!(tx.amount_for(SplitRole::CompanyFee), Some(amt("20.00")));
        assert_eq!(tx.amount_for(SplitRole::TaxWithholding), Some(amt("50.00")));
        assert_eq!(
            tx.amount_for(SplitRole::BeneficiaryAccount),
            Some(amt("1915.00"))
        );
    }

    #[test]
    fn test_single_worker_matches_many_workers() {
        let rules = vec![
            SplitRule::percent(SplitRole::CompanyFee, pct("0.75")),
            SplitRule::percent(SplitRole::TaxWithholding, pct("12.5")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
        ];
        let one = TransactionSplitter::new(rules.clone(), 1).unwrap();
        let many = TransactionSplitter::new(rules, 4).unwrap();

        let a = one.split(Transaction::new("M", "USD", amt("7777.77"))).unwrap();
        let b = many.split(Transaction::new("M", "USD", amt("7777.77"))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_fee_larger_than_total_is_capped() {
        let rules = vec![
            SplitRule::fixed(SplitRole::CompanyFee, amt("25")),
            SplitRule::fixed(SplitRole::CorrespondentFee, amt("5")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
        ];
        let splitter = TransactionSplitter::new(rules, 2).unwrap();
        let tx = splitter
            .split(Transaction::new("M", "USD", amt("10.00")))
            .unwrap();
        assert_eq!(tx.amount_for(SplitRole::CompanyFee), Some(amt("10.00")));
        assert_eq!(tx.amount_for(SplitRole::CorrespondentFee), Some(Amount::ZERO));
        assert_eq!(tx.amount_for(SplitRole::BeneficiaryAccount), Some(Amount::ZERO));
        assert_eq!(tx.split_total(), amt("10.00"));
    }

    #[test]
    fn test_percent_shares_of_a_cent_never_overallocate() {
        let rules = vec![
            SplitRule::percent(SplitRole::CompanyFee, pct("50")),
            SplitRule::percent(SplitRole::TaxWithholding, pct("50")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
        ];
        let splitter = TransactionSplitter::new(rules, 2).unwrap();

        for total in ["0.01", "0.03", "1.05", "999.99"] {
            let tx = splitter
                .split(Transaction::new("M", "USD", amt(total)))
                .unwrap();
            assert_eq!(tx.split_total(), amt(total), "total {}", total);
            assert!(tx.splits.iter().all(|s| !s.amount.is_negative()));
        }

        let tx = splitter
            .split(Transaction::new("M", "USD", amt("0.01")))
            .unwrap();
        assert_eq!(tx.amount_for(SplitRole::CompanyFee), Some(Amount::ZERO));
        assert_eq!(tx.amount_for(SplitRole::BeneficiaryAccount), Some(amt("0.01")));
    }

    #[test]
    fn test_remainder_only_plan() {
        let splitter =
            TransactionSplitter::new(vec![SplitRule::remainder(SplitRole::BeneficiaryAccount)], 2)
                .unwrap();
        let tx = splitter
            .split(Transaction::new("M", "USD", amt("42.42")))
            .unwrap();
        assert_eq!(tx.splits.len(), 1);
        assert_eq!(tx.splits[0].amount, amt("42.42"));
    }

    #[test]
    fn test_validate_rules() {
        assert!(validate_rules(&default_rules()).is_ok());
        assert!(validate_rules(&[]).is_err());
        assert!(validate_rules(&[
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
            SplitRule::remainder(SplitRole::CompanyFee),
        ])
        .is_err());
        assert!(validate_rules(&[
            SplitRule::percent(SplitRole::CompanyFee, pct("101")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
        ])
        .is_err());
        assert!(validate_rules(&[
            SplitRule::percent(SplitRole::CompanyFee, pct("60")),
            SplitRule::percent(SplitRole::TaxWithholding, pct("60")),
            SplitRule::remainder(SplitRole::BeneficiaryAccount),
        ])
        .is_err());
    }

    #[test]
    fn test_rules_deserialize_from_json() {
        let json = r#"[
            { "role": "company-fee", "kind": "percent", "percent": "0.5" },
            { "role": "correspondent-fee", "kind": "fixed", "amount": "12.50" },
            { "role": "beneficiary-account", "kind": "remainder" }
        ]"#;
        let rules: Vec<SplitRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules[0], SplitRule::percent(SplitRole::CompanyFee, pct("0.5")));
        assert_eq!(
            rules[1],
            SplitRule::fixed(SplitRole::CorrespondentFee, amt("12.50"))
        );
        assert_eq!(rules[2], SplitRule::remainder(SplitRole::BeneficiaryAccount));
    }
}
