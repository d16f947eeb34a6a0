//! First-digit (Benford's law) analysis of amount populations.

use crate::amount::Amount;
use crate::error::FraudScoringError;

/// Score used when the population is too small to test.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Expected frequency of leading digit `d` (1..=9): `log10(1 + 1/d)`.
pub fn expected_frequency(digit: u8) -> f64 {
    (1.0 + 1.0 / f64::from(digit)).log10()
}

/// Leading-digit counts, index 0 holding digit 1. Zero amounts are skipped.
pub fn digit_counts(amounts: &[Amount]) -> [u64; 9] {
    let mut counts = [0u64; 9];
    for digit in amounts.iter().filter_map(Amount::leading_digit) {
        counts[usize::from(digit - 1)] += 1;
    }
    counts
}

/// Pearson chi-square statistic of observed counts against the Benford distribution.
pub fn chi_square(counts: &[u64; 9]) -> f64 {
    let n: u64 = counts.iter().sum();
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    counts
        .iter()
        .zip(1u8..=9)
        .map(|(&observed, digit)| {
            let expected = n * expected_frequency(digit);
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

/// Result of a first-digit test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitAnalysis {
    pub population: usize,
    pub chi_square: f64,
    /// Anomaly score in `[0, 1]`; higher is more anomalous.
    pub score: f64,
}

/// Runs the first-digit test over `amounts`.
///
/// The statistic is divided by the population size so the score measures
/// the shape of the distribution rather than its size, then mapped to
/// `[0, 1)` with `1 - exp(-x / sensitivity)`.
pub fn analyze(
    amounts: &[Amount],
    min_population: usize,
    sensitivity: f64,
) -> Result<DigitAnalysis, FraudScoringError> {
    let counts = digit_counts(amounts);
    let population = counts.iter().sum::<u64>() as usize;
    if population < min_population || population == 0 {
        return Err(FraudScoringError::InsufficientPopulation {
            required: min_population,
            actual: population,
        });
    }

    let statistic = chi_square(&counts);
    let score = 1.0 - (-(statistic / population as f64) / sensitivity).exp();
    Ok(DigitAnalysis {
        population,
        chi_square: statistic,
        score: score.clamp(0.0, 1.0),
    })
}
