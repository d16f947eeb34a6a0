//! Recent-amount population per sender bank.

use crate::amount::Amount;
use crate::bank::BankDirectory;
use crate::error::Result;
use crate::message::MessageStatus;
use crate::persistence::CsvSink;
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// Message row as written by [`CsvSink`]; only the fields history needs.
#[derive(Debug, Deserialize)]
struct StoredMessage {
    sender_bic: String,
    amount: String,
    status: String,
    iterations: u32,
    errors: Option<String>,
}

impl StoredMessage {
    /// Final-status rows of messages that passed validation were scored.
    fn was_scored(&self) -> bool {
        let terminal = self.status == MessageStatus::Approved.to_string()
            || self.status == MessageStatus::Rejected.to_string();
        terminal && self.iterations > 0 && self.errors.as_deref().unwrap_or("").is_empty()
    }
}

/// History key of a sender: its 11-character BIC when the directory knows it.
pub fn sender_key(directory: &BankDirectory, sender_bic: &str) -> String {
    directory
        .get(sender_bic)
        .map(|bank| bank.bic.to_full().to_string())
        .unwrap_or_else(|| sender_bic.to_string())
}

/// Bounded history of recent amounts, keyed by sender BIC.
///
/// Read-only while a batch is scored; only the pipeline appends to it, after
/// the batch has completed.
#[derive(Debug, Clone)]
pub struct AmountHistory {
    capacity: usize,
    by_sender: HashMap<String, VecDeque<Amount>>,
}

impl AmountHistory {
    pub fn new(capacity: usize) -> Self {
        AmountHistory {
            capacity: capacity.max(1),
            by_sender: HashMap::new(),
        }
    }

    /// Appends an amount, dropping the oldest one once the sender is at capacity.
    pub fn record(&mut self, sender_bic: &str, amount: Amount) {
        let capacity = self.capacity;
        let amounts = self
            .by_sender
            .entry(sender_bic.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity.min(64)));
        if amounts.len() == capacity {
            amounts.pop_front();
        }
        amounts.push_back(amount);
    }

    pub fn extend(&mut self, sender_bic: &str, amounts: impl IntoIterator<Item = Amount>) {
        for amount in amounts {
            self.record(sender_bic, amount);
        }
    }

    /// Recent amounts for a sender, oldest first.
    pub fn population(&self, sender_bic: &str) -> Vec<Amount> {
        self.by_sender
            .get(sender_bic)
            .map(|amounts| amounts.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, sender_bic: &str) -> usize {
        self.by_sender.get(sender_bic).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_sender.values().all(VecDeque::is_empty)
    }

    /// Seeds a history from the `messages.csv` table a [`CsvSink`] wrote to
    /// `dir` on earlier runs. A missing table gives an empty history.
    ///
    /// Rows are replayed in file order, so the newest amounts survive when a
    /// sender has more than `capacity` of them. Unreadable rows are logged at
    /// warn level and skipped.
    pub fn from_records(dir: &Path, directory: &BankDirectory, capacity: usize) -> Result<Self> {
        let mut history = Self::new(capacity);
        let path = dir.join(CsvSink::MESSAGES_FILE);
        if !path.exists() {
            debug!("No message records at {}, starting empty", path.display());
            return Ok(history);
        }

        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(File::open(&path)?);

        let mut loaded = 0;
        for (row_idx, result) in csv_reader.deserialize::<StoredMessage>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            match result {
                Ok(row) if row.was_scored() => match Amount::from_str(&row.amount) {
                    Ok(amount) => {
                        history.record(&sender_key(directory, &row.sender_bic), amount);
                        loaded += 1;
                    }
                    Err(e) => warn!(
                        "Row {}: Invalid stored amount '{}': {}",
                        row_num, row.amount, e
                    ),
                },
                Ok(_) => {}
                Err(e) => warn!("Row {}: CSV parse error: {}", row_num, e),
            }
        }

        debug!("Seeded history with {} amounts from {}", loaded, path.display());
        Ok(history)
    }
}

impl Default for AmountHistory {
    fn default() -> Self {
        Self::new(500)
    }
}
