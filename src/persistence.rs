//! Append-only record sinks.
//!
//! The pipeline reports banks, validated and rejected messages, review
//! outcomes and transaction splits after each stage. Nothing is read back
//! while a batch is running.

use crate::bank::Bank;
use crate::error::{PipelineError, Result};
use crate::fraud::FraudScore;
use crate::message::Message;
use crate::review::ReviewRecord;
use crate::splitter::Transaction;
use crate::validator::ValidationResult;
use csv::{Writer, WriterBuilder};
use log::debug;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// Destination for pipeline records.
pub trait RecordSink {
    fn record_bank(&mut self, bank: &Bank) -> Result<()>;

    /// Records a message after validation, with the validation outcome when it ran.
    fn record_message(
        &mut self,
        message: &Message,
        validation: Option<&ValidationResult>,
    ) -> Result<()>;

    fn record_review(
        &mut self,
        message_id: &str,
        score: &FraudScore,
        review: &ReviewRecord,
    ) -> Result<()>;

    fn record_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn record_bank(&mut self, _bank: &Bank) -> Result<()> {
        Ok(())
    }

    fn record_message(&mut self, _message: &Message, _: Option<&ValidationResult>) -> Result<()> {
        Ok(())
    }

    fn record_review(&mut self, _: &str, _: &FraudScore, _: &ReviewRecord) -> Result<()> {
        Ok(())
    }

    fn record_transaction(&mut self, _transaction: &Transaction) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct BankRow<'a> {
    bic: &'a str,
    name: &'a str,
    country: &'a str,
    risk_weight: f64,
    region: String,
}

#[derive(Serialize)]
struct MessageRow<'a> {
    id: &'a str,
    message_type: String,
    reference: &'a str,
    sender_bic: &'a str,
    receiver_bic: &'a str,
    currency: &'a str,
    amount: String,
    value_date: &'a str,
    status: String,
    iterations: u32,
    errors: String,
    warnings: String,
}

#[derive(Serialize)]
struct ReviewRow<'a> {
    message_id: &'a str,
    composite: String,
    routing: String,
    step: usize,
    role: String,
    verdict: String,
    attempts: u32,
    defaulted: bool,
    rationale: &'a str,
    disposition: String,
}

#[derive(Serialize)]
struct SplitRow<'a> {
    message_id: &'a str,
    currency: &'a str,
    total: String,
    sequence: usize,
    role: String,
    amount: String,
}

/// Appends records to `banks.csv`, `messages.csv`, `reviews.csv` and
/// `splits.csv` in one directory.
///
/// Headers are written only when a file is created or empty, so repeated
/// runs keep appending to the same tables.
pub struct CsvSink {
    banks: Writer<File>,
    messages: Writer<File>,
    reviews: Writer<File>,
    splits: Writer<File>,
}

impl CsvSink {
    pub const BANKS_FILE: &'static str = "banks.csv";
    pub const MESSAGES_FILE: &'static str = "messages.csv";
    pub const REVIEWS_FILE: &'static str = "reviews.csv";
    pub const SPLITS_FILE: &'static str = "splits.csv";

    /// Opens (creating if needed) the record files under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        debug!("Writing records to {}", dir.display());
        Ok(CsvSink {
            banks: open_table(&dir.join(Self::BANKS_FILE))?,
            messages: open_table(&dir.join(Self::MESSAGES_FILE))?,
            reviews: open_table(&dir.join(Self::REVIEWS_FILE))?,
            splits: open_table(&dir.join(Self::SPLITS_FILE))?,
        })
    }
}

fn open_table(path: &Path) -> Result<Writer<File>> {
    let has_content = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(WriterBuilder::new()
        .has_headers(!has_content)
        .from_writer(file))
}

fn sink_error(table: &str, e: csv::Error) -> PipelineError {
    PipelineError::Sink(format!("{}: {}", table, e))
}

impl RecordSink for CsvSink {
    fn record_bank(&mut self, bank: &Bank) -> Result<()> {
        self.banks
            .serialize(BankRow {
                bic: bank.bic.as_str(),
                name: &bank.name,
                country: &bank.country,
                risk_weight: bank.risk_weight,
                region: bank.region.to_string(),
            })
            .map_err(|e| sink_error(Self::BANKS_FILE, e))
    }

    fn record_message(
        &mut self,
        message: &Message,
        validation: Option<&ValidationResult>,
    ) -> Result<()> {
        self.messages
            .serialize(MessageRow {
                id: &message.id,
                message_type: message.message_type.to_string(),
                reference: &message.reference,
                sender_bic: &message.sender_bic,
                receiver_bic: &message.receiver_bic,
                currency: &message.currency,
                amount: message.amount.to_string(),
                value_date: &message.value_date,
                status: message.status().to_string(),
                iterations: validation.map_or(0, |v| v.iterations),
                errors: validation.map(|v| v.errors.join("; ")).unwrap_or_default(),
                warnings: validation
                    .map(|v| v.warnings.join("; "))
                    .unwrap_or_default(),
            })
            .map_err(|e| sink_error(Self::MESSAGES_FILE, e))
    }

    fn record_review(
        &mut self,
        message_id: &str,
        score: &FraudScore,
        review: &ReviewRecord,
    ) -> Result<()> {
        for (idx, step) in review.steps.iter().enumerate() {
            self.reviews
                .serialize(ReviewRow {
                    message_id,
                    composite: format!("{:.4}", score.composite),
                    routing: score.routing.to_string(),
                    step: idx + 1,
                    role: step.role.to_string(),
                    verdict: step.verdict.to_string(),
                    attempts: step.attempts,
                    defaulted: step.defaulted,
                    rationale: &step.rationale,
                    disposition: review.disposition.to_string(),
                })
                .map_err(|e| sink_error(Self::REVIEWS_FILE, e))?;
        }
        Ok(())
    }

    fn record_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        for (idx, split) in transaction.splits.iter().enumerate() {
            self.splits
                .serialize(SplitRow {
                    message_id: &transaction.message_id,
                    currency: &transaction.currency,
                    total: transaction.total.to_string(),
                    sequence: idx + 1,
                    role: split.role.to_string(),
                    amount: split.amount.to_string(),
                })
                .map_err(|e| sink_error(Self::SPLITS_FILE, e))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.banks.flush()?;
        self.messages.flush()?;
        self.reviews.flush()?;
        self.splits.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::bic::Bic;
    use crate::message::MessageType;
    use crate::splitter::{default_rules, TransactionSplitter};
    use std::str::FromStr;

    fn bank() -> Bank {
        Bank::new(Bic::parse("DEUTDEFF500").unwrap(), "Deutsche Bank", 0.3)
    }

    fn transaction() -> Transaction {
        let splitter = TransactionSplitter::new(default_rules(), 1).unwrap();
        splitter
            .split(Transaction::new(
                "M1",
                "USD",
                Amount::from_str("10000.00").unwrap(),
            ))
            .unwrap()
    }

    #[test]
    fn test_csv_sink_writes_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path()).unwrap();

        sink.record_bank(&bank()).unwrap();
        let message = Message::new(
            "M1",
            MessageType::Mt202,
            Amount::from_str("10000").unwrap(),
            "USD",
        );
        sink.record_message(&message, None).unwrap();
        sink.record_transaction(&transaction()).unwrap();
        sink.flush().unwrap();

        let banks = fs::read_to_string(dir.path().join(CsvSink::BANKS_FILE)).unwrap();
        assert_eq!(
            banks,
            "bic,name,country,risk_weight,region\nDEUTDEFF500,Deutsche Bank,DE,0.3,europe\n"
        );

        let messages = fs::read_to_string(dir.path().join(CsvSink::MESSAGES_FILE)).unwrap();
        assert!(messages.lines().nth(1).unwrap().contains("M1,MT202,M1"));

        let splits = fs::read_to_string(dir.path().join(CsvSink::SPLITS_FILE)).unwrap();
        let lines: Vec<&str> = splits.lines().collect();
        assert_eq!(lines[0], "message_id,currency,total,sequence,role,amount");
        assert_eq!(lines[1], "M1,USD,10000.00,1,company-fee,50.00");
        assert_eq!(lines[2], "M1,USD,10000.00,2,beneficiary-account,9950.00");
    }

    #[test]
    fn test_reopening_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let mut sink = CsvSink::open(dir.path()).unwrap();
            sink.record_bank(&bank()).unwrap();
            sink.flush().unwrap();
        }

        let banks = fs::read_to_string(dir.path().join(CsvSink::BANKS_FILE)).unwrap();
        assert_eq!(banks.lines().count(), 3);
        assert_eq!(banks.matches("bic,name").count(), 1);
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let mut sink = NullSink;
        assert!(sink.record_bank(&bank()).is_ok());
        assert!(sink.record_transaction(&transaction()).is_ok());
        assert!(sink.flush().is_ok());
    }
}
