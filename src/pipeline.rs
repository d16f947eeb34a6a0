//! Pipeline composition.
//!
//! A batch moves through four stages, each run on the batch executor:
//!
//! 1. validate (and correct) every message
//! 2. score valid messages and route them
//! 3. review flagged messages
//! 4. split cleared messages into settlement components
//!
//! Every message ends in exactly one terminal status. Failures of a single
//! message stay on that message's result; only pipeline-level problems (an
//! empty bank directory, a failing record sink) abort the batch.

use crate::amount::Amount;
use crate::bank::BankDirectory;
use crate::batch::{BatchExecutor, CancelToken};
use crate::config::{MediumRiskAction, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::fraud::{FraudRouter, FraudScore, RoutingClass};
use crate::history::{sender_key, AmountHistory};
use crate::message::{Message, MessageStatus};
use crate::persistence::RecordSink;
use crate::review::{ReasoningClient, ReviewConversation, ReviewRecord};
use crate::splitter::{Transaction, TransactionSplitter};
use crate::validator::{MessageValidator, ValidationResult};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Everything the pipeline learned about one message.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The message as processed (corrected, if validation corrected it).
    pub message: Message,
    pub validation: Option<ValidationResult>,
    pub score: Option<FraudScore>,
    pub review: Option<ReviewRecord>,
    pub transaction: Option<Transaction>,
    /// Human-readable error trail, oldest first.
    pub errors: Vec<String>,
}

impl PipelineResult {
    fn new(message: Message) -> Self {
        PipelineResult {
            message,
            validation: None,
            score: None,
            review: None,
            transaction: None,
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> MessageStatus {
        self.message.status()
    }

    fn advance(&mut self, next: MessageStatus) {
        let from = self.message.status();
        if !self.message.advance(next) {
            warn!(
                "Message {}: ignoring status change {} -> {}",
                self.message.id, from, next
            );
        }
    }

    fn reject(&mut self, error: String) {
        warn!("Message {}: {}", self.message.id, error);
        self.errors.push(error);
        self.advance(MessageStatus::Rejected);
    }
}

/// Batch totals: messages per terminal status, routing class and review
/// disposition, plus the settled amount.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub statuses: BTreeMap<String, usize>,
    /// Scored messages only.
    pub routing: BTreeMap<String, usize>,
    /// Reviewed messages only.
    pub dispositions: BTreeMap<String, usize>,
    /// Mean composite of the scored messages, `None` if none was scored.
    pub mean_composite: Option<f64>,
    pub settled: Amount,
}

impl Summary {
    /// Messages summarized.
    pub fn total(&self) -> usize {
        self.statuses.values().sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |counts: &BTreeMap<String, usize>| {
            counts
                .iter()
                .map(|(key, count)| format!("{} {}", count, key))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "{}", join(&self.statuses))?;
        if !self.routing.is_empty() {
            write!(f, "; routing {}", join(&self.routing))?;
        }
        if let Some(mean) = self.mean_composite {
            write!(f, "; mean composite {:.3}", mean)?;
        }
        if !self.dispositions.is_empty() {
            write!(f, "; review {}", join(&self.dispositions))?;
        }
        write!(f, "; settled {}", self.settled)
    }
}

/// Validate -> route -> review -> split.
pub struct Pipeline {
    config: PipelineConfig,
    directory: Arc<BankDirectory>,
    history: Arc<AmountHistory>,
    executor: BatchExecutor,
    validator: Arc<MessageValidator>,
    router: Arc<FraudRouter>,
    conversation: Arc<ReviewConversation>,
    splitter: Arc<TransactionSplitter>,
    sink: Box<dyn RecordSink>,
    banks_recorded: bool,
}

impl Pipeline {
    /// Builds a pipeline, checking the configuration first.
    pub fn new(
        config: PipelineConfig,
        directory: BankDirectory,
        history: AmountHistory,
        reviewer: Arc<dyn ReasoningClient>,
        sink: Box<dyn RecordSink>,
    ) -> Result<Self> {
        config.validate()?;
        let directory = Arc::new(directory);
        let splitter = TransactionSplitter::from_config(&config.split)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        let validator = MessageValidator::new(config.validation.clone());
        let router = FraudRouter::new(config.fraud.clone(), Arc::clone(&directory))
            .with_reference_date(validator.reference_date());

        Ok(Pipeline {
            executor: BatchExecutor::new(&config.batch),
            validator: Arc::new(validator),
            router: Arc::new(router),
            conversation: Arc::new(ReviewConversation::new(config.review.clone(), reviewer)),
            splitter: Arc::new(splitter),
            history: Arc::new(history),
            directory,
            config,
            sink,
            banks_recorded: false,
        })
    }

    pub fn directory(&self) -> &BankDirectory {
        &self.directory
    }

    pub fn history(&self) -> &AmountHistory {
        &self.history
    }

    /// Runs a batch of messages through every stage.
    ///
    /// Results are returned in input order.
    pub fn run(&mut self, messages: Vec<Message>) -> Result<Vec<PipelineResult>> {
        if self.directory.is_empty() {
            return Err(PipelineError::EmptyBankDirectory);
        }
        if !self.banks_recorded {
            for bank in self.directory.banks() {
                self.sink.record_bank(bank)?;
            }
            self.banks_recorded = true;
        }

        info!("Processing batch of {} messages", messages.len());
        let mut results = self.validate_stage(messages)?;
        self.scoring_stage(&mut results);
        self.review_stage(&mut results)?;
        self.split_stage(&mut results)?;

        for result in results.iter().filter(|r| r.validation.as_ref().is_some_and(|v| v.passed)) {
            self.sink
                .record_message(&result.message, result.validation.as_ref())?;
        }
        self.sink.flush()?;
        self.update_history(&results);

        info!("Batch complete: {}", summarize(&results));
        Ok(results)
    }

    fn validate_stage(&mut self, messages: Vec<Message>) -> Result<Vec<PipelineResult>> {
        let validator = Arc::clone(&self.validator);
        let directory = Arc::clone(&self.directory);
        let outcomes = self.executor.run(messages.clone(), move |message: Message| {
            Ok::<_, Infallible>(validator.validate(&message, &directory))
        });

        let mut results = Vec::with_capacity(outcomes.len());
        for (message, outcome) in messages.into_iter().zip(outcomes) {
            let mut result = PipelineResult::new(message);
            match outcome {
                Ok(validation) => {
                    if let Some(corrected) = &validation.corrected {
                        result.message = corrected.clone();
                    }
                    if let Some(error) = validation.to_error(&result.message.id) {
                        warn!("Message {}: {}", result.message.id, error);
                        result.errors.push(error.to_string());
                        result.advance(MessageStatus::Invalid);
                    } else {
                        debug!(
                            "Message {}: valid after {} iteration(s)",
                            result.message.id, validation.iterations
                        );
                        result.advance(MessageStatus::Valid);
                    }
                    result.validation = Some(validation);
                }
                Err(e) => result.reject(format!("validation: {}", e)),
            }
            self.sink
                .record_message(&result.message, result.validation.as_ref())?;
            results.push(result);
        }
        Ok(results)
    }

    fn scoring_stage(&mut self, results: &mut [PipelineResult]) {
        let indices: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status() == MessageStatus::Valid)
            .map(|(idx, _)| idx)
            .collect();
        let items: Vec<Message> = indices.iter().map(|&i| results[i].message.clone()).collect();

        let router = Arc::clone(&self.router);
        let history = Arc::clone(&self.history);
        let directory = Arc::clone(&self.directory);
        let scores = self.executor.run(items, move |message: Message| {
            let population = history.population(&sender_key(&directory, &message.sender_bic));
            Ok::<_, Infallible>(router.score(&message, &population))
        });

        for (idx, outcome) in indices.into_iter().zip(scores) {
            let result = &mut results[idx];
            match outcome {
                Ok(score) => {
                    let needs_review = match score.routing {
                        RoutingClass::High => true,
                        RoutingClass::Medium => self.config.medium_risk == MediumRiskAction::Review,
                        RoutingClass::Low => false,
                    };
                    if needs_review {
                        result.advance(MessageStatus::Flagged);
                    }
                    result.score = Some(score);
                }
                Err(e) => result.reject(format!("fraud scoring: {}", e)),
            }
        }
    }

    fn review_stage(&mut self, results: &mut [PipelineResult]) -> Result<()> {
        let mut indices = Vec::new();
        let mut items = Vec::new();
        for (idx, result) in results.iter().enumerate() {
            if result.status() != MessageStatus::Flagged {
                continue;
            }
            if let Some(score) = &result.score {
                indices.push(idx);
                items.push((result.message.clone(), score.clone()));
            }
        }
        if items.is_empty() {
            return Ok(());
        }
        debug!("Reviewing {} flagged messages", items.len());

        let conversation = Arc::clone(&self.conversation);
        let records = self.executor.run_cancellable(
            items,
            move |(message, score): (Message, FraudScore), cancel: &CancelToken| {
                Ok::<_, Infallible>(conversation.review_cancellable(&message, &score, cancel))
            },
        );

        for (idx, outcome) in indices.into_iter().zip(records) {
            let result = &mut results[idx];
            match outcome {
                Ok(record) => {
                    if let Some(score) = &result.score {
                        self.sink
                            .record_review(&result.message.id, score, &record)?;
                    }
                    if !record.is_approved() {
                        let rationale = record.deciding_rationale().unwrap_or("no rationale");
                        result.reject(format!("review rejected: {}", rationale));
                    }
                    result.review = Some(record);
                }
                Err(e) => result.reject(format!("review: {}", e)),
            }
        }
        Ok(())
    }

    fn split_stage(&mut self, results: &mut [PipelineResult]) -> Result<()> {
        let indices: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.status().is_terminal())
            .map(|(idx, _)| idx)
            .collect();
        let items: Vec<Transaction> = indices
            .iter()
            .map(|&i| {
                let message = &results[i].message;
                Transaction::new(message.id.clone(), message.currency.clone(), message.amount)
            })
            .collect();

        let splitter = Arc::clone(&self.splitter);
        let transactions = self
            .executor
            .run(items, move |transaction: Transaction| splitter.split(transaction));

        for (idx, outcome) in indices.into_iter().zip(transactions) {
            let result = &mut results[idx];
            match outcome {
                Ok(transaction) => {
                    self.sink.record_transaction(&transaction)?;
                    result.transaction = Some(transaction);
                    result.advance(MessageStatus::Approved);
                }
                Err(e) => result.reject(format!("split: {}", e)),
            }
        }
        Ok(())
    }

    /// Appends scored amounts to the sender histories once the batch is done.
    fn update_history(&mut self, results: &[PipelineResult]) {
        let history = Arc::make_mut(&mut self.history);
        let mut appended = 0;
        for result in results.iter().filter(|r| r.score.is_some()) {
            history.record(
                &sender_key(&self.directory, &result.message.sender_bic),
                result.message.amount,
            );
            appended += 1;
        }
        debug!("Appended {} amounts to sender history", appended);
    }
}

/// Tallies a batch's results.
pub fn summarize(results: &[PipelineResult]) -> Summary {
    let mut summary = Summary::default();
    let mut composite_sum = 0.0;
    let mut scored = 0;
    for result in results {
        *summary.statuses.entry(result.status().to_string()).or_insert(0) += 1;
        if let Some(score) = &result.score {
            *summary.routing.entry(score.routing.to_string()).or_insert(0) += 1;
            composite_sum += score.composite;
            scored += 1;
        }
        if let Some(review) = &result.review {
            *summary
                .dispositions
                .entry(review.disposition.to_string())
                .or_insert(0) += 1;
        }
    }
    if scored > 0 {
        summary.mean_composite = Some(composite_sum / scored as f64);
    }
    summary.settled = settled_total(results);
    summary
}

/// Writes one report row per result.
pub fn write_results<W: Write>(results: &[PipelineResult], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "id",
        "status",
        "composite",
        "routing",
        "disposition",
        "splits",
        "errors",
    ])?;

    for result in results {
        let composite = result
            .score
            .as_ref()
            .map(|s| format!("{:.4}", s.composite))
            .unwrap_or_default();
        let routing = result
            .score
            .as_ref()
            .map(|s| s.routing.to_string())
            .unwrap_or_default();
        let disposition = result
            .review
            .as_ref()
            .map(|r| r.disposition.to_string())
            .unwrap_or_default();
        let splits = result
            .transaction
            .as_ref()
            .map(|t| {
                t.splits
                    .iter()
                    .map(|s| format!("{}:{}", s.role, s.amount))
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .unwrap_or_default();

        csv_writer.write_record([
            result.message.id.clone(),
            result.status().to_string(),
            composite,
            routing,
            disposition,
            splits,
            result.errors.join("; "),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Total amount of a set of results that reached settlement.
pub fn settled_total(results: &[PipelineResult]) -> Amount {
    results
        .iter()
        .filter_map(|r| r.transaction.as_ref())
        .map(|t| t.total)
        .sum()
}
