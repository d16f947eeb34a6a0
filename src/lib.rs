//! # SWIFT Pipeline
//!
//! A concurrent, risk-aware processor for interbank payment messages.
//! Messages are validated (and corrected where possible), scored for fraud
//! risk, reviewed by a chain of specialised reviewers when the risk is high,
//! and split into settlement components once accepted.
//!
//! ## Design Principles
//!
//! - **Fixed-point arithmetic**: amounts use `rust_decimal`; splits always sum to the total
//! - **Bounded parallelism**: every stage runs on a fixed-size worker pool
//! - **Ordered results**: batch results come back in input order
//! - **Fail closed**: an inconclusive review rejects, a silent reviewer escalates
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swift_pipeline::{
//!     AmountHistory, BankDirectory, HeuristicReviewer, NullSink, Pipeline, PipelineConfig,
//! };
//! use std::io::Cursor;
//!
//! let banks = "bic,name,country,risk_weight,region\nCHASUS33XXX,Chase,US,0.2,\nDEUTDEFF500,Deutsche,DE,0.3,\n";
//! let directory = BankDirectory::from_csv(Cursor::new(banks)).unwrap();
//! let mut pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     directory,
//!     AmountHistory::default(),
//!     Arc::new(HeuristicReviewer::default()),
//!     Box::new(NullSink),
//! )
//! .unwrap();
//! let results = pipeline.run(Vec::new()).unwrap();
//! swift_pipeline::write_results(&results, std::io::stdout()).unwrap();
//! ```

pub mod amount;
pub mod bank;
pub mod batch;
pub mod benford;
pub mod bic;
pub mod config;
pub mod currency;
pub mod error;
pub mod fraud;
pub mod history;
pub mod message;
pub mod persistence;
pub mod pipeline;
pub mod review;
pub mod splitter;
pub mod validator;

pub use amount::Amount;
pub use bank::{Bank, BankDirectory, BankRecord, Region};
pub use batch::{BatchExecutor, CancelToken};
pub use bic::{Bic, BicError};
pub use config::{MediumRiskAction, PipelineConfig};
pub use error::{
    FraudScoringError, ItemError, PipelineError, Result, ReviewError, SplitError, ValidationError,
};
pub use fraud::{FraudRouter, FraudScore, RoutingClass};
pub use history::AmountHistory;
pub use message::{read_messages, Message, MessageRecord, MessageStatus, MessageType};
pub use persistence::{CsvSink, NullSink, RecordSink};
pub use pipeline::{summarize, write_results, Pipeline, PipelineResult, Summary};
pub use review::{
    Disposition, HeuristicReviewer, ReasoningClient, ReviewConversation, ReviewRecord,
    ReviewRequest, ReviewResponse, ReviewRole, ReviewStep, Verdict,
};
pub use splitter::{SplitKind, SplitRole, SplitRule, Transaction, TransactionSplit, TransactionSplitter};
pub use validator::{MessageValidator, ValidationResult};
