//! Payment message models for CSV parsing and internal representation.

use crate::amount::Amount;
use crate::error::Result;
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// SWIFT message categories handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Single customer credit transfer (wire).
    #[serde(rename = "MT103")]
    Mt103,

    /// General financial institution transfer.
    #[serde(rename = "MT202")]
    Mt202,

    /// Cover payment for an underlying customer transfer.
    #[serde(rename = "MT202COV")]
    Mt202Cov,
}

impl MessageType {
    /// Returns `true` for message types that carry customer data.
    pub fn is_customer_transfer(&self) -> bool {
        matches!(self, MessageType::Mt103 | MessageType::Mt202Cov)
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(' ', "").as_str() {
            "MT103" => Ok(MessageType::Mt103),
            "MT202" => Ok(MessageType::Mt202),
            "MT202COV" => Ok(MessageType::Mt202Cov),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Mt103 => "MT103",
            MessageType::Mt202 => "MT202",
            MessageType::Mt202Cov => "MT202COV",
        };
        f.write_str(name)
    }
}

/// Processing status of a message.
///
/// Transitions only move forward through the pipeline:
///
/// ```text
/// Pending ─► Valid ─► Approved
///    │         ├────► Flagged ─► Approved | Rejected
///    │         └────► Rejected
///    ├───► Invalid
///    └───► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Valid,
    Invalid,
    Flagged,
    Approved,
    Rejected,
}

impl MessageStatus {
    /// Returns `true` if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Invalid | MessageStatus::Approved | MessageStatus::Rejected
        )
    }

    /// Returns `true` if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Valid)
                | (Pending, Invalid)
                | (Pending, Rejected)
                | (Valid, Approved)
                | (Valid, Flagged)
                | (Valid, Rejected)
                | (Flagged, Approved)
                | (Flagged, Rejected)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Valid => "VALID",
            MessageStatus::Invalid => "INVALID",
            MessageStatus::Flagged => "FLAGGED",
            MessageStatus::Approved => "APPROVED",
            MessageStatus::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// An interbank payment message.
///
/// Party codes are kept as received so validation can report and correct
/// malformed values; use [`crate::Bic::parse`] for a structured view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    /// Sender's reference (field 20).
    pub reference: String,
    pub sender_bic: String,
    pub receiver_bic: String,
    pub currency: String,
    pub amount: Amount,
    /// Value date as `YYMMDD`.
    pub value_date: String,
    pub ordering_customer: Option<String>,
    pub beneficiary: Option<String>,
    /// Free-text remittance information (field 70).
    pub remittance_info: Option<String>,
    status: MessageStatus,
}

impl Message {
    /// Creates a pending message with empty party and date fields.
    pub fn new(
        id: impl Into<String>,
        message_type: MessageType,
        amount: Amount,
        currency: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Message {
            reference: id.clone(),
            id,
            message_type,
            sender_bic: String::new(),
            receiver_bic: String::new(),
            currency: currency.into(),
            amount,
            value_date: String::new(),
            ordering_customer: None,
            beneficiary: None,
            remittance_info: None,
            status: MessageStatus::Pending,
        }
    }

    pub fn with_parties(mut self, sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        self.sender_bic = sender.into();
        self.receiver_bic = receiver.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_value_date(mut self, value_date: impl Into<String>) -> Self {
        self.value_date = value_date.into();
        self
    }

    pub fn with_customers(
        mut self,
        ordering_customer: impl Into<String>,
        beneficiary: impl Into<String>,
    ) -> Self {
        self.ordering_customer = Some(ordering_customer.into());
        self.beneficiary = Some(beneficiary.into());
        self
    }

    pub fn with_remittance(mut self, remittance: impl Into<String>) -> Self {
        self.remittance_info = Some(remittance.into());
        self
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// Moves the message to `next`.
    ///
    /// Returns `false` and leaves the status unchanged if the transition
    /// would move backwards or out of a terminal state.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Raw message record as read from CSV.
///
/// Uses string-based fields so that malformed values reach validation
/// instead of failing deserialization.
#[derive(Debug, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub message_type: String,
    pub reference: Option<String>,
    pub amount: String,
    pub currency: String,
    pub sender_bic: String,
    pub receiver_bic: String,
    pub value_date: String,
    pub ordering_customer: Option<String>,
    pub beneficiary: Option<String>,
    pub remittance_info: Option<String>,
}

impl MessageRecord {
    /// Parses the raw CSV record into a pending message.
    ///
    /// Only structural problems (unknown type, unparseable amount, missing id)
    /// fail here; format problems are left for validation.
    pub fn parse(&self) -> std::result::Result<Message, String> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err("message id is empty".to_string());
        }

        let message_type = MessageType::from_str(&self.message_type)?;
        let amount = Amount::from_str(&self.amount)
            .map_err(|e| format!("invalid amount '{}': {}", self.amount.trim(), e))?;

        let optional = |field: &Option<String>| {
            field
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };

        Ok(Message {
            id: id.to_string(),
            message_type,
            reference: self.reference.clone().unwrap_or_default(),
            sender_bic: self.sender_bic.clone(),
            receiver_bic: self.receiver_bic.clone(),
            currency: self.currency.clone(),
            amount,
            value_date: self.value_date.clone(),
            ordering_customer: optional(&self.ordering_customer),
            beneficiary: optional(&self.beneficiary),
            remittance_info: optional(&self.remittance_info),
            status: MessageStatus::Pending,
        })
    }
}

/// Reads messages from CSV.
///
/// Rows that fail to parse, and repeated message ids, are logged at warn
/// level and skipped.
pub fn read_messages<R: Read>(reader: R) -> Result<Vec<Message>> {
    let mut csv_reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut messages = Vec::new();
    let mut seen = HashSet::new();
    for (row_idx, result) in csv_reader.deserialize::<MessageRecord>().enumerate() {
        let row_num = row_idx + 2; // 1-indexed, accounting for header row

        match result {
            Ok(record) => match record.parse() {
                Ok(message) => {
                    if seen.insert(message.id.clone()) {
                        messages.push(message);
                    } else {
                        warn!("Row {}: Duplicate message id {}, ignoring", row_num, message.id);
                    }
                }
                Err(e) => warn!("Row {}: Invalid message record: {}", row_num, e),
            },
            Err(e) => warn!("Row {}: CSV parse error: {}", row_num, e),
        }
    }

    debug!("Read {} messages", messages.len());
    Ok(messages)
}
