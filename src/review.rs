//! Multi-step review of high-risk messages.
//!
//! Five reviewer roles look at a message in a fixed order. Every step sees the
//! message, its fraud score and all verdicts given so far, and answers with a
//! single [`Verdict`]. The decisions themselves come from a
//! [`ReasoningClient`]; the conversation owns timeouts and retries, and any
//! step that cannot obtain an answer defaults to [`Verdict::Escalate`].
//!
//! Chain control:
//!
//! - `Approve` / `Reject` end the chain immediately, unless an earlier step
//!   escalated.
//! - `Escalate` forces every remaining step to run; the Final Reviewer's
//!   verdict then decides.
//! - A chain that ends on anything other than `Approve` or `Reject` is
//!   rejected.

use crate::bank::is_high_risk_country;
use crate::batch::CancelToken;
use crate::bic;
use crate::config::ReviewConfig;
use crate::error::ReviewError;
use crate::fraud::FraudScore;
use crate::message::Message;
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

/// Reviewer roles in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRole {
    Screener,
    TechnicalAnalyst,
    RiskAssessor,
    ComplianceOfficer,
    FinalReviewer,
}

impl ReviewRole {
    /// The chain, first step first.
    pub const CHAIN: [ReviewRole; 5] = [
        ReviewRole::Screener,
        ReviewRole::TechnicalAnalyst,
        ReviewRole::RiskAssessor,
        ReviewRole::ComplianceOfficer,
        ReviewRole::FinalReviewer,
    ];
}

impl fmt::Display for ReviewRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReviewRole::Screener => "Screener",
            ReviewRole::TechnicalAnalyst => "Technical Analyst",
            ReviewRole::RiskAssessor => "Risk Assessor",
            ReviewRole::ComplianceOfficer => "Compliance Officer",
            ReviewRole::FinalReviewer => "Final Reviewer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Continue,
    Escalate,
    Reject,
    Approve,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Continue => "CONTINUE",
            Verdict::Escalate => "ESCALATE",
            Verdict::Reject => "REJECT",
            Verdict::Approve => "APPROVE",
        };
        f.write_str(name)
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CONTINUE" => Ok(Verdict::Continue),
            "ESCALATE" => Ok(Verdict::Escalate),
            "REJECT" => Ok(Verdict::Reject),
            "APPROVE" => Ok(Verdict::Approve),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// Final outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Approve,
    Reject,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Approve => f.write_str("APPROVE"),
            Disposition::Reject => f.write_str("REJECT"),
        }
    }
}

/// One reviewer's answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewStep {
    pub role: ReviewRole,
    pub verdict: Verdict,
    pub rationale: String,
    /// Calls made to the collaborator for this step.
    pub attempts: u32,
    /// `true` when no answer was obtained and the verdict fell back to Escalate.
    pub defaulted: bool,
}

/// Full trail of a review conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRecord {
    pub message_id: String,
    pub steps: Vec<ReviewStep>,
    pub disposition: Disposition,
    pub escalated: bool,
}

impl ReviewRecord {
    pub fn is_approved(&self) -> bool {
        self.disposition == Disposition::Approve
    }

    /// Rationale of the step that decided the outcome.
    pub fn deciding_rationale(&self) -> Option<&str> {
        self.steps.last().map(|s| s.rationale.as_str())
    }
}

/// What a reviewer is asked.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub role: ReviewRole,
    pub message: Message,
    pub score: FraudScore,
    /// Steps taken so far, in order.
    pub history: Vec<ReviewStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewResponse {
    pub verdict: Verdict,
    pub rationale: String,
}

impl ReviewResponse {
    pub fn new(verdict: Verdict, rationale: impl Into<String>) -> Self {
        ReviewResponse {
            verdict,
            rationale: rationale.into(),
        }
    }
}

/// Source of review decisions.
///
/// Implementations may block, fail or answer inconsistently; the caller bounds
/// every call with a timeout and retries transient failures.
pub trait ReasoningClient: Send + Sync {
    fn consult(&self, request: &ReviewRequest) -> Result<ReviewResponse, ReviewError>;
}

/// Runs the review chain for one message at a time.
pub struct ReviewConversation {
    config: ReviewConfig,
    client: Arc<dyn ReasoningClient>,
}

impl ReviewConversation {
    pub fn new(config: ReviewConfig, client: Arc<dyn ReasoningClient>) -> Self {
        ReviewConversation { config, client }
    }

    /// Runs the chain for `message` and returns its record.
    pub fn review(&self, message: &Message, score: &FraudScore) -> ReviewRecord {
        self.review_cancellable(message, score, &CancelToken::new())
    }

    /// Runs the chain, stopping before the next step or retry once `cancel`
    /// is set. A chain cut short this way is rejected.
    pub fn review_cancellable(
        &self,
        message: &Message,
        score: &FraudScore,
        cancel: &CancelToken,
    ) -> ReviewRecord {
        let mut steps: Vec<ReviewStep> = Vec::with_capacity(ReviewRole::CHAIN.len());
        let mut escalated = false;

        for role in ReviewRole::CHAIN {
            if cancel.is_cancelled() {
                debug!(
                    "Message {}: review cancelled before {}",
                    message.id, role
                );
                break;
            }
            let step = self.run_step(role, message, score, &steps, cancel);
            let verdict = step.verdict;
            debug!(
                "Message {}: {} -> {} ({})",
                message.id, role, verdict, step.rationale
            );
            steps.push(step);

            match verdict {
                Verdict::Escalate if !escalated => {
                    debug!("Message {}: escalated by {}", message.id, role);
                    escalated = true;
                }
                Verdict::Approve | Verdict::Reject if !escalated => {
                    let disposition = if verdict == Verdict::Approve {
                        Disposition::Approve
                    } else {
                        Disposition::Reject
                    };
                    return ReviewRecord {
                        message_id: message.id.clone(),
                        steps,
                        disposition,
                        escalated,
                    };
                }
                _ => {}
            }
        }

        // Only the Final Reviewer can approve a chain that ran to the end.
        let completed = steps.len() == ReviewRole::CHAIN.len();
        let disposition = match steps.last().map(|s| s.verdict) {
            Some(Verdict::Approve) if completed => Disposition::Approve,
            _ => Disposition::Reject,
        };
        ReviewRecord {
            message_id: message.id.clone(),
            steps,
            disposition,
            escalated,
        }
    }

    fn run_step(
        &self,
        role: ReviewRole,
        message: &Message,
        score: &FraudScore,
        history: &[ReviewStep],
        cancel: &CancelToken,
    ) -> ReviewStep {
        let request = Arc::new(ReviewRequest {
            role,
            message: message.clone(),
            score: score.clone(),
            history: history.to_vec(),
        });

        let max_attempts = self.config.max_retries + 1;
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            if attempts > 0 && cancel.is_cancelled() {
                break;
            }
            attempts += 1;
            match self.call(&request) {
                Ok(response) => {
                    return ReviewStep {
                        role,
                        verdict: response.verdict,
                        rationale: response.rationale,
                        attempts,
                        defaulted: false,
                    }
                }
                Err(e) => {
                    warn!(
                        "Message {}: {} attempt {}/{} failed: {}",
                        message.id, role, attempts, max_attempts, e
                    );
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempts < max_attempts {
                        thread::sleep(self.config.backoff() * attempts);
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        ReviewStep {
            role,
            verdict: Verdict::Escalate,
            rationale: format!("no verdict obtained, escalating: {}", reason),
            attempts,
            defaulted: true,
        }
    }

    /// One collaborator call, bounded by the step timeout.
    ///
    /// The call runs on its own thread; a late answer is dropped.
    fn call(&self, request: &Arc<ReviewRequest>) -> Result<ReviewResponse, ReviewError> {
        let (tx, rx) = bounded(1);
        let client = Arc::clone(&self.client);
        let shared = Arc::clone(request);
        let role = request.role;

        thread::Builder::new()
            .name("review-call".to_string())
            .spawn(move || {
                let result = client.consult(&shared);
                if tx.send(result).is_err() {
                    debug!("Discarding late {} response", shared.role);
                }
            })
            .map_err(|e| ReviewError::Dispatch(e.to_string()))?;

        match rx.recv_timeout(self.config.timeout()) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ReviewError::Timeout {
                role,
                timeout_ms: self.config.timeout_ms,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ReviewError::Dispatch(format!(
                "{} call ended without a response",
                role
            ))),
        }
    }
}

/// Deterministic rule-based reviewer.
///
/// Stands in for a language-model backend: each role looks at the part of the
/// fraud score it is responsible for.
#[derive(Debug, Clone)]
pub struct HeuristicReviewer {
    /// Composite at or above which the Screener escalates.
    pub escalation_score: f64,
    /// Composite below which the Final Reviewer may approve.
    pub approval_ceiling: f64,
}

impl Default for HeuristicReviewer {
    fn default() -> Self {
        HeuristicReviewer {
            escalation_score: 0.9,
            approval_ceiling: 0.85,
        }
    }
}

impl ReasoningClient for HeuristicReviewer {
    fn consult(&self, request: &ReviewRequest) -> Result<ReviewResponse, ReviewError> {
        let score = &request.score;
        let message = &request.message;

        let response = match request.role {
            ReviewRole::Screener if score.composite >= self.escalation_score => {
                ReviewResponse::new(
                    Verdict::Escalate,
                    format!("composite {:.2} needs every reviewer", score.composite),
                )
            }
            ReviewRole::TechnicalAnalyst if score.amount_pattern >= 0.5 => ReviewResponse::new(
                Verdict::Escalate,
                format!("amount pattern score {:.2}", score.amount_pattern),
            ),
            ReviewRole::RiskAssessor if score.rules_triggered >= 3 => ReviewResponse::new(
                Verdict::Reject,
                format!("{} risk rules triggered", score.rules_triggered),
            ),
            ReviewRole::RiskAssessor
                if score.digit_anomaly < 0.5 && score.rules_triggered <= 1 =>
            {
                ReviewResponse::new(
                    Verdict::Approve,
                    "amount history and rules show no material risk",
                )
            }
            ReviewRole::ComplianceOfficer => {
                let sanctioned: Vec<String> = [&message.sender_bic, &message.receiver_bic]
                    .into_iter()
                    .filter_map(|code| bic::country_of(code))
                    .map(str::to_ascii_uppercase)
                    .filter(|c| is_high_risk_country(c))
                    .collect();
                if sanctioned.is_empty() {
                    ReviewResponse::new(Verdict::Continue, "no jurisdiction concerns")
                } else {
                    ReviewResponse::new(
                        Verdict::Reject,
                        format!("high-risk jurisdiction {}", sanctioned.join("/")),
                    )
                }
            }
            ReviewRole::FinalReviewer => {
                let prior_reject = request
                    .history
                    .iter()
                    .any(|s| s.verdict == Verdict::Reject);
                if score.composite < self.approval_ceiling && !prior_reject {
                    ReviewResponse::new(
                        Verdict::Approve,
                        format!("composite {:.2} acceptable after review", score.composite),
                    )
                } else {
                    ReviewResponse::new(Verdict::Reject, "risk not mitigated by review")
                }
            }
            role => ReviewResponse::new(Verdict::Continue, format!("{} found nothing decisive", role)),
        };
        Ok(response)
    }
}
