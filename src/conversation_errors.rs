//! # Conversation Error Types Module
//!
//! Error types raised while walking a user through the receipt conversation.
//! `StepError` values are recovered locally by re-prompting the user;
//! `ServiceError` values come from collaborators and propagate to the caller.

use crate::dialogue::{InputKind, StepId};

/// Rejections of a single inbound event by the pending step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The payload failed the step's validator or is not one of the menu choices
    InvalidInputFormat { step: StepId, reason: String },
    /// The event kind does not match what the step expects
    UnexpectedEventType { step: StepId, expected: InputKind },
}

impl StepError {
    pub fn step(&self) -> StepId {
        match self {
            StepError::InvalidInputFormat { step, .. } => *step,
            StepError::UnexpectedEventType { step, .. } => *step,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::InvalidInputFormat { step, reason } => {
                write!(f, "Invalid input format at {step}: {reason}")
            }
            StepError::UnexpectedEventType { step, expected } => {
                write!(f, "Unexpected event type at {step}: expected {expected}")
            }
        }
    }
}

impl std::error::Error for StepError {}

/// Failures of the external collaborators
#[derive(Debug, Clone)]
pub enum ServiceError {
    /// Telegram could not deliver a message
    TransportDelivery(String),
    /// The record could not be appended to the spreadsheet
    RecordStore(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::TransportDelivery(msg) => write!(f, "Transport delivery failure: {msg}"),
            ServiceError::RecordStore(msg) => write!(f, "Record store failure: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<teloxide::RequestError> for ServiceError {
    fn from(err: teloxide::RequestError) -> Self {
        ServiceError::TransportDelivery(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::RecordStore(err.to_string())
    }
}
