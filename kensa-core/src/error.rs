use thiserror::Error;

use crate::validation::ValidationOutcome;

#[derive(Error, Debug)]
pub enum KensaError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid document: {message}")]
    InvalidDocument { message: String },

    #[error("Resource rejected with {} error(s)", .outcome.error_count())]
    Rejected { outcome: ValidationOutcome },

    #[error("Validation cancelled: {0}")]
    Cancelled(String),

    #[error("Definition error: {message}")]
    Definition { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KensaError {
    pub(crate) fn definition(message: impl Into<String>) -> Self {
        Self::Definition {
            message: message.into(),
        }
    }

    /// The outcome attached to a rejected resource, if any.
    pub fn outcome(&self) -> Option<&ValidationOutcome> {
        match self {
            Self::Rejected { outcome } => Some(outcome),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KensaError>;
