use thiserror::Error;

use crate::document::DocumentStatus;

pub type Result<T, E = PolicyError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Analysis service error: {0}")]
    Analysis(String),

    #[error("Chat service error: {0}")]
    Chat(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Document {0} is not ready")]
    NotReady(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("History storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    /// Message shown to the person who uploaded the document.
    ///
    /// Read failures, service failures and network failures must stay
    /// distinguishable here; each variant names its own remedy.
    pub fn user_message(&self) -> String {
        match self {
            PolicyError::Parse(detail) if detail.trim().is_empty() => {
                "The document could not be read.".to_string()
            }
            PolicyError::Parse(detail) => format!(
                "The document could not be read ({}). Check that it is not corrupted or password protected.",
                detail
            ),
            PolicyError::Io(e) => format!("The document could not be read ({}).", e),
            PolicyError::Validation(detail) => format!("Nothing to analyze: {}", detail),
            PolicyError::Analysis(detail) => format!(
                "The analysis service is unavailable: {}. Please try again later.",
                detail
            ),
            PolicyError::Chat(detail) => format!(
                "The chat service is unavailable: {}. Please try again later.",
                detail
            ),
            PolicyError::Transport(detail) => format!(
                "Network issue while contacting the service ({}). Check your connection and retry.",
                detail
            ),
            PolicyError::NotReady(_) => {
                "The document is still being processed. Wait until it is ready.".to_string()
            }
            PolicyError::InvalidTransition { .. } | PolicyError::Storage(_) => {
                format!("Internal error: {}", self)
            }
        }
    }
}

impl From<lopdf::Error> for PolicyError {
    fn from(err: lopdf::Error) -> Self {
        PolicyError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for PolicyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PolicyError::Transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            PolicyError::Transport(format!("connection failed: {}", err))
        } else {
            PolicyError::Transport(err.to_string())
        }
    }
}

impl From<sqlx::Error> for PolicyError {
    fn from(err: sqlx::Error) -> Self {
        PolicyError::Storage(err.to_string())
    }
}
