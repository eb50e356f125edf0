//! Error types for meditation operations.
//!
//! Core modules return these; only the CLI decides how a failure is shown.

use crate::timer::TimerPhase;

/// Failures talking to the hosted backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("could not decode response from {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid requests to the session timer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("duration must be a positive number of seconds")]
    InvalidDuration,

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: TimerPhase,
        action: &'static str,
    },
}

/// All errors surfaced by the meditation core.
#[derive(Debug, thiserror::Error)]
pub enum MindfulError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl MindfulError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MindfulError>;
