//! Error types for prism-core
//!
//! This module provides the dispatch error taxonomy and user-friendly
//! error formatting.

use crate::session::FailureKind;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Session identifier is unknown, or was reset while a task was appending
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A specialist with the same identifier was already registered
    #[error("duplicate specialist: {0}")]
    DuplicateSpecialist(String),

    /// No specialist registered under this identifier
    #[error("unknown specialist: {0}")]
    UnknownSpecialist(String),

    /// Sub-task does not satisfy the specialist's declared input shape
    #[error("invalid input for {specialist}: {message}")]
    InvalidInput {
        /// Specialist identifier
        specialist: String,
        /// What was wrong with the input
        message: String,
    },

    /// Specialist did not answer within its configured timeout
    #[error("specialist {specialist} timed out after {timeout_ms}ms")]
    SpecialistTimeout {
        /// Specialist identifier
        specialist: String,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Specialist invocation failed
    #[error("specialist {specialist} failed: {cause}")]
    SpecialistError {
        /// Specialist identifier
        specialist: String,
        /// Underlying cause, with its chain
        cause: String,
    },

    /// Step budget exhausted before the task completed
    #[error("step budget of {budget} exhausted before the task completed")]
    BudgetExhausted {
        /// Configured step budget
        budget: usize,
    },

    /// Another task holds the session lane and the lane mode rejects
    #[error("session {0} is busy with another task")]
    SessionBusy(String),

    /// Invalid configuration
    #[error("invalid configuration: {field}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Artifact store failure
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Internal error (invariant violations)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Configuration and usage errors that are surfaced to the caller
    /// immediately and never retried.
    #[must_use]
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            Error::UnknownSession(_)
                | Error::UnknownSpecialist(_)
                | Error::DuplicateSpecialist(_)
                | Error::InvalidConfig { .. }
                | Error::SessionBusy(_)
        )
    }

    /// Classify an invocation error for recording in a specialist-result turn.
    ///
    /// Returns `None` for errors that must propagate instead of being
    /// recorded.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::SpecialistTimeout { .. } => Some(FailureKind::Timeout),
            Error::SpecialistError { .. } | Error::Artifact(_) => {
                Some(FailureKind::InvocationError)
            }
            Error::InvalidInput { .. } => Some(FailureKind::InvalidInput),
            _ => None,
        }
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::UnknownSession(id) => format!("🗂️ Session '{}' does not exist.", id),
            Error::DuplicateSpecialist(id) => {
                format!("⚙️ Specialist '{}' is registered twice.", id)
            }
            Error::UnknownSpecialist(id) => format!("🔍 No specialist named '{}'.", id),
            Error::InvalidInput { specialist, message } => {
                format!("📎 {} cannot take this input: {}", specialist, message)
            }
            Error::SpecialistTimeout {
                specialist,
                timeout_ms,
            } => format!(
                "⏳ {} did not answer within {} seconds.",
                specialist,
                timeout_ms / 1000
            ),
            Error::SpecialistError { specialist, cause } => {
                format!("⚡ {} failed: {}", specialist, cause)
            }
            Error::BudgetExhausted { budget } => format!(
                "🧭 Stopped after {} steps without completing the task.",
                budget
            ),
            Error::SessionBusy(id) => {
                format!("🚦 Session '{}' is still working on a previous task.", id)
            }
            Error::InvalidConfig { field, message } => {
                format!("⚙️ Configuration error in '{}': {}", field, message)
            }
            Error::Artifact(msg) => format!("📦 Artifact error: {}", msg),
            Error::Internal(msg) => format!("❌ Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::UnknownSession(_) => {
                Some("💡 Start a new conversation or check the session id.".to_string())
            }
            Error::InvalidInput { .. } => Some(
                "💡 Attach a file for document, image and video tasks; plain questions need none."
                    .to_string(),
            ),
            Error::SpecialistTimeout { .. } => Some(
                "💡 Raise specialists.<id>.timeout_ms in config/local.toml or retry later."
                    .to_string(),
            ),
            Error::SessionBusy(_) => {
                Some("💡 Wait for the running task to finish, then resend.".to_string())
            }
            Error::InvalidConfig { field, .. } => Some(format!(
                "💡 Check the '{}' setting in config/default.toml or the PRISM_ environment.",
                field
            )),
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();

    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }

    output.push('\n');
    output
}
