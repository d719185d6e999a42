//! Error types for the progression engine
//!
//! Store failures are converted into [`ProgressionError`] at the component
//! boundary; the caller decides how each category is presented.

use thiserror::Error;

use crate::quiz::QuizError;

/// Errors raised by a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached or the call failed midway
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Insert rejected by a uniqueness constraint
    #[error("Duplicate {entity} for {key}")]
    UniqueViolation {
        /// Kind of record
        entity: &'static str,
        /// Offending key
        key: String,
    },

    /// A stored record failed validation when read
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// Filesystem error in a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error in a file-backed store
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if retrying the same call can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Why an action was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("Sign in to track your progress")]
    NotSignedIn,

    #[error("Enroll in {course_slug} to access this lesson")]
    NotEnrolled { course_slug: String },

    #[error("Pass the module {previous_module} quiz to unlock module {module_number}")]
    ModuleLocked { module_number: u32, previous_module: u32 },
}

/// Errors surfaced to the caller of the progression engine
#[derive(Debug, Error)]
pub enum ProgressionError {
    /// Not signed in, not enrolled, or module still locked
    #[error("Not authorized: {0}")]
    NotAuthorized(#[from] AuthFailure),

    /// Lesson, quiz, or questions missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Read or write against the store failed
    #[error("Store failure: {0}")]
    TransientStore(#[from] StoreError),

    /// Quiz session used out of order
    #[error("Quiz error: {0}")]
    Quiz(#[from] QuizError),
}

impl ProgressionError {
    /// Shorthand for a missing record
    pub fn not_found(what: impl Into<String>) -> Self {
        ProgressionError::NotFound(what.into())
    }

    /// Check if the user can retry the same action
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProgressionError::TransientStore(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Missing content is rendered as an empty state, not as an error dialog
    pub fn is_silent(&self) -> bool {
        matches!(self, ProgressionError::NotFound(_))
    }

    /// Message shown to the learner
    pub fn user_message(&self) -> String {
        match self {
            ProgressionError::NotAuthorized(reason) => reason.to_string(),
            ProgressionError::NotFound(_) => "Nothing here yet.".to_string(),
            ProgressionError::TransientStore(_) => {
                "Something went wrong saving your progress. Please try again.".to_string()
            }
            ProgressionError::Quiz(e) => e.to_string(),
        }
    }
}
