use thiserror::Error;

/// Error taxonomy for the coordination layer.
///
/// Store-level conditional-write losses (winner CAS, redundant
/// completions) are expected outcomes, not errors, and never surface
/// through this type. There is no retry or backoff anywhere in this
/// layer; a transient `Store` failure fails the user-visible action
/// and must be re-attempted by the caller.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl AppError {
    /// Short human-readable string for UI display.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Store(_) => "Something went wrong, please try again".to_string(),
        }
    }
}
