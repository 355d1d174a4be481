//! Error types for the conversational engine.

use sapa_core::error::SapaError;

/// Errors that escape [`Orchestrator::handle_turn`](crate::Orchestrator::handle_turn).
///
/// Provider, index and storage failures are absorbed into the response; only
/// invalid input is reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("session id cannot be empty")]
    EmptySessionId,
    #[error(transparent)]
    Core(#[from] SapaError),
}

impl ChatError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyQuery
                | ChatError::EmptySessionId
                | ChatError::Core(SapaError::Validation(_))
        )
    }
}
