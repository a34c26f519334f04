use thiserror::Error;

use crate::services::parser::ParseError;

/// Failure of a single workflow operation. None of these are fatal to the
/// process; the state is left as it was before the operation started.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} is already in progress")]
    Busy(&'static str),

    #[error("{operation} failed: {source:#}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: could not read the AI response: {source}")]
    Parse {
        operation: &'static str,
        #[source]
        source: ParseError,
    },
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation(message.into())
    }

    pub fn collaborator(operation: &'static str, source: anyhow::Error) -> Self {
        WorkflowError::Collaborator { operation, source }
    }

    pub fn parse(operation: &'static str, source: ParseError) -> Self {
        WorkflowError::Parse { operation, source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WorkflowError::Validation(_))
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
