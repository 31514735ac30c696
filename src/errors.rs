use thiserror::Error;

use crate::mode::Mode;
use crate::models::{OpportunityStatus, Phase};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty response")]
    Empty,
    #[error("no JSON object found in response")]
    MissingJson,
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single generation task. Recovered locally with a placeholder.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("external call failed: {0}")]
    ExternalCall(String),
    #[error("unusable response: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("every {phase} task failed in {mode} mode")]
    ModeDowngradeRequired { mode: Mode, phase: Phase },
    #[error("generation failed in every mode: {}", format_attempts(.attempts))]
    GenerationFailed { attempts: Vec<(Mode, String)> },
}

fn format_attempts(attempts: &[(Mode, String)]) -> String {
    attempts
        .iter()
        .map(|(mode, reason)| format!("{}: {}", mode, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cannot move opportunity {id} from {from} back to {to}")]
    StatusRegression {
        id: String,
        from: OpportunityStatus,
        to: OpportunityStatus,
    },
    #[error("opportunity {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0} not found in the environment or any .env file")]
    CredentialMissing(String),
}
