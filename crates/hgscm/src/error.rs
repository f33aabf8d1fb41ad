use hg::{CommandError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Failed to access staging state: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid staging state: {0}")]
    State(#[from] serde_json::Error),
}
