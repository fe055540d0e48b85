use thiserror::Error;

/// Errors raised by structural edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    #[error("Invalid move: {0}")]
    InvalidMove(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;
