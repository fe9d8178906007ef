/// Error types for LiveGrid
///
/// Fetch failures stay local to the store that issued them (its status
/// observable moves to an error state); composite operations hand the first
/// failure back to their caller as a `GridError`.

use crate::column::ColumnId;
use thiserror::Error;

/// Result type for grid operations
pub type Result<T> = std::result::Result<T, GridError>;

/// Which collaborator a fetch failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Columns,
    Constraints,
    Records,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Source::Columns => "columns",
            Source::Constraints => "constraints",
            Source::Records => "records",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while orchestrating a grid
#[derive(Debug, Error)]
pub enum GridError {
    /// A collaborator rejected a fetch or a persist call
    #[error("Failed to load {source_name}: {message}")]
    Fetch { source_name: Source, message: String },

    /// A column id is not part of the table
    #[error("Column not found: {0}")]
    ColumnNotFound(ColumnId),

    /// A row key is neither a saved nor a new row
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// A selection coordinate lies outside the selectable area
    #[error("Row {row} out of range [0, {max})")]
    SelectionOutOfBounds { row: usize, max: usize },

    /// Configuration value missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// View state could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The owning store or orchestrator was already torn down
    #[error("Operation attempted after destroy")]
    Destroyed,
}

impl GridError {
    pub fn fetch(source_name: Source, message: impl Into<String>) -> Self {
        GridError::Fetch {
            source_name,
            message: message.into(),
        }
    }

    /// Short message suitable for a store's error status
    pub fn status_message(&self) -> String {
        match self {
            GridError::Fetch { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
