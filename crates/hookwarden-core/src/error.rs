//! Error type shared by the core library. Binaries wrap it in `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid rule pattern '{pattern}': {source}")]
    Rule {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl WardenError {
    /// Returns `true` for errors caused by the environment rather than by the
    /// input being checked (missing tools, unreadable state files).
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Tool(_) | Self::Serialization(_))
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
