//! Error types for rankdex.

use std::fmt;

/// Errors that can occur while building, querying, or persisting an index.
#[derive(Debug)]
pub enum Error {
    /// File missing, read failure, or other I/O error.
    Io(std::io::Error),

    /// Malformed CSV row, JSON parse failure, or unknown column name.
    Format(String),

    /// CRC mismatch or version mismatch while loading a saved index.
    CorruptIndex {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Invalid configuration (e.g. `min_df > max_df`, empty field list).
    Config(String),

    /// Operation invalid in the engine's current state (query before
    /// finalize, save on an empty index, save into a non-empty directory).
    State(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Format(msg) => write!(f, "Format error: {msg}"),
            Error::CorruptIndex {
                message,
                expected,
                actual,
            } => {
                write!(f, "Corrupt index: {message}")?;
                if let Some(e) = expected {
                    write!(f, " (expected: {e})")?;
                }
                if let Some(a) = actual {
                    write!(f, " (actual: {a})")?;
                }
                Ok(())
            }
            Error::Config(msg) => write!(f, "Invalid configuration: {msg}"),
            Error::State(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type used throughout rankdex.
pub type Result<T> = std::result::Result<T, Error>;
