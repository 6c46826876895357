//! Error type shared by the experience and parameter paths.

use std::time::Duration;

/// Errors raised by the dataflow components.
///
/// Protocol errors fail a single request or tuple and never touch shared
/// state. Transport errors are passed through as-is.
#[derive(Debug, thiserror::Error)]
pub enum DataflowError {
    /// A peer sent a message that does not match the expected shape.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An experience tuple referenced an observation that is neither cached
    /// nor present in the batch side-table.
    #[error("observation {hash} is neither cached nor carried by the batch")]
    MissingObservation { hash: String },

    /// The dequeue worker was started while one is already running.
    #[error("dequeue thread is already running")]
    AlreadyRunning,

    /// Encoding or decoding a payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The other side of a channel hung up.
    #[error("transport disconnected: {0}")]
    Disconnected(&'static str),

    /// No reply arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server failed the request.
    #[error("remote error: {0}")]
    Remote(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<bincode::Error> for DataflowError {
    fn from(e: bincode::Error) -> Self {
        DataflowError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = DataflowError::MissingObservation {
            hash: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
        assert_eq!(
            DataflowError::AlreadyRunning.to_string(),
            "dequeue thread is already running"
        );
    }

    #[test]
    fn test_from_bincode_error() {
        let bad: std::result::Result<String, bincode::Error> = bincode::deserialize(&[0xff]);
        let err: DataflowError = bad.unwrap_err().into();
        assert!(matches!(err, DataflowError::Serialization(_)));
    }
}
