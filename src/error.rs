use std::fmt;
use thiserror::Error;

/// Result type for frame pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while assembling or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A connection referenced a name that was never registered
    #[error("Module not registered: {name}")]
    UnknownModule { name: String },

    /// A connection between the given endpoints is not allowed
    #[error("Invalid connection: {from} -> {to}")]
    InvalidConnection { from: String, to: String },

    /// The chain walk did not reach the exit point
    #[error("Chain does not reach the exit point, walk stopped at '{last}'")]
    BrokenChain { last: String },

    /// The chain has no real stage between entry and exit
    #[error("Cannot construct a chain with no stages")]
    EmptyChain,

    /// A stage was registered with a concurrency of zero
    #[error("Module '{name}' needs a concurrency of at least 1")]
    InvalidConcurrency { name: String },

    /// Chain was already materialized
    #[error("Pipeline has already been constructed")]
    AlreadyConstructed,

    /// Chain has not been materialized yet
    #[error("Pipeline has not been constructed")]
    NotConstructed,

    /// Worker thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A daemon failed to start or stop
    #[error("Lifecycle error in '{name}': {message}")]
    Lifecycle { name: String, message: String },
}

/// Rejected admission. The frame is handed back untouched so the caller
/// keeps ownership and decides whether to retry or dispose it.
pub enum PushError<F> {
    /// The frame handle is null/empty
    Empty(F),
    /// The entry queue is full right now
    Full(F),
    /// The pipeline is not constructed or is shutting down
    Closed(F),
}

impl<F> PushError<F> {
    /// Take the rejected frame back
    pub fn into_inner(self) -> F {
        match self {
            PushError::Empty(frame) | PushError::Full(frame) | PushError::Closed(frame) => frame,
        }
    }

    /// Whether retrying the same frame later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PushError::Full(_))
    }
}

impl<F> fmt::Debug for PushError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Empty(_) => f.write_str("Empty(..)"),
            PushError::Full(_) => f.write_str("Full(..)"),
            PushError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<F> fmt::Display for PushError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Empty(_) => f.write_str("rejected empty frame"),
            PushError::Full(_) => f.write_str("pipeline entry is full"),
            PushError::Closed(_) => f.write_str("pipeline is not accepting frames"),
        }
    }
}

impl<F> std::error::Error for PushError<F> {}
