use std::io;

use thiserror::Error;

/// Error type for EventLog
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The output sink rejected a write while rendering. The log itself is untouched.
    #[error("failed to write to sink: {0}")]
    Sink(#[from] io::Error),
}
