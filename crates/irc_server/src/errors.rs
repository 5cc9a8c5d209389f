//! Session-fatal errors: I/O, timeouts, and codec failures that end one
//! connection but never the process. Generalizes the teacher's `IrcError`
//! (`errors.rs`), which conflated parsing errors with CAP pre-registration
//! errors under one two-variant enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ping timeout")]
    Timeout,
    #[error("send queue overflow")]
    QueueOverflow,
    #[error("codec error: {0}")]
    Codec(String),
}

impl SessionError {
    /// The text sent as the broadcast QUIT reason when this error ends a session.
    pub fn quit_reason(&self) -> String {
        self.to_string()
    }
}
