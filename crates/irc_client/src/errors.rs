//! Client-side error taxonomy, sibling to `irc_server::errors::SessionError`
//! and `irc_server::file_transfer::TransferError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server closed the connection: {0}")]
    Disconnected(String),

    #[error("not connected")]
    NotConnected,

    #[error("dcc transfer failed: {0}")]
    DccFailed(String),

    #[error("file error: {0}")]
    File(String),
}
