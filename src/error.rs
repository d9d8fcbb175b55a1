//! Error taxonomy for the sockets core.

use std::io;

/// Logic-level errors raised by the sockets core.
///
/// Raw OS failures that map cleanly onto an [`io::Error`] are wrapped in
/// [`SocketsError::Io`]; the other variants cover cases the core itself
/// detects (malformed input, a call made against a socket in the wrong
/// state, an allocation the fixed-size slot table can't satisfy).
#[derive(Debug, thiserror::Error)]
pub enum SocketsError {
    #[error("operation would block")]
    WouldBlock,
    #[error("socket is closed")]
    Closed,
    #[error("no free socket slot available")]
    OutOfMemory,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("operation invalid in current socket state")]
    InvalidState,
    #[error("operation failed")]
    Nok,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SocketsError {
    pub fn invalid_parameters<S: Into<String>>(msg: S) -> SocketsError {
        SocketsError::InvalidParameters(msg.into())
    }

    /// True for the subset of variants that should never be treated as a
    /// hard failure by a caller retrying a non-blocking operation.
    pub fn is_would_block(&self) -> bool {
        match self {
            SocketsError::WouldBlock => true,
            SocketsError::Io(err) => err.kind() == io::ErrorKind::WouldBlock,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SocketsError>;
