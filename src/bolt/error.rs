//! Bolt protocol error types.

use std::fmt;
use std::io;

use thiserror::Error;

use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Transport and protocol level errors.
#[derive(Debug, Error)]
pub enum BoltError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Encoding a value failed.
    #[error("PackStream error: {0}")]
    PackStream(#[from] PackStreamError),

    /// A request could not be decoded. The message is lost but the input
    /// is positioned at the next message boundary.
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// A value kind that may not appear where it was found, e.g. nodes in an
    /// auth token. Carries the plural kind name (`"nodes"`, `"points"`).
    #[error("Unsupported operation: {0} are not supported here")]
    UnsupportedOperation(&'static str),

    /// A valid message sent at a point where the session cannot accept it.
    #[error("Protocol breach: {0}")]
    ProtocolBreach(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The outbound sink is gone; nothing more can be written.
    #[error("Output closed")]
    OutputClosed,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,
}

impl BoltError {
    /// Status reported to the client when this error ends a request.
    pub fn status(&self) -> Status {
        match self {
            BoltError::InvalidMessageFormat(_) | BoltError::MessageTooLarge { .. } => {
                Status::InvalidFormat
            }
            BoltError::UnsupportedOperation(_) | BoltError::ProtocolBreach(_) => Status::Invalid,
            BoltError::AuthenticationFailed(_) => Status::Unauthorized,
            _ => Status::UnknownError,
        }
    }

    /// Convert into a status error for a FAILURE response.
    pub fn to_status_error(&self) -> StatusError {
        let status = self.status();
        let fatal = !matches!(self, BoltError::AuthenticationFailed(_));
        StatusError {
            status,
            message: self.to_string(),
            fatal,
        }
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("Invalid magic number: expected {expected:02X?}, received {received:02X?}")]
    InvalidMagic { expected: [u8; 4], received: [u8; 4] },

    #[error("No compatible protocol version in {proposed:?}")]
    NoCompatibleVersion { proposed: [u32; 4] },

    #[error("Invalid handshake data: {0}")]
    InvalidData(String),

    #[error("Connection closed during handshake")]
    ConnectionClosed,

    #[error("Handshake timed out")]
    Timeout,
}

/// Top-level grouping of status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The client sent something wrong; retrying unchanged will fail again.
    ClientError,
    /// Retrying may succeed.
    TransientError,
    /// The server failed.
    DatabaseError,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::ClientError => "ClientError",
            Classification::TransientError => "TransientError",
            Classification::DatabaseError => "DatabaseError",
        }
    }
}

/// Status codes reported in FAILURE messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unauthorized,
    CredentialsExpired,
    InvalidFormat,
    Invalid,
    SyntaxError,
    SemanticError,
    ParameterMissing,
    DatabaseNotFound,
    TransactionTerminated,
    LockClientStopped,
    DatabaseUnavailable,
    ExecutionFailed,
    UnknownError,
}

impl Status {
    /// Full `Neo.<Classification>.<Category>.<Title>` code.
    pub fn code(self) -> &'static str {
        match self {
            Status::Unauthorized => "Neo.ClientError.Security.Unauthorized",
            Status::CredentialsExpired => "Neo.ClientError.Security.CredentialsExpired",
            Status::InvalidFormat => "Neo.ClientError.Request.InvalidFormat",
            Status::Invalid => "Neo.ClientError.Request.Invalid",
            Status::SyntaxError => "Neo.ClientError.Statement.SyntaxError",
            Status::SemanticError => "Neo.ClientError.Statement.SemanticError",
            Status::ParameterMissing => "Neo.ClientError.Statement.ParameterMissing",
            Status::DatabaseNotFound => "Neo.ClientError.Database.DatabaseNotFound",
            Status::TransactionTerminated => "Neo.TransientError.Transaction.Terminated",
            Status::LockClientStopped => "Neo.TransientError.Transaction.LockClientStopped",
            Status::DatabaseUnavailable => "Neo.TransientError.General.DatabaseUnavailable",
            Status::ExecutionFailed => "Neo.DatabaseError.Statement.ExecutionFailed",
            Status::UnknownError => "Neo.DatabaseError.General.UnknownError",
        }
    }

    pub fn classification(self) -> Classification {
        let code = self.code();
        if code.starts_with("Neo.ClientError.") {
            Classification::ClientError
        } else if code.starts_with("Neo.TransientError.") {
            Classification::TransientError
        } else {
            Classification::DatabaseError
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error with a status code, as raised by the statement engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct StatusError {
    pub status: Status,
    pub message: String,
    /// Fatal errors end the connection after the FAILURE is flushed.
    pub fatal: bool,
}

impl StatusError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fatal: true,
        }
    }

    /// Whether the failure was caused by the client going away mid-operation.
    pub fn is_client_disconnect(&self) -> bool {
        matches!(
            self.status,
            Status::LockClientStopped | Status::TransactionTerminated
        )
    }
}
