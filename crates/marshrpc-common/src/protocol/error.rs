use std::fmt;

use thiserror::Error;

use crate::protocol::marshal::Marshal;
use crate::protocol::payload::Payload;

/// Call identifier as it appears on the wire.
pub type CallId = u32;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    TruncatedPayload { needed: usize, remaining: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown procedure: call id {0}")]
    UnknownProcedure(CallId),

    #[error("No handler bound for procedure '{name}' (call id {id})")]
    UnboundProcedure { id: CallId, name: &'static str },

    #[error("Procedure '{name}' declared twice with call id {id}")]
    DuplicateProcedure { id: CallId, name: &'static str },

    #[error("Bad call: {0}")]
    BadCall(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Server is shutting down or stopped")]
    ServerStopped,

    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    #[error("Remote procedure failed: {0}")]
    Protocol(RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Returns true for errors after which the transport can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::TransportClosed | RpcError::Timeout(_) | RpcError::Io(_)
        )
    }

    /// Kind used when this error has to travel back to a caller as a descriptor.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::TruncatedPayload { .. } => ErrorKind::TruncatedPayload,
            RpcError::MalformedPayload(_) => ErrorKind::MalformedPayload,
            RpcError::UnknownProcedure(_) => ErrorKind::UnknownProcedure,
            RpcError::BadCall(_) => ErrorKind::BadCall,
            RpcError::Protocol(remote) => remote.kind,
            RpcError::Transport(_)
            | RpcError::TransportClosed
            | RpcError::Timeout(_)
            | RpcError::Io(_)
            | RpcError::ServerStopped => ErrorKind::Unavailable,
            RpcError::UnboundProcedure { .. } | RpcError::DuplicateProcedure { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

crate::marshal_enum! {
    /// Category of a failure reported in an error descriptor.
    ///
    /// The numeric values are part of the wire format and must never be reused.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ErrorKind: u16 {
        TruncatedPayload = 1,
        MalformedPayload = 2,
        UnknownProcedure = 3,
        BadCall = 4,
        Internal = 5,
        InvalidArgument = 6,
        Unavailable = 7,
        Application = 8,
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TruncatedPayload => "TruncatedPayload",
            ErrorKind::MalformedPayload => "MalformedPayload",
            ErrorKind::UnknownProcedure => "UnknownProcedure",
            ErrorKind::BadCall => "BadCall",
            ErrorKind::Internal => "Internal",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Application => "Application",
        };
        f.write_str(name)
    }
}

/// Error descriptor carried in a failure response.
///
/// Handlers return this type to report failure; clients receive it wrapped in
/// [`RpcError::Protocol`].
///
/// # Wire Format
///
/// ```text
/// [kind: u16] [message length: u32] [message: UTF-8]
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedPayload, message)
    }
}

impl From<RpcError> for RemoteError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Protocol(remote) => remote,
            other => RemoteError::new(other.kind(), other.to_string()),
        }
    }
}

impl Marshal for RemoteError {
    const MIN_WIRE_SIZE: usize = 2 + 4;

    fn encode(&self, payload: &mut Payload) -> Result<()> {
        self.kind.encode(payload)?;
        self.message.encode(payload)
    }

    fn decode(payload: &mut Payload) -> Result<Self> {
        let kind = ErrorKind::decode(payload)?;
        let message = String::decode(payload)?;
        Ok(Self { kind, message })
    }
}
