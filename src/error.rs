//! Error types
//!
//! Errors are split by layer: wire-level problems are [`ProtocolError`],
//! track bookkeeping problems are [`RegistryError`], and everything that can
//! come out of a session call is wrapped in [`Error`].

use std::fmt;
use std::io;

pub use crate::registry::RegistryError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error reported by the transport
    Io(io::Error),
    /// Wire protocol violation
    Protocol(ProtocolError),
    /// Track registry operation failed
    Registry(RegistryError),
    /// Transport refused an operation (closed, unknown stream)
    Transport(String),
    /// The connection loop is gone (command or event channel closed)
    ChannelClosed,
    /// Server has not been started (or was stopped)
    ServerNotStarted,
    /// Server connection limit reached
    ConnectionLimitReached,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::ChannelClosed => write!(f, "Connection loop channel closed"),
            Error::ServerNotStarted => write!(f, "Server not started"),
            Error::ConnectionLimitReached => write!(f, "Connection limit reached"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Wire protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A field could not be decoded from an otherwise complete message
    Decode {
        message: &'static str,
        field: &'static str,
    },
    /// A complete message had bytes left over after its last field
    TrailingBytes {
        message: &'static str,
        remaining: usize,
    },
    /// Message type is not valid on this kind of stream
    UnsupportedMessageType { msg_type: u64, control: bool },
    /// Declared message length exceeds the configured maximum
    MessageTooLarge { len: u64, max: usize },
    /// Value does not fit in a 62-bit varint
    VarintOverflow(u64),
    /// Message is valid on the wire but not in the current state
    UnexpectedMessage(&'static str),
    /// Control stream was readable but delivered zero bytes
    ControlStreamEmpty,
    /// Control stream was finished by the peer
    ControlStreamClosed,
    /// Peer offered no version we support
    VersionMismatch(Vec<u64>),
    /// Object frame arrived on a data stream before its stream header
    MissingStreamHeader,
    /// Data stream finished in the middle of a message
    TruncatedStream,
    /// Data stream was readable but delivered zero bytes
    EmptyDataStream,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Decode { message, field } => {
                write!(f, "Failed to decode {}.{}", message, field)
            }
            ProtocolError::TrailingBytes { message, remaining } => {
                write!(f, "{} has {} trailing bytes", message, remaining)
            }
            ProtocolError::UnsupportedMessageType { msg_type, control } => write!(
                f,
                "Unsupported message type 0x{:x} on {} stream",
                msg_type,
                if *control { "control" } else { "data" }
            ),
            ProtocolError::MessageTooLarge { len, max } => {
                write!(f, "Message length {} exceeds maximum {}", len, max)
            }
            ProtocolError::VarintOverflow(v) => write!(f, "Value {} exceeds varint range", v),
            ProtocolError::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            ProtocolError::ControlStreamEmpty => write!(f, "Control stream delivered zero bytes"),
            ProtocolError::ControlStreamClosed => write!(f, "Control stream closed by peer"),
            ProtocolError::VersionMismatch(offered) => {
                write!(f, "No supported version in {:x?}", offered)
            }
            ProtocolError::MissingStreamHeader => write!(f, "Object before stream header"),
            ProtocolError::TruncatedStream => write!(f, "Data stream ended mid-message"),
            ProtocolError::EmptyDataStream => write!(f, "Data stream delivered zero bytes"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_names_field() {
        let err = ProtocolError::Decode {
            message: "SubscribeOk",
            field: "expires",
        };
        assert_eq!(err.to_string(), "Failed to decode SubscribeOk.expires");
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = ProtocolError::ControlStreamClosed.into();
        assert!(matches!(err, Error::Protocol(ProtocolError::ControlStreamClosed)));

        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
