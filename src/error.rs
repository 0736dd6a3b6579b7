//! Error and outcome types shared by every handle operation.
//!
//! Genuine failures are reported as [`SocketError`]. The two expected, non-fault
//! outcomes of an I/O call, "try again later" and "the wait timed out", are
//! carried by [`Progress`] and [`Readiness`] so callers can loop on them.

use std::io;

use thiserror::Error;

use crate::pattern::Pattern;
use crate::transport::EndpointId;
use crate::Mode;

/// Errors reported by socket handles and transports.
#[derive(Error, Debug)]
pub enum SocketError {
    /// The transport could not provide a new endpoint.
    #[error("cannot allocate endpoint: {0}")]
    Allocation(String),

    /// The pattern value is not one of the known patterns.
    #[error("invalid socket pattern `{0}`")]
    InvalidPattern(String),

    /// Malformed or unresolvable address/port pair.
    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    /// A port that does not fit the 16-bit port range.
    #[error("invalid port `{0}`")]
    InvalidPort(String),

    /// Listen backlog must be strictly positive.
    #[error("invalid backlog {0}, it must be positive")]
    InvalidBacklog(i32),

    /// The endpoint could not be bound to the requested port.
    #[error("cannot bind port {port}: {reason}")]
    BindFailure {
        /// Requested port.
        port: u16,
        /// Why the bind was refused.
        reason: String,
    },

    /// The transport could not attach the endpoint to the remote address.
    #[error("cannot connect to {addr}: {reason}")]
    ConnectFailure {
        /// Remote `host:port` as supplied by the caller.
        addr: String,
        /// Why the connect was refused.
        reason: String,
    },

    /// `accept` was called on a handle that never completed `bind_and_listen`.
    #[error("handle is not listening")]
    NotListening,

    /// The operation would suspend and the handle is in non-blocking mode.
    #[error("operation would block")]
    WouldBlock,

    /// Transport failure on an established endpoint.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// The transport endpoint does not support the requested blocking mode.
    #[error("{mode} mode is not supported by {pattern} endpoints")]
    UnsupportedMode {
        /// Requested mode.
        mode: Mode,
        /// Pattern of the endpoint.
        pattern: Pattern,
    },

    /// The endpoint was already released.
    #[error("endpoint {0} was already released")]
    AlreadyReleased(EndpointId),

    /// An argument that can never be valid, such as an empty line terminator.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The deadline of the last survey passed; late answers are not collected.
    #[error("survey deadline passed")]
    SurveyExpired,

    /// `readline` accumulated more than the configured maximum without a terminator.
    #[error("line exceeds {0} bytes without a terminator")]
    LineTooLong(usize),
}

/// Result type alias for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

impl SocketError {
    /// Shorthand for a [`SocketError::Connection`] built from a message.
    pub fn connection(kind: io::ErrorKind, msg: impl Into<String>) -> Self {
        Self::Connection(io::Error::new(kind, msg.into()))
    }

    /// True for the expected "try again" outcome of non-blocking mode.
    #[must_use]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// True for errors caused by misuse of the API rather than by the network.
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::NotListening
                | Self::AlreadyReleased(_)
                | Self::InvalidArgument(_)
                | Self::InvalidPattern(_)
                | Self::InvalidBacklog(_)
        )
    }
}

impl From<SocketError> for io::Error {
    fn from(err: SocketError) -> Self {
        let kind = match &err {
            SocketError::WouldBlock => io::ErrorKind::WouldBlock,
            SocketError::SurveyExpired => io::ErrorKind::TimedOut,
            SocketError::Connection(e) => e.kind(),
            SocketError::InvalidAddress(_)
            | SocketError::InvalidPort(_)
            | SocketError::InvalidBacklog(_)
            | SocketError::InvalidPattern(_)
            | SocketError::InvalidArgument(_)
            | SocketError::LineTooLong(_) => io::ErrorKind::InvalidInput,
            SocketError::BindFailure { .. } => io::ErrorKind::AddrInUse,
            SocketError::ConnectFailure { .. } => io::ErrorKind::ConnectionRefused,
            SocketError::NotListening => io::ErrorKind::NotConnected,
            SocketError::UnsupportedMode { .. } => io::ErrorKind::Unsupported,
            SocketError::Allocation(_) | SocketError::AlreadyReleased(_) => io::ErrorKind::Other,
        };
        match err {
            SocketError::Connection(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

/// Outcome of an operation that may be unable to make progress right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    /// The operation completed with this value.
    Ready(T),
    /// Nothing could be done without suspending.
    WouldBlock,
}

impl<T> Progress<T> {
    /// Converts `WouldBlock` into [`SocketError::WouldBlock`].
    pub fn into_result(self) -> Result<T> {
        match self {
            Progress::Ready(v) => Ok(v),
            Progress::WouldBlock => Err(SocketError::WouldBlock),
        }
    }

    /// Maps the ready value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Ready(v) => Progress::Ready(f(v)),
            Progress::WouldBlock => Progress::WouldBlock,
        }
    }

    /// Returns `true` for `Ready`.
    pub fn is_ready(&self) -> bool {
        matches!(self, Progress::Ready(_))
    }
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The awaited operation will not suspend now.
    Ready,
    /// The timeout elapsed first.
    Timeout,
}

/// Parses a caller supplied port string.
pub fn parse_port(port: &str) -> Result<u16> {
    port.trim()
        .parse::<u16>()
        .map_err(|_| SocketError::InvalidPort(port.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_maps_to_io_kind() {
        let err: io::Error = SocketError::WouldBlock.into();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn connection_error_keeps_inner_io_error() {
        let inner = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: io::Error = SocketError::from(inner).into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn programmer_errors_are_flagged() {
        assert!(SocketError::NotListening.is_programmer_error());
        assert!(SocketError::AlreadyReleased(EndpointId::from_raw(3)).is_programmer_error());
        assert!(!SocketError::WouldBlock.is_programmer_error());
        assert!(SocketError::WouldBlock.is_would_block());
    }

    #[test]
    fn progress_outcomes() {
        let ready = Progress::Ready(3).map(|n| n * 2);
        assert!(ready.is_ready());
        assert_eq!(ready.into_result().unwrap(), 6);

        let pending: Progress<usize> = Progress::WouldBlock;
        assert!(!pending.is_ready());
        assert!(pending.into_result().unwrap_err().is_would_block());
    }

    #[test]
    fn expired_survey_maps_to_timed_out() {
        let err: io::Error = SocketError::SurveyExpired.into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(!SocketError::SurveyExpired.is_programmer_error());
    }

    #[test]
    fn ports_are_range_checked() {
        assert_eq!(parse_port("5000").unwrap(), 5000);
        assert!(matches!(parse_port("70000"), Err(SocketError::InvalidPort(_))));
        assert!(matches!(parse_port("http"), Err(SocketError::InvalidPort(_))));
        assert!(matches!(parse_port("-1"), Err(SocketError::InvalidPort(_))));
    }
}
