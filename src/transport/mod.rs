//! The message transport substrate behind every handle.
//!
//! Handles never touch sockets directly: they drive a [`Transport`] through the
//! primitives below, identified by an [`EndpointId`]. [`TcpTransport`] is the
//! network implementation; any other implementation can be injected through
//! [`Context::with_transport`](crate::Context::with_transport).

use std::fmt;
use std::time::Duration;

use crate::error::{Progress, Readiness, Result};
use crate::pattern::Pattern;
use crate::Mode;

mod fanout;
mod tcp;

#[cfg(test)]
pub(crate) mod fake;

pub use tcp::TcpTransport;

/// Opaque identifier of a transport endpoint.
///
/// Identifiers are never reused by a transport, so a stale id is always
/// recognized as released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Wraps a raw identifier.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.as_raw())
    }
}

/// What a readiness wait is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Data (or an orderly shutdown) is available to read.
    Read,
    /// A write would not suspend.
    Write,
    /// A connection is pending on a listening endpoint.
    Accept,
}

/// Primitives a messaging substrate exposes to the handle layer.
///
/// Every call names its endpoint by id; a released or unknown id fails with
/// [`SocketError::AlreadyReleased`](crate::SocketError::AlreadyReleased).
/// Calls on different endpoints must not serialize each other while suspended.
pub trait Transport: Send + Sync {
    /// Allocates an endpoint tagged with `pattern`.
    fn allocate(&self, pattern: Pattern) -> Result<EndpointId>;

    /// Attaches the endpoint to a remote address.
    fn connect(&self, id: EndpointId, addr: &str, port: u16) -> Result<()>;

    /// Binds to `port` and starts listening; returns the bound port.
    fn listen(&self, id: EndpointId, port: u16, backlog: u32) -> Result<u16>;

    /// Binds a broadcast endpoint to `port`; returns the bound port.
    fn bind(&self, id: EndpointId, port: u16) -> Result<u16>;

    /// Takes one pending connection off a listening endpoint.
    fn accept(&self, id: EndpointId, mode: Mode) -> Result<Progress<EndpointId>>;

    /// Sends up to `data.len()` bytes.
    fn send(&self, id: EndpointId, data: &[u8], mode: Mode) -> Result<Progress<usize>>;

    /// Receives up to `buf.len()` bytes; `Ready(0)` is an orderly shutdown.
    fn recv(&self, id: EndpointId, buf: &mut [u8], mode: Mode) -> Result<Progress<usize>>;

    /// Validates (and applies) a blocking mode change.
    fn set_mode(&self, id: EndpointId, mode: Mode) -> Result<()>;

    /// Waits until `interest` is satisfied; `None` waits forever.
    fn wait(&self, id: EndpointId, interest: Interest, timeout: Option<Duration>) -> Result<Readiness>;

    /// Number of peers attached to a broadcast endpoint.
    fn peer_count(&self, id: EndpointId) -> Result<usize>;

    /// Releases the endpoint. A second release fails with `AlreadyReleased`.
    fn release(&self, id: EndpointId) -> Result<()>;
}
