//! Entry point: the context handles are created from.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::handle::{Bindable, Core};
use crate::options::SocketOptions;
use crate::pattern::Pattern;
use crate::socket::{AnySocket, Kind, Socket};
use crate::transport::{TcpTransport, Transport};

/// Owns the transport substrate and the options handles are created with.
///
/// Cloning a context is cheap; clones share the same transport, so handles
/// created from any clone live in the same endpoint table.
///
/// ```rust,no_run
/// use pattern_socket::{Context, Connectable, Readable, Request, Writable};
///
/// let ctx = Context::new();
/// let mut req = ctx.socket::<Request>()?;
/// req.connect("127.0.0.1", 5000)?;
/// req.write_all(b"ping\n")?;
/// let reply = req.readline(b"\n")?;
/// # Ok::<(), pattern_socket::SocketError>(())
/// ```
#[derive(Clone)]
pub struct Context {
    transport: Arc<dyn Transport>,
    options: Arc<SocketOptions>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context over [`TcpTransport`] with default options.
    pub fn new() -> Self {
        Self::with_options(SocketOptions::default())
    }

    /// A context over [`TcpTransport`] configured by `options`.
    pub fn with_options(options: SocketOptions) -> Self {
        let transport = Arc::new(TcpTransport::new(&options));
        Self::with_transport(transport, options)
    }

    /// A context over any transport, e.g. a test double.
    pub fn with_transport(transport: Arc<dyn Transport>, options: SocketOptions) -> Self {
        Context {
            transport,
            options: Arc::new(options),
        }
    }

    /// The options handles are created with.
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// The transport substrate.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn shared_options(&self) -> Arc<SocketOptions> {
        self.options.clone()
    }

    /// Creates a handle of pattern `K`.
    pub fn socket<K: Kind>(&self) -> Result<Socket<K>> {
        Ok(Socket::from_parts(Core::new(self, K::PATTERN)?))
    }

    /// Creates a broadcast handle already bound to `port`.
    pub fn bind<K: Kind>(&self, port: u16) -> Result<Socket<K>>
    where
        Socket<K>: Bindable,
    {
        let mut socket = self.socket::<K>()?;
        socket.bind(port)?;
        Ok(socket)
    }

    /// Creates a handle for a pattern chosen at run time.
    pub fn open(&self, pattern: Pattern) -> Result<AnySocket> {
        Ok(AnySocket::from_core(Core::new(self, pattern)?))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("options", &self.options).finish_non_exhaustive()
    }
}
