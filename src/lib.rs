//! # Pattern Socket - one handle type for several messaging patterns
//!
//! Pattern Socket lets an application open a communication endpoint of a chosen
//! messaging pattern (request/reply, survey/respond, publish/subscribe or a
//! loopback-only local channel) and drive it with one small set of operations:
//! connect or bind, accept, read, write, line-oriented read, blocking-mode
//! control and readiness waiting.
//!
//! ## Key Features
//!
//! - **Typed patterns**: every handle is a `Socket<P>` of a pattern marker `P`;
//!   only the operations legal for that pattern exist on the type, so
//!   `accept` on a subscriber does not compile
//! - **Blocking and non-blocking**: each handle has a mutable [`Mode`];
//!   `try_*` variants never suspend and report [`Progress::WouldBlock`]
//! - **Readiness waiting**: `wait_ready(seconds, microseconds)` with `(0, 0)`
//!   meaning "poll once", and a [`Readiness::Timeout`] outcome distinct from errors
//! - **Broadcast without backpressure**: publish, survey and bound local
//!   handles fan writes out to every peer; a slow peer loses messages instead of
//!   stalling the writer
//! - **Injectable transport**: the substrate is a [`Transport`] owned by a
//!   [`Context`], so tests can run without a network
//!
//! ## Basic Usage
//!
//! ### Server Side
//!
//! ```rust,no_run
//! use pattern_socket::{Context, Listenable, Mode, Readable, Reply, Writable};
//!
//! let ctx = Context::new();
//! let mut listener = ctx.socket::<Reply>()?;
//! listener.bind_and_listen(5000, 16)?;
//!
//! loop {
//!     let mut peer = listener.accept(Mode::Blocking)?;
//!     while let Some(line) = peer.readline(b"\n")? {
//!         peer.write_all(&line)?;
//!         peer.write_all(b"\n")?;
//!     }
//! }
//! # Ok::<(), pattern_socket::SocketError>(())
//! ```
//!
//! ### Client Side
//!
//! ```rust,no_run
//! use pattern_socket::{Connectable, Context, Handle, Readable, Request, Writable};
//!
//! let ctx = Context::new();
//! let mut req = ctx.socket::<Request>()?;
//! req.connect("127.0.0.1", 5000)?;
//! req.write_all(b"ping\n")?;
//! let echo = req.readline(b"\n")?;
//! println!("{:?}", echo);
//! req.destroy()?;
//! # Ok::<(), pattern_socket::SocketError>(())
//! ```
//!
//! ## Lifecycle
//!
//! A handle is created by a [`Context`], established by `connect`,
//! `bind_and_listen` or `bind`, used for I/O, and released by `destroy` (or by
//! dropping it). Releasing twice is reported as
//! [`SocketError::AlreadyReleased`] by the transport.
//!
//! ## Concurrency
//!
//! Operations take `&mut self`, so a handle is driven by one thread at a time.
//! Different handles are fully independent: a call suspended on one endpoint
//! holds no lock another endpoint needs.

#![warn(missing_docs)]

mod context;
mod error;
mod handle;
mod options;
mod pattern;
mod socket;
pub mod transport;

pub use context::Context;
pub use error::{parse_port, Progress, Readiness, Result, SocketError};
pub use handle::{Bindable, Connectable, Handle, Listenable, Phase, Readable, Writable};
pub use options::{Mode, SocketOptions};
pub use pattern::Pattern;
pub use socket::{
    AnySocket, Connection, Kind, Local, Other, Publish, Reply, Request, Respond, Socket, Subscribe, Survey,
};
pub use transport::{EndpointId, Interest, TcpTransport, Transport};
