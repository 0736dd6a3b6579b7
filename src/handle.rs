//! The handle core shared by every typed socket, and the capability traits.
//!
//! A handle walks `Created → Connected | Listening | Bound → Closed`. Which of
//! the establishing transitions are available is decided by the capability
//! traits a typed handle implements; the core only enforces the ordering.

use std::fmt;
use std::io::ErrorKind;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{Progress, Readiness, Result, SocketError};
use crate::options::{Mode, SocketOptions};
use crate::pattern::Pattern;
use crate::transport::{EndpointId, Interest, Transport};

/// Lifecycle phase of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Allocated, not attached to any address.
    Created,
    /// Attached to a remote peer (or accepted from a listener).
    Connected,
    /// Bound and accepting peers.
    Listening,
    /// Bound broadcast endpoint.
    Bound,
    /// Released; terminal.
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Connected => "connected",
            Phase::Listening => "listening",
            Phase::Bound => "bound",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eof {
    Open,
    /// The peer closed after a partial line was handed out; not reported yet.
    Pending,
    Reported,
}

fn closed() -> SocketError {
    SocketError::connection(ErrorKind::UnexpectedEof, "connection closed by peer")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// State behind every handle: the transport endpoint and its bookkeeping.
pub struct Core {
    transport: Arc<dyn Transport>,
    options: Arc<SocketOptions>,
    id: EndpointId,
    pattern: Pattern,
    mode: Mode,
    phase: Phase,
    local_port: Option<u16>,
    readahead: Vec<u8>,
    eof: Eof,
    /// End of the current survey window; `None` while unbounded.
    survey_until: Option<Instant>,
}

impl Core {
    pub(crate) fn new(ctx: &Context, pattern: Pattern) -> Result<Core> {
        let transport = ctx.transport().clone();
        let id = transport.allocate(pattern)?;
        let mut core = Core {
            transport,
            options: ctx.shared_options(),
            id,
            pattern,
            mode: Mode::Blocking,
            phase: Phase::Created,
            local_port: None,
            readahead: Vec::new(),
            eof: Eof::Open,
            survey_until: None,
        };
        let mode = core.options.default_mode;
        if mode != Mode::Blocking {
            core.set_mode(mode)?;
        }
        Ok(core)
    }

    fn adopt(&self, id: EndpointId) -> Core {
        Core {
            transport: self.transport.clone(),
            options: self.options.clone(),
            id,
            pattern: self.pattern.accepted_pattern().unwrap_or(self.pattern),
            mode: Mode::Blocking,
            phase: Phase::Connected,
            local_port: None,
            readahead: Vec::new(),
            eof: Eof::Open,
            survey_until: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.phase {
            Phase::Closed => Err(SocketError::AlreadyReleased(self.id)),
            _ => Ok(()),
        }
    }

    pub(crate) fn id(&self) -> EndpointId {
        self.id
    }

    pub(crate) fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub(crate) fn release(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.phase = Phase::Closed;
        self.readahead.clear();
        self.transport.release(self.id)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.ensure_open()?;
        self.transport.set_mode(self.id, mode)?;
        self.mode = mode;
        Ok(())
    }

    fn connect(&mut self, addr: &str, port: u16) -> Result<()> {
        self.ensure_open()?;
        match (self.phase, self.pattern) {
            (Phase::Created, _) | (Phase::Connected, Pattern::Survey) => {}
            (phase, _) => {
                return Err(SocketError::ConnectFailure {
                    addr: format!("{addr}:{port}"),
                    reason: format!("handle is already {phase}"),
                });
            }
        }
        self.transport.connect(self.id, addr, port)?;
        if self.phase == Phase::Connected && self.eof == Eof::Reported {
            // A surveyor left without respondents reported end of stream; a new one revives it.
            self.eof = Eof::Open;
        }
        self.phase = Phase::Connected;
        log::debug!("{} handle {} connected to {addr}:{port}", self.pattern, self.id);
        Ok(())
    }

    fn establish_bind(&mut self, port: u16) -> Result<()> {
        self.ensure_open()?;
        if self.phase != Phase::Created {
            return Err(SocketError::BindFailure {
                port,
                reason: format!("handle is already {}", self.phase),
            });
        }
        Ok(())
    }

    fn bind_and_listen(&mut self, port: u16, backlog: i32) -> Result<()> {
        if backlog <= 0 {
            return Err(SocketError::InvalidBacklog(backlog));
        }
        self.establish_bind(port)?;
        let bound = self.transport.listen(self.id, port, backlog as u32)?;
        self.phase = Phase::Listening;
        self.local_port = Some(bound);
        Ok(())
    }

    fn bind(&mut self, port: u16) -> Result<()> {
        self.establish_bind(port)?;
        let bound = self.transport.bind(self.id, port)?;
        self.phase = Phase::Bound;
        self.local_port = Some(bound);
        Ok(())
    }

    fn accept(&mut self, mode: Mode) -> Result<Progress<Core>> {
        self.ensure_open()?;
        if self.phase != Phase::Listening {
            return Err(SocketError::NotListening);
        }
        Ok(self.transport.accept(self.id, mode)?.map(|id| self.adopt(id)))
    }

    fn read(&mut self, buf: &mut [u8], mode: Mode) -> Result<Progress<usize>> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(Progress::Ready(0));
        }
        if !self.readahead.is_empty() {
            let n = self.readahead.len().min(buf.len());
            buf[..n].copy_from_slice(&self.readahead[..n]);
            self.readahead.drain(..n);
            return Ok(Progress::Ready(n));
        }
        match self.eof {
            Eof::Pending => {
                self.eof = Eof::Reported;
                return Ok(Progress::Ready(0));
            }
            Eof::Reported => return Err(closed()),
            Eof::Open => {}
        }
        let got = self.recv(buf, mode)?;
        if got == Progress::Ready(0) {
            self.eof = Eof::Reported;
        }
        Ok(got)
    }

    fn readline(&mut self, terminator: &[u8], mode: Mode) -> Result<Progress<Option<Vec<u8>>>> {
        self.ensure_open()?;
        if terminator.is_empty() {
            return Err(SocketError::InvalidArgument("line terminator must not be empty"));
        }
        let mut scan_from = 0;
        let mut chunk = Vec::new();
        loop {
            if let Some(pos) = find(&self.readahead[scan_from..], terminator) {
                let end = scan_from + pos;
                let line = self.readahead[..end].to_vec();
                self.readahead.drain(..end + terminator.len());
                return Ok(Progress::Ready(Some(line)));
            }
            if self.readahead.len() > self.options.max_line_len {
                self.readahead.clear();
                return Err(SocketError::LineTooLong(self.options.max_line_len));
            }
            match self.eof {
                Eof::Pending => {
                    self.eof = Eof::Reported;
                    return Ok(Progress::Ready(None));
                }
                Eof::Reported => return Err(closed()),
                Eof::Open => {}
            }
            scan_from = self.readahead.len().saturating_sub(terminator.len() - 1);
            chunk.resize(self.options.read_chunk, 0);
            match self.recv(&mut chunk, mode) {
                Ok(Progress::Ready(0)) if self.readahead.is_empty() => {
                    self.eof = Eof::Reported;
                    return Ok(Progress::Ready(None));
                }
                Ok(Progress::Ready(0)) => {
                    self.eof = Eof::Pending;
                    return Ok(Progress::Ready(Some(mem::take(&mut self.readahead))));
                }
                Ok(Progress::Ready(n)) => self.readahead.extend_from_slice(&chunk[..n]),
                Ok(Progress::WouldBlock) => return Ok(Progress::WouldBlock),
                Err(e) => {
                    self.readahead.clear();
                    return Err(e);
                }
            }
        }
    }

    fn survey_expired(&self) -> bool {
        self.survey_until.is_some_and(|until| Instant::now() >= until)
    }

    /// Transport read bounded by the survey window, if one is open.
    fn recv(&mut self, buf: &mut [u8], mode: Mode) -> Result<Progress<usize>> {
        let Some(until) = self.survey_until else {
            return self.transport.recv(self.id, buf, mode);
        };
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SocketError::SurveyExpired);
            }
            match self.transport.recv(self.id, buf, Mode::NonBlocking)? {
                Progress::WouldBlock if mode == Mode::Blocking => {
                    if self.transport.wait(self.id, Interest::Read, Some(remaining))? == Readiness::Timeout {
                        return Err(SocketError::SurveyExpired);
                    }
                }
                got => return Ok(got),
            }
        }
    }

    /// Opens a new survey window, discarding answers to the previous survey.
    fn start_survey(&mut self, deadline: Duration) {
        if self.survey_until.is_some() {
            let mut scratch = vec![0u8; self.options.read_chunk];
            loop {
                match self.transport.recv(self.id, &mut scratch, Mode::NonBlocking) {
                    Ok(Progress::Ready(n)) if n > 0 => log::trace!("Discarding {n} late bytes on {}", self.id),
                    Ok(_) => break,
                    Err(e) => {
                        log::debug!("Survey {} could not drain late answers: {e}", self.id);
                        break;
                    }
                }
            }
            self.readahead.clear();
        }
        self.survey_until = Instant::now().checked_add(deadline);
        if self.survey_until.is_none() {
            log::debug!("Survey deadline of {} is unbounded", self.id);
        }
    }

    fn write(&mut self, data: &[u8], mode: Mode) -> Result<Progress<usize>> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(Progress::Ready(0));
        }
        let deadline = match self.pattern {
            Pattern::Survey => self.options.survey_deadline,
            _ => None,
        };
        if let Some(deadline) = deadline {
            self.start_survey(deadline);
        }
        self.transport.send(self.id, data, mode)
    }

    fn natural_interest(&self) -> Interest {
        match self.phase {
            Phase::Listening => Interest::Accept,
            _ if !self.pattern.can_read() => Interest::Write,
            _ => Interest::Read,
        }
    }

    fn wait(&mut self, interest: Interest, timeout: Option<Duration>) -> Result<Readiness> {
        self.ensure_open()?;
        let settled = !self.readahead.is_empty() || self.eof != Eof::Open || self.survey_expired();
        if interest == Interest::Read && settled {
            return Ok(Readiness::Ready);
        }
        self.transport.wait(self.id, interest, timeout)
    }

    fn peer_count(&mut self) -> Result<usize> {
        self.ensure_open()?;
        self.transport.peer_count(self.id)
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .field("local_port", &self.local_port)
            .finish()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.phase != Phase::Closed {
            if let Err(e) = self.transport.release(self.id) {
                log::warn!("Failed to release {} endpoint {}: {e}", self.pattern, self.id);
            }
        }
    }
}

/// Access to the core of a handle. Implemented by the handle types of this crate only.
pub trait HasCore {
    #[doc(hidden)]
    fn core(&self) -> &Core;
    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut Core;
    #[doc(hidden)]
    fn from_core(core: Core) -> Self
    where
        Self: Sized;
}

/// Operations available on every handle.
pub trait Handle: HasCore {
    /// Identifier of the underlying transport endpoint.
    fn id(&self) -> EndpointId {
        self.core().id
    }

    /// Pattern the handle was created with.
    fn pattern(&self) -> Pattern {
        self.core().pattern
    }

    /// Current blocking mode.
    fn mode(&self) -> Mode {
        self.core().mode
    }

    /// Current lifecycle phase.
    fn phase(&self) -> Phase {
        self.core().phase
    }

    /// Sets whether subsequent `read`, `write` and `accept` calls suspend.
    ///
    /// Fails with `UnsupportedMode` if the transport endpoint cannot operate in
    /// `mode`; the previous mode stays in effect.
    fn set_blocking_mode(&mut self, mode: Mode) -> Result<()> {
        self.core_mut().set_mode(mode)
    }

    /// Waits until the handle's natural operation would not suspend: `accept`
    /// for listeners, `write` for write-only handles, `read` otherwise.
    ///
    /// A zero timeout polls once. `Timeout` is an outcome, not an error. A
    /// timeout too large to represent waits forever.
    fn wait_ready(&mut self, seconds: u64, microseconds: u32) -> Result<Readiness> {
        let timeout = Duration::from_secs(seconds).checked_add(Duration::from_micros(u64::from(microseconds)));
        let interest = self.core().natural_interest();
        self.core_mut().wait(interest, timeout)
    }

    /// Waits for a specific interest; `None` waits forever.
    fn wait_ready_for(&mut self, interest: Interest, timeout: Option<Duration>) -> Result<Readiness> {
        self.core_mut().wait(interest, timeout)
    }

    /// Suspends until data can be read or the connection fails.
    fn wait_until_data_available(&mut self) -> Result<()> {
        loop {
            if self.core_mut().wait(Interest::Read, None)? == Readiness::Ready {
                return Ok(());
            }
        }
    }

    /// Releases the transport endpoint.
    fn destroy(mut self) -> Result<()>
    where
        Self: Sized,
    {
        self.core_mut().release()
    }
}

/// Handles that originate connections.
pub trait Connectable: Handle {
    /// Attaches the handle to `addr:port`. Reachability is only known on first I/O.
    fn connect(&mut self, addr: &str, port: u16) -> Result<()> {
        self.core_mut().connect(addr, port)
    }
}

/// Handles that listen and accept per-peer handles.
pub trait Listenable: Handle {
    /// Handle type produced by `accept`.
    type Peer: Handle;

    /// Binds to `port` (0 picks an ephemeral port) and starts listening with at
    /// most `backlog` pending connections.
    fn bind_and_listen(&mut self, port: u16, backlog: i32) -> Result<()> {
        self.core_mut().bind_and_listen(port, backlog)
    }

    /// Takes a pending connection, suspending according to `mode`. The listener
    /// stays open; the new handle starts in blocking mode.
    fn accept(&mut self, mode: Mode) -> Result<Self::Peer> {
        let core = self.core_mut().accept(mode)?.into_result()?;
        Ok(Self::Peer::from_core(core))
    }

    /// Takes a pending connection if there is one, never suspending.
    fn try_accept(&mut self) -> Result<Progress<Self::Peer>> {
        Ok(self.core_mut().accept(Mode::NonBlocking)?.map(Self::Peer::from_core))
    }

    /// Port the handle is listening on.
    fn local_port(&self) -> Option<u16> {
        self.core().local_port
    }
}

/// Broadcast handles established by a single bind step.
pub trait Bindable: Handle {
    /// Binds to `port` (0 picks an ephemeral port); peers attach on their own.
    fn bind(&mut self, port: u16) -> Result<()> {
        self.core_mut().bind(port)
    }

    /// Port the handle is bound to.
    fn local_port(&self) -> Option<u16> {
        self.core().local_port
    }

    /// Number of attached peers, after admitting any pending ones.
    fn peer_count(&mut self) -> Result<usize> {
        self.core_mut().peer_count()
    }
}

/// Handles data can be read from.
pub trait Readable: Handle {
    /// Reads up to `buf.len()` bytes in the handle's mode.
    ///
    /// `Ok(0)` on a non-empty buffer reports an orderly shutdown by the peer,
    /// once; later reads fail with a connection error. In non-blocking mode an
    /// empty transport yields `Err(SocketError::WouldBlock)`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mode = self.mode();
        self.core_mut().read(buf, mode)?.into_result()
    }

    /// Reads without ever suspending, whatever the handle's mode.
    fn try_read(&mut self, buf: &mut [u8]) -> Result<Progress<usize>> {
        self.core_mut().read(buf, Mode::NonBlocking)
    }

    /// Reads up to and excluding `terminator`, consuming it.
    ///
    /// Returns `None` once the peer has closed and nothing is left. A partial
    /// line at peer close is returned as is. A transport failure discards the
    /// partial line; a `WouldBlock` keeps it for the next call.
    fn readline(&mut self, terminator: &[u8]) -> Result<Option<Vec<u8>>> {
        let mode = self.mode();
        self.core_mut().readline(terminator, mode)?.into_result()
    }

    /// `readline` that never suspends.
    fn try_readline(&mut self, terminator: &[u8]) -> Result<Progress<Option<Vec<u8>>>> {
        self.core_mut().readline(terminator, Mode::NonBlocking)
    }
}

/// Handles data can be written to.
pub trait Writable: Handle {
    /// Writes up to `data.len()` bytes in the handle's mode and returns how many
    /// were taken. Stream handles may write short; broadcast handles always take
    /// everything and drop it for peers that are too far behind.
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mode = self.mode();
        self.core_mut().write(data, mode)?.into_result()
    }

    /// Writes without ever suspending, whatever the handle's mode.
    fn try_write(&mut self, data: &[u8]) -> Result<Progress<usize>> {
        self.core_mut().write(data, Mode::NonBlocking)
    }

    /// Writes all of `data`, retrying short writes.
    ///
    /// Meant for blocking mode: a `WouldBlock` part way through does not tell
    /// how much was taken. Use `try_write` to drive non-blocking handles.
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.write(data)? {
                0 => return Err(SocketError::connection(ErrorKind::WriteZero, "peer took no bytes")),
                n => data = &data[n..],
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{Publish, Reply, Request, Subscribe, Survey};
    use crate::transport::fake::FakeTransport;

    fn fake(limit: usize) -> (Arc<FakeTransport>, Context) {
        fake_with(limit, SocketOptions::default())
    }

    fn fake_with(limit: usize, options: SocketOptions) -> (Arc<FakeTransport>, Context) {
        let transport = Arc::new(FakeTransport::new(limit));
        let ctx = Context::with_transport(transport.clone(), options);
        (transport, ctx)
    }

    fn connected(ctx: &Context) -> crate::socket::Socket<Request> {
        let mut req = ctx.socket::<Request>().unwrap();
        req.connect("127.0.0.1", 5000).unwrap();
        req
    }

    #[test]
    fn create_destroy_cycles_do_not_leak() {
        let (transport, ctx) = fake(4);
        for _ in 0..1000 {
            for pattern in Pattern::ALL {
                ctx.open(pattern).unwrap().destroy().unwrap();
            }
        }
        assert_eq!(transport.live(), 0);
    }

    #[test]
    fn dropped_handles_release_their_endpoint() {
        let (transport, ctx) = fake(1);
        for _ in 0..10 {
            let _sub = ctx.socket::<Subscribe>().unwrap();
        }
        assert_eq!(transport.live(), 0);
    }

    #[test]
    fn exhausted_transport_fails_allocation() {
        let (_transport, ctx) = fake(1);
        let _held = ctx.socket::<Request>().unwrap();
        assert!(matches!(ctx.socket::<Request>(), Err(SocketError::Allocation(_))));
    }

    #[test]
    fn second_release_fails() {
        let (transport, ctx) = fake(4);
        let req = ctx.socket::<Request>().unwrap();
        let id = req.id();
        req.destroy().unwrap();
        assert!(matches!(transport.release(id), Err(SocketError::AlreadyReleased(x)) if x == id));

        let mut core = Core::new(&ctx, Pattern::Other).unwrap();
        core.release().unwrap();
        assert!(matches!(core.release(), Err(SocketError::AlreadyReleased(_))));
        assert!(matches!(core.read(&mut [0u8; 4], Mode::Blocking), Err(SocketError::AlreadyReleased(_))));
    }

    #[test]
    fn readline_excludes_and_consumes_terminator() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        transport.feed(req.id(), b"abc\nrest");
        assert_eq!(req.readline(b"\n").unwrap(), Some(b"abc".to_vec()));

        let mut buf = [0u8; 16];
        let n = req.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"rest");
    }

    #[test]
    fn readline_handles_split_and_multibyte_terminators() {
        let (transport, ctx) = fake_with(4, SocketOptions::default().with_read_chunk(3));
        let mut req = connected(&ctx);
        transport.feed(req.id(), b"hel");
        transport.feed(req.id(), b"lo\r");
        transport.feed(req.id(), b"\nworld\r\n");
        assert_eq!(req.readline(b"\r\n").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(req.readline(b"\r\n").unwrap(), Some(b"world".to_vec()));
    }

    #[test]
    fn readline_returns_partial_line_then_reports_close() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        transport.feed(req.id(), b"tail");
        transport.feed_eof(req.id());
        assert_eq!(req.readline(b"\n").unwrap(), Some(b"tail".to_vec()));
        assert_eq!(req.readline(b"\n").unwrap(), None);
        assert!(matches!(req.readline(b"\n"), Err(SocketError::Connection(_))));
    }

    #[test]
    fn readline_discards_partial_line_on_failure() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        transport.feed(req.id(), b"half");
        transport.feed_failure(req.id());
        assert!(matches!(req.readline(b"\n"), Err(SocketError::Connection(_))));
        transport.feed(req.id(), b"next\n");
        assert_eq!(req.readline(b"\n").unwrap(), Some(b"next".to_vec()));
    }

    #[test]
    fn readline_keeps_partial_line_across_would_block() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        req.set_blocking_mode(Mode::NonBlocking).unwrap();
        transport.feed(req.id(), b"par");
        assert!(matches!(req.readline(b"\n"), Err(SocketError::WouldBlock)));
        transport.feed(req.id(), b"tial\n");
        assert_eq!(req.readline(b"\n").unwrap(), Some(b"partial".to_vec()));
    }

    #[test]
    fn readline_rejects_empty_terminator_and_overlong_lines() {
        let (transport, ctx) = fake_with(4, SocketOptions::default().with_max_line_len(8));
        let mut req = connected(&ctx);
        assert!(matches!(req.readline(b""), Err(SocketError::InvalidArgument(_))));
        transport.feed(req.id(), b"0123456789abcdef");
        assert!(matches!(req.readline(b"\n"), Err(SocketError::LineTooLong(8))));
    }

    #[test]
    fn orderly_shutdown_reads_zero_exactly_once() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        transport.feed(req.id(), b"bye");
        transport.feed_eof(req.id());
        let mut buf = [0u8; 8];
        assert_eq!(req.read(&mut buf).unwrap(), 3);
        assert_eq!(req.read(&mut buf).unwrap(), 0);
        assert!(matches!(req.read(&mut buf), Err(SocketError::Connection(_))));
    }

    #[test]
    fn non_blocking_io_reports_would_block() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        req.set_blocking_mode(Mode::NonBlocking).unwrap();
        assert_eq!(req.mode(), Mode::NonBlocking);

        let mut buf = [0u8; 8];
        assert!(matches!(req.read(&mut buf), Err(SocketError::WouldBlock)));
        assert_eq!(req.try_read(&mut buf).unwrap(), Progress::WouldBlock);

        transport.set_send_capacity(req.id(), 2);
        assert_eq!(req.write(b"ping").unwrap(), 2);
        assert!(matches!(req.write(b"ng"), Err(SocketError::WouldBlock)));
        assert_eq!(transport.sent(req.id()), b"pi");
    }

    #[test]
    fn zero_timeout_wait_polls_once() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        assert_eq!(req.wait_ready(0, 0).unwrap(), Readiness::Timeout);
        transport.feed(req.id(), b"x");
        assert_eq!(req.wait_ready(0, 0).unwrap(), Readiness::Ready);
        req.wait_until_data_available().unwrap();
    }

    #[test]
    fn oversized_timeout_waits_forever() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        // With nothing queued the fake refuses an unbounded wait instead of hanging.
        assert!(matches!(req.wait_ready(u64::MAX, 999_999), Err(SocketError::Connection(_))));
        transport.feed(req.id(), b"x");
        assert_eq!(req.wait_ready(u64::MAX, 999_999).unwrap(), Readiness::Ready);
    }

    #[test]
    fn write_all_retries_short_writes() {
        let (transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        transport.set_send_chunk(req.id(), 3);
        assert_eq!(req.write(b"hello world").unwrap(), 3);
        req.write_all(b"lo world").unwrap();
        assert_eq!(transport.sent(req.id()), b"hello world");
    }

    #[test]
    fn orphaned_survey_revives_on_reconnect() {
        let (transport, ctx) = fake(4);
        let mut survey = ctx.socket::<Survey>().unwrap();
        survey.connect("127.0.0.1", 7000).unwrap();
        transport.feed_eof(survey.id());
        let mut buf = [0u8; 8];
        assert_eq!(survey.read(&mut buf).unwrap(), 0);
        assert!(matches!(survey.read(&mut buf), Err(SocketError::Connection(_))));

        survey.connect("127.0.0.1", 7001).unwrap();
        transport.feed(survey.id(), b"here\n");
        assert_eq!(survey.readline(b"\n").unwrap(), Some(b"here".to_vec()));
    }

    #[test]
    fn survey_reads_expire_after_the_deadline() {
        let options = SocketOptions::default().with_survey_deadline(Duration::from_millis(50));
        let (transport, ctx) = fake_with(4, options);
        let mut survey = ctx.socket::<Survey>().unwrap();
        survey.connect("127.0.0.1", 7000).unwrap();

        // No survey written yet: reads are not bounded.
        transport.feed(survey.id(), b"early\n");
        assert_eq!(survey.readline(b"\n").unwrap(), Some(b"early".to_vec()));

        survey.write(b"anyone?\n").unwrap();
        transport.feed(survey.id(), b"me\n");
        assert_eq!(survey.readline(b"\n").unwrap(), Some(b"me".to_vec()));
        // Nothing else arrives within the window.
        assert!(matches!(survey.readline(b"\n"), Err(SocketError::SurveyExpired)));

        std::thread::sleep(Duration::from_millis(60));
        transport.feed(survey.id(), b"late\n");
        assert!(matches!(survey.readline(b"\n"), Err(SocketError::SurveyExpired)));
        assert_eq!(survey.wait_ready(0, 0).unwrap(), Readiness::Ready);

        // A new survey drops the late answer and opens a fresh window.
        survey.write(b"again?\n").unwrap();
        transport.feed(survey.id(), b"me too\n");
        assert_eq!(survey.readline(b"\n").unwrap(), Some(b"me too".to_vec()));
        assert_eq!(transport.sent(survey.id()), b"anyone?\nagain?\n");
    }

    #[test]
    fn unsupported_mode_keeps_previous_mode() {
        let (transport, ctx) = fake(4);
        let mut publisher = ctx.socket::<Publish>().unwrap();
        transport.reject_mode(publisher.id(), Mode::NonBlocking);
        assert!(matches!(
            publisher.set_blocking_mode(Mode::NonBlocking),
            Err(SocketError::UnsupportedMode { mode: Mode::NonBlocking, pattern: Pattern::Publish })
        ));
        assert_eq!(publisher.mode(), Mode::Blocking);
    }

    #[test]
    fn accept_requires_listening() {
        let (transport, ctx) = fake(4);
        let mut rep = ctx.socket::<Reply>().unwrap();
        assert!(matches!(rep.accept(Mode::NonBlocking), Err(SocketError::NotListening)));
        assert!(matches!(rep.bind_and_listen(5000, 0), Err(SocketError::InvalidBacklog(0))));

        rep.bind_and_listen(5000, 1).unwrap();
        assert_eq!(rep.phase(), Phase::Listening);
        assert_eq!(rep.local_port(), Some(5000));
        assert!(matches!(rep.try_accept().unwrap(), Progress::WouldBlock));

        transport.queue_connection(rep.id());
        let peer = rep.accept(Mode::Blocking).unwrap();
        assert_eq!(peer.pattern(), Pattern::Reply);
        assert_eq!(peer.phase(), Phase::Connected);
        assert_ne!(peer.id(), rep.id());
        assert_eq!(rep.phase(), Phase::Listening);
    }

    #[test]
    fn establishment_happens_once() {
        let (_transport, ctx) = fake(4);
        let mut req = connected(&ctx);
        assert!(matches!(req.connect("127.0.0.1", 5001), Err(SocketError::ConnectFailure { .. })));

        let mut publisher = ctx.bind::<Publish>(6000).unwrap();
        assert_eq!(publisher.phase(), Phase::Bound);
        assert!(matches!(publisher.bind(6001), Err(SocketError::BindFailure { port: 6001, .. })));

        let mut survey = ctx.socket::<Survey>().unwrap();
        survey.connect("127.0.0.1", 7000).unwrap();
        survey.connect("127.0.0.1", 7001).unwrap();

        let mut bound = ctx.bind::<Survey>(7002).unwrap();
        assert!(matches!(bound.connect("127.0.0.1", 7003), Err(SocketError::ConnectFailure { .. })));
    }

    #[test]
    fn default_mode_comes_from_options() {
        let (_transport, ctx) = fake_with(4, SocketOptions::default().with_default_mode(Mode::NonBlocking));
        let req = ctx.socket::<Request>().unwrap();
        assert_eq!(req.mode(), Mode::NonBlocking);
    }
}
