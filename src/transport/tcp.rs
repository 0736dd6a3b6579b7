//! The TCP transport.
//!
//! Every endpoint owns a `polling::Poller` and a `Link` describing what the
//! endpoint is attached to. OS sockets never block; the blocking flavour of an
//! operation parks on the poller, and releasing the endpoint wakes it.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use polling::{Event, Events, Poller};
use socket2::{Domain, Protocol, Socket, Type};

use super::fanout::{self, Fanout, PRIMARY_KEY};
use super::{EndpointId, Interest, Transport};
use crate::error::{Progress, Readiness, Result, SocketError};
use crate::options::{Mode, SocketOptions};
use crate::pattern::Pattern;

/// Backlog used by the single-step bind of broadcast endpoints.
const BROADCAST_BACKLOG: i32 = 128;

enum Link {
    Idle,
    Stream(TcpStream),
    Listener(TcpListener),
    Fanout(Fanout),
}

struct Endpoint {
    id: EndpointId,
    pattern: Pattern,
    poller: Poller,
    released: AtomicBool,
    link: Mutex<Link>,
}

enum Wake {
    Events,
    Spurious,
    TimedOut,
}

impl Endpoint {
    fn new(id: EndpointId, pattern: Pattern) -> io::Result<Self> {
        Ok(Endpoint {
            id,
            pattern,
            poller: Poller::new()?,
            released: AtomicBool::new(false),
            link: Mutex::new(Link::Idle),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(SocketError::connection(
                ErrorKind::ConnectionAborted,
                format!("endpoint {} released while in use", self.id),
            ));
        }
        Ok(())
    }

    /// Suspends on the poller until an armed source fires, a release wakes us,
    /// or the deadline passes.
    fn park(&self, events: &mut Events, deadline: Option<Instant>) -> Result<Wake> {
        self.check_open()?;
        events.clear();
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match self.poller.wait(events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(Wake::Spurious),
            Err(e) => return Err(e.into()),
        }
        self.check_open()?;
        if !events.is_empty() {
            Ok(Wake::Events)
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Ok(Wake::TimedOut)
        } else {
            Ok(Wake::Spurious)
        }
    }

    /// Waits for a single source to become readable or writable.
    fn wait_source(
        &self,
        source: impl polling::AsSource + Copy,
        read: bool,
        deadline: Option<Instant>,
    ) -> Result<Readiness> {
        let mut events = Events::new();
        loop {
            self.poller.modify(source, fanout::interest(PRIMARY_KEY, read, !read))?;
            match self.park(&mut events, deadline)? {
                Wake::Events => return Ok(Readiness::Ready),
                Wake::TimedOut => return Ok(Readiness::Timeout),
                Wake::Spurious => {}
            }
        }
    }

    fn wait_fanout(&self, fan: &mut Fanout, interest: Interest, deadline: Option<Instant>) -> Result<Readiness> {
        let mut events = Events::new();
        loop {
            match interest {
                Interest::Write => {
                    fan.flush_all(&self.poller);
                    return Ok(Readiness::Ready);
                }
                Interest::Read if fan.readable(&self.poller) || fan.is_orphaned() => return Ok(Readiness::Ready),
                Interest::Read => {}
                Interest::Accept => return Err(SocketError::NotListening),
            }
            fan.arm(&self.poller, true)?;
            if let Wake::TimedOut = self.park(&mut events, deadline)? {
                return Ok(Readiness::Timeout);
            }
        }
    }
}

fn not_connected(what: &str) -> SocketError {
    SocketError::connection(ErrorKind::NotConnected, what)
}

fn in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    e.kind() == ErrorKind::WouldBlock
}

fn resolve(addr: &str, port: u16) -> Result<SocketAddr> {
    let shown = format!("{addr}:{port}");
    if addr.trim().is_empty() || port == 0 {
        return Err(SocketError::InvalidAddress(shown));
    }
    (addr.trim(), port)
        .to_socket_addrs()
        .map_err(|_| SocketError::InvalidAddress(shown.clone()))?
        .next()
        .ok_or(SocketError::InvalidAddress(shown))
}

fn open_stream(remote: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&remote.into()) {
        Ok(()) => {}
        Err(e) if in_progress(&e) => log::debug!("Connection to {remote} in progress"),
        Err(e) => return Err(e),
    }
    let stream: TcpStream = socket.into();
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

fn open_listener(ip: IpAddr, port: u16, backlog: i32) -> io::Result<TcpListener> {
    let local = SocketAddr::new(ip, port);
    let socket = Socket::new(Domain::for_address(local), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&local.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// A [`Transport`] over TCP.
///
/// All OS sockets are non-blocking; the blocking flavour of every call waits on
/// the endpoint's own `polling::Poller`, so a suspended call never holds a lock
/// another endpoint needs. Local endpoints are confined to the loopback
/// interface.
///
/// Releasing an endpoint while another thread is suspended on it wakes that
/// thread, whose call then fails with a `ConnectionAborted` connection error.
pub struct TcpTransport {
    endpoints: Mutex<HashMap<EndpointId, Arc<Endpoint>>>,
    next_id: AtomicU64,
    max_endpoints: usize,
    high_water: usize,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(&SocketOptions::default())
    }
}

impl TcpTransport {
    /// Creates a transport honoring the endpoint and fan-out limits of `options`.
    pub fn new(options: &SocketOptions) -> Self {
        TcpTransport {
            endpoints: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_endpoints: options.max_endpoints,
            high_water: options.fanout_high_water,
        }
    }

    /// Number of live endpoints.
    pub fn live_endpoints(&self) -> usize {
        self.endpoints.lock().len()
    }

    fn endpoint(&self, id: EndpointId) -> Result<Arc<Endpoint>> {
        self.endpoints
            .lock()
            .get(&id)
            .cloned()
            .ok_or(SocketError::AlreadyReleased(id))
    }

    fn register(&self, pattern: Pattern, link: Link) -> Result<EndpointId> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.len() >= self.max_endpoints {
            return Err(SocketError::Allocation(format!(
                "limit of {} live endpoints reached",
                self.max_endpoints
            )));
        }
        let id = EndpointId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let endpoint = Endpoint::new(id, pattern).map_err(|e| SocketError::Allocation(e.to_string()))?;
        if let Link::Stream(stream) = &link {
            unsafe {
                endpoint
                    .poller
                    .add(stream, Event::none(PRIMARY_KEY))
                    .map_err(|e| SocketError::Allocation(e.to_string()))?;
            }
        }
        *endpoint.link.lock() = link;
        endpoints.insert(id, Arc::new(endpoint));
        log::debug!("Allocated {pattern} endpoint {id}");
        Ok(id)
    }
}

impl Transport for TcpTransport {
    fn allocate(&self, pattern: Pattern) -> Result<EndpointId> {
        self.register(pattern, Link::Idle)
    }

    fn connect(&self, id: EndpointId, addr: &str, port: u16) -> Result<()> {
        let ep = self.endpoint(id)?;
        let shown = format!("{addr}:{port}");
        let refuse = |reason: String| SocketError::ConnectFailure { addr: shown.clone(), reason };
        if !ep.pattern.can_connect() {
            return Err(refuse(format!("{} endpoints cannot connect", ep.pattern)));
        }
        let remote = resolve(addr, port)?;
        if ep.pattern == Pattern::Local && !remote.ip().is_loopback() {
            return Err(SocketError::InvalidAddress(format!("{shown} is not a loopback address")));
        }

        let mut link = ep.link.lock();
        match (&*link, ep.pattern) {
            (Link::Idle, _) | (Link::Fanout(_), Pattern::Survey) => {}
            _ => return Err(refuse("endpoint is already established".to_string())),
        }
        let stream = open_stream(remote).map_err(|e| refuse(e.to_string()))?;
        log::debug!("Endpoint {id} connecting to {remote}");

        if ep.pattern == Pattern::Survey {
            if let Link::Idle = &*link {
                *link = Link::Fanout(Fanout::new(None, self.high_water));
            }
            if let Link::Fanout(fan) = &mut *link {
                fan.add_peer(&ep.poller, stream).map_err(|e| refuse(e.to_string()))?;
            }
        } else {
            unsafe {
                ep.poller
                    .add(&stream, Event::none(PRIMARY_KEY))
                    .map_err(|e| refuse(e.to_string()))?;
            }
            *link = Link::Stream(stream);
        }
        Ok(())
    }

    fn listen(&self, id: EndpointId, port: u16, backlog: u32) -> Result<u16> {
        let ep = self.endpoint(id)?;
        let refuse = |reason: String| SocketError::BindFailure { port, reason };
        if !ep.pattern.can_listen() {
            return Err(refuse(format!("{} endpoints cannot listen", ep.pattern)));
        }
        let mut link = ep.link.lock();
        if !matches!(&*link, Link::Idle) {
            return Err(refuse("endpoint is already established".to_string()));
        }
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        let listener = open_listener(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port, backlog)
            .map_err(|e| refuse(e.to_string()))?;
        let bound = listener.local_addr().map_err(|e| refuse(e.to_string()))?.port();
        unsafe {
            ep.poller
                .add(&listener, Event::none(PRIMARY_KEY))
                .map_err(|e| refuse(e.to_string()))?;
        }
        *link = Link::Listener(listener);
        log::debug!("Endpoint {id} listening on port {bound} (backlog {backlog})");
        Ok(bound)
    }

    fn bind(&self, id: EndpointId, port: u16) -> Result<u16> {
        let ep = self.endpoint(id)?;
        let refuse = |reason: String| SocketError::BindFailure { port, reason };
        if !ep.pattern.can_bind() {
            return Err(refuse(format!("{} endpoints cannot bind", ep.pattern)));
        }
        let mut link = ep.link.lock();
        if !matches!(&*link, Link::Idle) {
            return Err(refuse("endpoint is already established".to_string()));
        }
        let ip = match ep.pattern {
            Pattern::Local => IpAddr::V4(Ipv4Addr::LOCALHOST),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let listener = open_listener(ip, port, BROADCAST_BACKLOG).map_err(|e| refuse(e.to_string()))?;
        let bound = listener.local_addr().map_err(|e| refuse(e.to_string()))?.port();
        unsafe {
            ep.poller
                .add(&listener, Event::none(PRIMARY_KEY))
                .map_err(|e| refuse(e.to_string()))?;
        }
        *link = Link::Fanout(Fanout::new(Some(listener), self.high_water));
        log::debug!("Endpoint {id} bound on port {bound}");
        Ok(bound)
    }

    fn accept(&self, id: EndpointId, mode: Mode) -> Result<Progress<EndpointId>> {
        let ep = self.endpoint(id)?;
        let accepted = ep.pattern.accepted_pattern().ok_or(SocketError::NotListening)?;
        let link = ep.link.lock();
        let Link::Listener(listener) = &*link else {
            return Err(SocketError::NotListening);
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(true)?;
                    let _ = stream.set_nodelay(true);
                    let peer = self.register(accepted, Link::Stream(stream))?;
                    log::debug!("Endpoint {id} accepted {addr} as {peer}");
                    return Ok(Progress::Ready(peer));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if mode == Mode::NonBlocking {
                        return Ok(Progress::WouldBlock);
                    }
                    ep.wait_source(listener, true, None)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&self, id: EndpointId, data: &[u8], mode: Mode) -> Result<Progress<usize>> {
        let ep = self.endpoint(id)?;
        if !ep.pattern.can_write() {
            return Err(SocketError::connection(
                ErrorKind::Unsupported,
                format!("{} endpoints cannot write", ep.pattern),
            ));
        }
        let mut link = ep.link.lock();
        match &mut *link {
            Link::Idle => Err(not_connected("endpoint is not connected")),
            Link::Listener(_) => Err(not_connected("listening endpoints do not carry data")),
            Link::Fanout(fan) => Ok(Progress::Ready(fan.broadcast(&ep.poller, data))),
            Link::Stream(stream) => loop {
                match (&*stream).write(data) {
                    Ok(n) => return Ok(Progress::Ready(n)),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) if fanout::is_transient(e.kind()) => {
                        if mode == Mode::NonBlocking {
                            return Ok(Progress::WouldBlock);
                        }
                        ep.wait_source(&*stream, false, None)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            },
        }
    }

    fn recv(&self, id: EndpointId, buf: &mut [u8], mode: Mode) -> Result<Progress<usize>> {
        let ep = self.endpoint(id)?;
        if !ep.pattern.can_read() {
            return Err(SocketError::connection(
                ErrorKind::Unsupported,
                format!("{} endpoints cannot read", ep.pattern),
            ));
        }
        let mut link = ep.link.lock();
        match &mut *link {
            Link::Idle => Err(not_connected("endpoint is not connected")),
            Link::Listener(_) => Err(not_connected("listening endpoints do not carry data")),
            Link::Fanout(fan) => {
                let mut events = Events::new();
                loop {
                    if let Some(n) = fan.receive(&ep.poller, buf) {
                        return Ok(Progress::Ready(n));
                    }
                    if fan.is_orphaned() {
                        return Ok(Progress::Ready(0));
                    }
                    if mode == Mode::NonBlocking {
                        return Ok(Progress::WouldBlock);
                    }
                    fan.arm(&ep.poller, true)?;
                    ep.park(&mut events, None)?;
                }
            }
            Link::Stream(stream) => loop {
                match (&*stream).read(buf) {
                    Ok(n) => return Ok(Progress::Ready(n)),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) if fanout::is_transient(e.kind()) => {
                        if mode == Mode::NonBlocking {
                            return Ok(Progress::WouldBlock);
                        }
                        ep.wait_source(&*stream, true, None)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            },
        }
    }

    fn set_mode(&self, id: EndpointId, mode: Mode) -> Result<()> {
        let ep = self.endpoint(id)?;
        log::debug!("Endpoint {id} ({}) switched to {mode} mode", ep.pattern);
        Ok(())
    }

    fn wait(&self, id: EndpointId, interest: Interest, timeout: Option<Duration>) -> Result<Readiness> {
        let ep = self.endpoint(id)?;
        // A timeout past the representable horizon waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut link = ep.link.lock();
        match (&mut *link, interest) {
            (Link::Idle, _) => Err(not_connected("endpoint is not connected")),
            (Link::Listener(listener), Interest::Accept) => ep.wait_source(&*listener, true, deadline),
            (Link::Listener(_), _) => Err(not_connected("listening endpoints do not carry data")),
            (Link::Fanout(fan), interest) => ep.wait_fanout(fan, interest, deadline),
            (Link::Stream(_), Interest::Accept) => Err(SocketError::NotListening),
            (Link::Stream(stream), Interest::Read) => {
                let mut peeked = [0u8; 1];
                match stream.peek(&mut peeked) {
                    Err(e) if fanout::is_transient(e.kind()) => ep.wait_source(&*stream, true, deadline),
                    // Data, end of stream or a pending error: a read returns at once.
                    _ => Ok(Readiness::Ready),
                }
            }
            (Link::Stream(stream), Interest::Write) => ep.wait_source(&*stream, false, deadline),
        }
    }

    fn peer_count(&self, id: EndpointId) -> Result<usize> {
        let ep = self.endpoint(id)?;
        let mut link = ep.link.lock();
        Ok(match &mut *link {
            Link::Fanout(fan) => fan.peer_count(&ep.poller),
            Link::Stream(_) => 1,
            Link::Idle | Link::Listener(_) => 0,
        })
    }

    fn release(&self, id: EndpointId) -> Result<()> {
        let ep = self
            .endpoints
            .lock()
            .remove(&id)
            .ok_or(SocketError::AlreadyReleased(id))?;
        ep.released.store(true, Ordering::Release);
        if let Err(e) = ep.poller.notify() {
            log::warn!("Cannot wake waiters of endpoint {id}: {e}");
        }
        log::debug!("Released {} endpoint {id}", ep.pattern);
        Ok(())
    }
}
