//! One-to-many streams for publish, survey and bound local endpoints.
//!
//! Writes are queued per peer up to a high-water mark and dropped for peers
//! that fall behind. Reads take from peers in turn.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use polling::{Event, Poller};
use uuid::Uuid;

/// Poller key of the listening socket (or of the single stream of an endpoint).
pub(crate) const PRIMARY_KEY: usize = 0;

pub(crate) fn interest(key: usize, read: bool, write: bool) -> Event {
    match (read, write) {
        (true, true) => Event::all(key),
        (true, false) => Event::readable(key),
        (false, true) => Event::writable(key),
        (false, false) => Event::none(key),
    }
}

/// An error that only means "not yet": nothing is lost by trying again later.
/// A socket still completing its connect also reports `WouldBlock`.
pub(crate) fn is_transient(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

struct Peer {
    id: Uuid,
    key: usize,
    addr: Option<SocketAddr>,
    stream: TcpStream,
    outbox: VecDeque<u8>,
    dead: bool,
}

impl Peer {
    /// Writes as much of the outbox as the socket takes without blocking.
    fn flush(&mut self) {
        while !self.outbox.is_empty() && !self.dead {
            let (head, _) = self.outbox.as_slices();
            match (&self.stream).write(head) {
                Ok(0) => self.kill("peer stopped accepting data"),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_transient(e.kind()) => break,
                Err(e) => self.kill(&e.to_string()),
            }
        }
    }

    fn kill(&mut self, why: &str) {
        log::debug!("Dropping peer {} ({:?}): {why}", self.id, self.addr);
        self.dead = true;
    }
}

/// A set of peers that receive every write and are read round-robin.
///
/// Peers join either through the optional listener or through explicit
/// connects. Each peer has its own outbound queue bounded by `high_water`
/// bytes; a message that does not fit is dropped for that peer only, so a slow
/// peer never stalls the writer.
pub(crate) struct Fanout {
    listener: Option<TcpListener>,
    peers: Vec<Peer>,
    next_read: usize,
    next_key: usize,
    high_water: usize,
}

impl Fanout {
    pub(crate) fn new(listener: Option<TcpListener>, high_water: usize) -> Self {
        Fanout {
            listener,
            peers: Vec::new(),
            next_read: 0,
            next_key: PRIMARY_KEY + 1,
            high_water,
        }
    }

    pub(crate) fn add_peer(&mut self, poller: &Poller, stream: TcpStream) -> std::io::Result<()> {
        let key = self.next_key;
        self.next_key += 1;
        unsafe {
            poller.add(&stream, Event::none(key))?;
        }
        let peer = Peer {
            id: Uuid::new_v4(),
            key,
            addr: stream.peer_addr().ok(),
            stream,
            outbox: VecDeque::new(),
            dead: false,
        };
        log::debug!("Peer {} joined ({:?})", peer.id, peer.addr);
        self.peers.push(peer);
        Ok(())
    }

    /// Takes every pending connection off the listener.
    pub(crate) fn accept_pending(&mut self, poller: &Poller) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("Cannot make peer {addr} non-blocking: {e}");
                        continue;
                    }
                    if let Err(e) = self.add_peer(poller, stream) {
                        log::warn!("Cannot register peer {addr}: {e}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::warn!("Accept on broadcast listener failed: {e}");
                    return;
                }
            }
        }
    }

    fn reap(&mut self, poller: &Poller) {
        self.peers.retain(|p| {
            if p.dead {
                let _ = poller.delete(&p.stream);
            }
            !p.dead
        });
        if self.next_read >= self.peers.len() {
            self.next_read = 0;
        }
    }

    pub(crate) fn flush_all(&mut self, poller: &Poller) {
        for peer in self.peers.iter_mut() {
            peer.flush();
        }
        self.reap(poller);
    }

    /// Queues `data` for every peer with room left and flushes. Always consumes
    /// the whole buffer.
    pub(crate) fn broadcast(&mut self, poller: &Poller, data: &[u8]) -> usize {
        self.accept_pending(poller);
        for peer in self.peers.iter_mut() {
            peer.flush();
            if peer.dead {
                continue;
            }
            if !peer.outbox.is_empty() && peer.outbox.len() + data.len() > self.high_water {
                log::debug!(
                    "Peer {} is {} bytes behind, dropping a {} byte message",
                    peer.id,
                    peer.outbox.len(),
                    data.len()
                );
                continue;
            }
            peer.outbox.extend(data);
            peer.flush();
        }
        self.reap(poller);
        data.len()
    }

    /// Reads from the next peer that has data. `None` if no peer has any.
    pub(crate) fn receive(&mut self, poller: &Poller, buf: &mut [u8]) -> Option<usize> {
        self.accept_pending(poller);
        for peer in self.peers.iter_mut() {
            peer.flush();
        }
        let len = self.peers.len();
        let mut got = None;
        for i in 0..len {
            let idx = (self.next_read + i) % len;
            let peer = &mut self.peers[idx];
            if peer.dead {
                continue;
            }
            match (&peer.stream).read(buf) {
                Ok(0) => peer.kill("closed by remote peer"),
                Ok(n) => {
                    self.next_read = idx + 1;
                    got = Some(n);
                    break;
                }
                Err(e) if is_transient(e.kind()) => {}
                Err(e) => peer.kill(&e.to_string()),
            }
        }
        self.reap(poller);
        got
    }

    /// Whether some peer has data waiting, without consuming it.
    pub(crate) fn readable(&mut self, poller: &Poller) -> bool {
        self.accept_pending(poller);
        let mut peeked = [0u8; 1];
        let mut ready = false;
        for peer in self.peers.iter_mut() {
            match peer.stream.peek(&mut peeked) {
                Ok(0) => peer.kill("closed by remote peer"),
                Ok(_) => {
                    ready = true;
                    break;
                }
                Err(e) if is_transient(e.kind()) => {}
                Err(e) => peer.kill(&e.to_string()),
            }
        }
        self.reap(poller);
        ready
    }

    /// Arms the poller for new peers, for reads if `read`, and for pending writes.
    pub(crate) fn arm(&self, poller: &Poller, read: bool) -> std::io::Result<()> {
        if let Some(listener) = self.listener.as_ref() {
            poller.modify(listener, Event::readable(PRIMARY_KEY))?;
        }
        for peer in self.peers.iter() {
            poller.modify(&peer.stream, interest(peer.key, read, !peer.outbox.is_empty()))?;
        }
        Ok(())
    }

    /// No listener to admit new peers and no peer left: nothing can ever arrive.
    pub(crate) fn is_orphaned(&self) -> bool {
        self.listener.is_none() && self.peers.is_empty()
    }

    pub(crate) fn peer_count(&mut self, poller: &Poller) -> usize {
        self.accept_pending(poller);
        self.flush_all(poller);
        self.peers.len()
    }
}
