//! Scripted in-memory transport for unit tests.
//!
//! Inbound data, peer shutdowns and failures are queued by the test; a call
//! that would have to suspend with nothing queued fails instead of hanging.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{EndpointId, Interest, Transport};
use crate::error::{Progress, Readiness, Result, SocketError};
use crate::options::Mode;
use crate::pattern::Pattern;

enum Inbound {
    Data(Vec<u8>),
    Eof,
    Fail,
}

struct FakeEndpoint {
    pattern: Pattern,
    listening: bool,
    inbound: VecDeque<Inbound>,
    sent: Vec<u8>,
    send_capacity: usize,
    send_chunk: usize,
    pending_accepts: usize,
    rejected_mode: Option<Mode>,
}

pub(crate) struct FakeTransport {
    endpoints: Mutex<HashMap<EndpointId, FakeEndpoint>>,
    next_id: AtomicU64,
    limit: usize,
}

fn would_suspend() -> SocketError {
    SocketError::connection(ErrorKind::TimedOut, "fake transport cannot suspend")
}

impl FakeTransport {
    pub(crate) fn new(limit: usize) -> Self {
        FakeTransport {
            endpoints: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            limit,
        }
    }

    fn with<T>(&self, id: EndpointId, f: impl FnOnce(&mut FakeEndpoint) -> Result<T>) -> Result<T> {
        let mut endpoints = self.endpoints.lock();
        let ep = endpoints.get_mut(&id).ok_or(SocketError::AlreadyReleased(id))?;
        f(ep)
    }

    fn script(&self, id: EndpointId, item: Inbound) {
        self.with(id, |ep| {
            ep.inbound.push_back(item);
            Ok(())
        })
        .expect("scripting a released endpoint");
    }

    pub(crate) fn feed(&self, id: EndpointId, data: &[u8]) {
        self.script(id, Inbound::Data(data.to_vec()));
    }

    pub(crate) fn feed_eof(&self, id: EndpointId) {
        self.script(id, Inbound::Eof);
    }

    pub(crate) fn feed_failure(&self, id: EndpointId) {
        self.script(id, Inbound::Fail);
    }

    pub(crate) fn sent(&self, id: EndpointId) -> Vec<u8> {
        self.with(id, |ep| Ok(ep.sent.clone())).expect("released endpoint")
    }

    pub(crate) fn set_send_capacity(&self, id: EndpointId, bytes: usize) {
        self.with(id, |ep| {
            ep.send_capacity = bytes;
            Ok(())
        })
        .expect("released endpoint");
    }

    /// Caps how much a single send takes, forcing short writes.
    pub(crate) fn set_send_chunk(&self, id: EndpointId, bytes: usize) {
        self.with(id, |ep| {
            ep.send_chunk = bytes;
            Ok(())
        })
        .expect("released endpoint");
    }

    pub(crate) fn queue_connection(&self, id: EndpointId) {
        self.with(id, |ep| {
            ep.pending_accepts += 1;
            Ok(())
        })
        .expect("released endpoint");
    }

    pub(crate) fn reject_mode(&self, id: EndpointId, mode: Mode) {
        self.with(id, |ep| {
            ep.rejected_mode = Some(mode);
            Ok(())
        })
        .expect("released endpoint");
    }

    pub(crate) fn live(&self) -> usize {
        self.endpoints.lock().len()
    }

    fn insert(&self, pattern: Pattern) -> Result<EndpointId> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.len() >= self.limit {
            return Err(SocketError::Allocation("fake transport exhausted".to_string()));
        }
        let id = EndpointId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        endpoints.insert(
            id,
            FakeEndpoint {
                pattern,
                listening: false,
                inbound: VecDeque::new(),
                sent: Vec::new(),
                send_capacity: usize::MAX,
                send_chunk: usize::MAX,
                pending_accepts: 0,
                rejected_mode: None,
            },
        );
        Ok(id)
    }
}

impl Transport for FakeTransport {
    fn allocate(&self, pattern: Pattern) -> Result<EndpointId> {
        self.insert(pattern)
    }

    fn connect(&self, id: EndpointId, _addr: &str, _port: u16) -> Result<()> {
        // A fresh peer means the endpoint is no longer at end of stream.
        self.with(id, |ep| {
            ep.inbound.retain(|item| !matches!(item, Inbound::Eof));
            Ok(())
        })
    }

    fn listen(&self, id: EndpointId, port: u16, _backlog: u32) -> Result<u16> {
        self.with(id, |ep| {
            ep.listening = true;
            Ok(if port == 0 { 40000 } else { port })
        })
    }

    fn bind(&self, id: EndpointId, port: u16) -> Result<u16> {
        self.with(id, |_| Ok(if port == 0 { 40001 } else { port }))
    }

    fn accept(&self, id: EndpointId, mode: Mode) -> Result<Progress<EndpointId>> {
        let pattern = self.with(id, |ep| {
            if !ep.listening {
                return Err(SocketError::NotListening);
            }
            if ep.pending_accepts == 0 {
                return Ok(None);
            }
            ep.pending_accepts -= 1;
            Ok(Some(ep.pattern))
        })?;
        match (pattern, mode) {
            (Some(p), _) => Ok(Progress::Ready(self.insert(p)?)),
            (None, Mode::NonBlocking) => Ok(Progress::WouldBlock),
            (None, Mode::Blocking) => Err(would_suspend()),
        }
    }

    fn send(&self, id: EndpointId, data: &[u8], mode: Mode) -> Result<Progress<usize>> {
        self.with(id, |ep| {
            let n = data.len().min(ep.send_capacity).min(ep.send_chunk);
            if n == 0 {
                return match mode {
                    Mode::NonBlocking => Ok(Progress::WouldBlock),
                    Mode::Blocking => Err(would_suspend()),
                };
            }
            ep.send_capacity -= n;
            ep.sent.extend_from_slice(&data[..n]);
            Ok(Progress::Ready(n))
        })
    }

    fn recv(&self, id: EndpointId, buf: &mut [u8], mode: Mode) -> Result<Progress<usize>> {
        self.with(id, |ep| match ep.inbound.pop_front() {
            Some(Inbound::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    ep.inbound.push_front(Inbound::Data(data.split_off(n)));
                }
                Ok(Progress::Ready(n))
            }
            Some(Inbound::Eof) => {
                ep.inbound.push_front(Inbound::Eof);
                Ok(Progress::Ready(0))
            }
            Some(Inbound::Fail) => Err(SocketError::connection(ErrorKind::ConnectionReset, "scripted failure")),
            None => match mode {
                Mode::NonBlocking => Ok(Progress::WouldBlock),
                Mode::Blocking => Err(would_suspend()),
            },
        })
    }

    fn set_mode(&self, id: EndpointId, mode: Mode) -> Result<()> {
        self.with(id, |ep| match ep.rejected_mode {
            Some(rejected) if rejected == mode => Err(SocketError::UnsupportedMode { mode, pattern: ep.pattern }),
            _ => Ok(()),
        })
    }

    fn wait(&self, id: EndpointId, interest: Interest, timeout: Option<Duration>) -> Result<Readiness> {
        self.with(id, |ep| {
            let ready = match interest {
                Interest::Read => !ep.inbound.is_empty(),
                Interest::Write => ep.send_capacity > 0,
                Interest::Accept => ep.pending_accepts > 0,
            };
            match (ready, timeout) {
                (true, _) => Ok(Readiness::Ready),
                (false, Some(_)) => Ok(Readiness::Timeout),
                (false, None) => Err(would_suspend()),
            }
        })
    }

    fn peer_count(&self, id: EndpointId) -> Result<usize> {
        self.with(id, |_| Ok(0))
    }

    fn release(&self, id: EndpointId) -> Result<()> {
        self.endpoints
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(SocketError::AlreadyReleased(id))
    }
}
