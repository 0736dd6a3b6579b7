//! Pattern-typed handles.
//!
//! `Socket<P>` is created by a [`Context`](crate::Context); `Connection<P>` is
//! what a listening `Socket<P>` hands out from `accept`. The capability traits
//! each type implements follow the pattern, so for instance
//! `Socket<Subscribe>` has no `accept` and `Socket<Publish>` has no `read`.

use std::fmt;
use std::io;
use std::marker::PhantomData;

use crate::error::Result;
use crate::handle::{Bindable, Connectable, Core, Handle, HasCore, Listenable, Readable, Writable};
use crate::pattern::Pattern;
use crate::transport::EndpointId;

mod private {
    pub trait Sealed {}
}

/// Type-level pattern marker.
pub trait Kind: private::Sealed + 'static {
    /// Runtime pattern of the marker.
    const PATTERN: Pattern;
}

macro_rules! kinds {
    ($($(#[$doc:meta])* $name:ident => $pattern:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum $name {}

            impl private::Sealed for $name {}

            impl Kind for $name {
                const PATTERN: Pattern = Pattern::$pattern;
            }
        )*
    };
}

kinds! {
    /// Request side of request/reply.
    Request => Request;
    /// Reply side of request/reply.
    Reply => Reply;
    /// Survey originator.
    Survey => Survey;
    /// Survey respondent.
    Respond => Respond;
    /// Broadcast publisher.
    Publish => Publish;
    /// Broadcast subscriber.
    Subscribe => Subscribe;
    /// Loopback-only channel.
    Local => Local;
    /// Raw stream.
    Other => Other;
}

/// A handle of pattern `K`.
pub struct Socket<K: Kind> {
    core: Core,
    _kind: PhantomData<K>,
}

/// A per-peer handle produced by accepting on a `Socket<K>`.
pub struct Connection<K: Kind> {
    core: Core,
    _kind: PhantomData<K>,
}

macro_rules! core_access {
    ($($ty:ident),*) => {
        $(
            impl<K: Kind> HasCore for $ty<K> {
                fn core(&self) -> &Core {
                    &self.core
                }

                fn core_mut(&mut self) -> &mut Core {
                    &mut self.core
                }

                fn from_core(core: Core) -> Self {
                    $ty { core, _kind: PhantomData }
                }
            }

            impl<K: Kind> Handle for $ty<K> {}

            impl<K: Kind> fmt::Debug for $ty<K> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($ty))
                        .field("id", &self.id())
                        .field("pattern", &self.pattern())
                        .field("mode", &self.mode())
                        .field("phase", &self.phase())
                        .finish()
                }
            }
        )*
    };
}

core_access!(Socket, Connection);

impl<K: Kind> Socket<K> {
    pub(crate) fn from_parts(core: Core) -> Self {
        debug_assert_eq!(core.pattern(), K::PATTERN);
        Socket::from_core(core)
    }
}

impl Connectable for Socket<Request> {}
impl Connectable for Socket<Survey> {}
impl Connectable for Socket<Respond> {}
impl Connectable for Socket<Subscribe> {}
impl Connectable for Socket<Local> {}
impl Connectable for Socket<Other> {}

impl Listenable for Socket<Reply> {
    type Peer = Connection<Reply>;
}
impl Listenable for Socket<Respond> {
    type Peer = Connection<Respond>;
}
impl Listenable for Socket<Other> {
    type Peer = Connection<Other>;
}

impl Bindable for Socket<Publish> {}
impl Bindable for Socket<Survey> {}
impl Bindable for Socket<Local> {}

impl Readable for Socket<Request> {}
impl Readable for Socket<Survey> {}
impl Readable for Socket<Respond> {}
impl Readable for Socket<Subscribe> {}
impl Readable for Socket<Local> {}
impl Readable for Socket<Other> {}
impl<K: Kind> Readable for Connection<K> {}

impl Writable for Socket<Request> {}
impl Writable for Socket<Survey> {}
impl Writable for Socket<Respond> {}
impl Writable for Socket<Publish> {}
impl Writable for Socket<Local> {}
impl Writable for Socket<Other> {}
impl<K: Kind> Writable for Connection<K> {}

macro_rules! std_io {
    ($($ty:ty),*) => {
        $(
            impl io::Read for $ty {
                fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                    Ok(Readable::read(self, buf)?)
                }
            }

            impl io::Write for $ty {
                fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                    Ok(Writable::write(self, buf)?)
                }

                fn flush(&mut self) -> io::Result<()> {
                    Ok(())
                }
            }
        )*
    };
}

std_io!(Socket<Request>, Socket<Survey>, Socket<Respond>, Socket<Local>, Socket<Other>);

impl<K: Kind> io::Read for Connection<K> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Readable::read(self, buf)?)
    }
}

impl<K: Kind> io::Write for Connection<K> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Writable::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A socket whose pattern is only known at run time.
#[derive(Debug)]
pub enum AnySocket {
    /// See [`Request`].
    Request(Socket<Request>),
    /// See [`Reply`].
    Reply(Socket<Reply>),
    /// See [`Survey`].
    Survey(Socket<Survey>),
    /// See [`Respond`].
    Respond(Socket<Respond>),
    /// See [`Publish`].
    Publish(Socket<Publish>),
    /// See [`Subscribe`].
    Subscribe(Socket<Subscribe>),
    /// See [`Local`].
    Local(Socket<Local>),
    /// See [`Other`].
    Other(Socket<Other>),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            AnySocket::Request($s) => $body,
            AnySocket::Reply($s) => $body,
            AnySocket::Survey($s) => $body,
            AnySocket::Respond($s) => $body,
            AnySocket::Publish($s) => $body,
            AnySocket::Subscribe($s) => $body,
            AnySocket::Local($s) => $body,
            AnySocket::Other($s) => $body,
        }
    };
}

impl AnySocket {
    pub(crate) fn from_core(core: Core) -> Self {
        match core.pattern() {
            Pattern::Request => AnySocket::Request(Socket::from_parts(core)),
            Pattern::Reply => AnySocket::Reply(Socket::from_parts(core)),
            Pattern::Survey => AnySocket::Survey(Socket::from_parts(core)),
            Pattern::Respond => AnySocket::Respond(Socket::from_parts(core)),
            Pattern::Publish => AnySocket::Publish(Socket::from_parts(core)),
            Pattern::Subscribe => AnySocket::Subscribe(Socket::from_parts(core)),
            Pattern::Local => AnySocket::Local(Socket::from_parts(core)),
            Pattern::Other => AnySocket::Other(Socket::from_parts(core)),
        }
    }

    /// Pattern of the wrapped socket.
    pub fn pattern(&self) -> Pattern {
        dispatch!(self, s => s.pattern())
    }

    /// Endpoint id of the wrapped socket.
    pub fn id(&self) -> EndpointId {
        dispatch!(self, s => s.id())
    }

    /// The wrapped socket as a plain handle.
    pub fn handle(&mut self) -> &mut dyn Handle {
        dispatch!(self, s => s as &mut dyn Handle)
    }

    /// The wrapped socket if it can connect.
    pub fn connectable(&mut self) -> Option<&mut dyn Connectable> {
        match self {
            AnySocket::Request(s) => Some(s as &mut dyn Connectable),
            AnySocket::Survey(s) => Some(s as &mut dyn Connectable),
            AnySocket::Respond(s) => Some(s as &mut dyn Connectable),
            AnySocket::Subscribe(s) => Some(s as &mut dyn Connectable),
            AnySocket::Local(s) => Some(s as &mut dyn Connectable),
            AnySocket::Other(s) => Some(s as &mut dyn Connectable),
            _ => None,
        }
    }

    /// The wrapped socket if it supports the single-step bind.
    pub fn bindable(&mut self) -> Option<&mut dyn Bindable> {
        match self {
            AnySocket::Publish(s) => Some(s as &mut dyn Bindable),
            AnySocket::Survey(s) => Some(s as &mut dyn Bindable),
            AnySocket::Local(s) => Some(s as &mut dyn Bindable),
            _ => None,
        }
    }

    /// The wrapped socket if it can be read.
    pub fn readable(&mut self) -> Option<&mut dyn Readable> {
        match self {
            AnySocket::Request(s) => Some(s as &mut dyn Readable),
            AnySocket::Survey(s) => Some(s as &mut dyn Readable),
            AnySocket::Respond(s) => Some(s as &mut dyn Readable),
            AnySocket::Subscribe(s) => Some(s as &mut dyn Readable),
            AnySocket::Local(s) => Some(s as &mut dyn Readable),
            AnySocket::Other(s) => Some(s as &mut dyn Readable),
            _ => None,
        }
    }

    /// The wrapped socket if it can be written.
    pub fn writable(&mut self) -> Option<&mut dyn Writable> {
        match self {
            AnySocket::Request(s) => Some(s as &mut dyn Writable),
            AnySocket::Survey(s) => Some(s as &mut dyn Writable),
            AnySocket::Respond(s) => Some(s as &mut dyn Writable),
            AnySocket::Publish(s) => Some(s as &mut dyn Writable),
            AnySocket::Local(s) => Some(s as &mut dyn Writable),
            AnySocket::Other(s) => Some(s as &mut dyn Writable),
            _ => None,
        }
    }

    /// Releases the wrapped socket.
    pub fn destroy(self) -> Result<()> {
        dispatch!(self, s => s.destroy())
    }
}
