//! Per-connection session state.
//!
//! A session is created by its owning poller when a registration task is
//! drained, and destroyed when it is closed. Every method here is only
//! ever called from the owning poller's thread (handlers run on that
//! thread), which is why the interest flags and the attribute store need
//! no synchronization.

use std::any::Any;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::Interest;
use mio::net::TcpStream;

use crate::table::SessionId;

/// Read/write interest flags for one session.
///
/// Set and cleared idempotently by the handler; the owning poller applies
/// the flags to the channel's registration after the handler returns, so
/// changes take effect starting with the next wait cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct InterestSet {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl InterestSet {
    /// Maps the flags to a registration interest. `None` means the
    /// channel should not be registered at all (mio has no empty
    /// interest set).
    pub(crate) fn to_interest(self) -> Option<Interest> {
        match (self.read, self.write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// The reactor's handle on one open connection.
///
/// Owned by exactly one poller for its entire lifetime. Handlers drive
/// I/O through the [`io::Read`]/[`io::Write`] impls, switch readiness
/// interest with the `interest_*`/`uninterest_*` methods, and stash
/// per-connection state in the attribute store.
pub struct Session {
    id: SessionId,
    stream: TcpStream,
    peer: SocketAddr,
    interest: InterestSet,
    /// Interest currently applied to the multiplexer registration, if
    /// the channel is registered. Maintained by the owning poller.
    registration: Option<Interest>,
    ready_read: bool,
    ready_write: bool,
    closed: bool,
    attrs: HashMap<&'static str, Box<dyn Any + Send>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id,
            stream,
            peer,
            interest: InterestSet::default(),
            registration: None,
            ready_read: false,
            ready_write: false,
            closed: false,
            attrs: HashMap::new(),
        }
    }

    /// Handle identifying this session within its owning poller.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The remote peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the channel was reported read-ready for the dispatch call
    /// currently in progress. Meaningless outside a dispatch.
    pub fn is_readable(&self) -> bool {
        self.ready_read
    }

    /// Whether the channel was reported write-ready for the dispatch
    /// call currently in progress. Meaningless outside a dispatch.
    pub fn is_writable(&self) -> bool {
        self.ready_write
    }

    /// Requests read-readiness dispatch from the next wait cycle on.
    pub fn interest_read(&mut self) -> &mut Self {
        self.interest.read = true;
        self
    }

    /// Requests write-readiness dispatch from the next wait cycle on.
    pub fn interest_write(&mut self) -> &mut Self {
        self.interest.write = true;
        self
    }

    /// Stops read-readiness dispatch from the next wait cycle on.
    pub fn uninterest_read(&mut self) -> &mut Self {
        self.interest.read = false;
        self
    }

    /// Stops write-readiness dispatch from the next wait cycle on.
    pub fn uninterest_write(&mut self) -> &mut Self {
        self.interest.write = false;
        self
    }

    /// Marks the session closed. Idempotent, and safe to call from
    /// within a dispatch: the owning poller cancels the registration
    /// (swallowing errors) and drops the channel once the current
    /// handler call returns. No further events are dispatched.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stores a per-connection attribute, replacing any previous value
    /// under the key regardless of its type.
    pub fn put_attribute<T: Any + Send>(&mut self, key: &'static str, value: T) {
        self.attrs.insert(key, Box::new(value));
    }

    /// Borrows an attribute. `None` if the key is absent or the stored
    /// value is not a `T` (the checked-downcast contract: a type
    /// confusion reads as a miss, never as a reinterpreted value).
    pub fn get_attribute<T: Any>(&self, key: &str) -> Option<&T> {
        self.attrs.get(key)?.downcast_ref::<T>()
    }

    /// Mutably borrows an attribute, with the same contract as
    /// [`get_attribute`](Self::get_attribute).
    pub fn get_attribute_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.attrs.get_mut(key)?.downcast_mut::<T>()
    }

    /// Removes and returns an attribute. On a type mismatch the stored
    /// value is left in place and `None` is returned.
    pub fn take_attribute<T: Any>(&mut self, key: &'static str) -> Option<T> {
        let boxed = self.attrs.remove(key)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(boxed) => {
                self.attrs.insert(key, boxed);
                None
            }
        }
    }

    pub(crate) fn begin_dispatch(&mut self, readable: bool, writable: bool) {
        self.ready_read = readable;
        self.ready_write = writable;
    }

    pub(crate) fn end_dispatch(&mut self) {
        self.ready_read = false;
        self.ready_write = false;
    }

    pub(crate) fn desired_interest(&self) -> Option<Interest> {
        self.interest.to_interest()
    }

    pub(crate) fn registration(&self) -> Option<Interest> {
        self.registration
    }

    pub(crate) fn set_registration(&mut self, interest: Option<Interest>) {
        self.registration = interest;
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("interest", &self.interest)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
