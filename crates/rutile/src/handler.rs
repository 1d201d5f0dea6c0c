//! Capability traits supplied by protocol implementations.

use std::io;

use socket2::{SockRef, Socket};

use crate::session::Session;

/// Protocol callbacks invoked by a poller for its own sessions.
///
/// One handler instance is shared by every poller, so implementations
/// must tolerate concurrent invocation for *distinct* sessions. The
/// reactor never invokes the handler twice concurrently for the same
/// session: a session belongs to exactly one poller thread for its whole
/// lifetime, and that thread dispatches its events sequentially.
///
/// Returning `Err` from `attach`, `read`, or `write` is the recovery
/// path for a broken session: the poller calls [`detach`], closes the
/// session, and keeps serving everything else.
///
/// [`detach`]: IoHandler::detach
pub trait IoHandler: Send + Sync {
    /// Called once when a freshly accepted connection is registered with
    /// its owning poller. The handler decides the initial interest set
    /// (typically read); a session starts with no interest at all.
    fn attach(&self, session: &mut Session) -> io::Result<()>;

    /// Called when the session's channel is read-ready.
    fn read(&self, session: &mut Session) -> io::Result<()>;

    /// Called when the session's channel is write-ready (and was not
    /// read-ready this dispatch; readability wins).
    fn write(&self, session: &mut Session) -> io::Result<()>;

    /// Called after a callback error, immediately before the session is
    /// closed. Not called for voluntary closes or reactor shutdown.
    fn detach(&self, session: &mut Session);
}

/// Socket-option hooks invoked by the acceptor thread.
///
/// Failures here are not a separate error class: a `config_listener`
/// error surfaces as a bind failure and a `config_stream` error as an
/// accept failure, in the thread that invoked the hook.
pub trait SocketConfig: Send + Sync {
    /// Tune the listening socket before it is bound.
    fn config_listener(&self, socket: &Socket) -> io::Result<()> {
        let _ = socket;
        Ok(())
    }

    /// Tune an accepted socket before it is handed to a poller.
    fn config_stream(&self, socket: SockRef<'_>) -> io::Result<()> {
        let _ = socket;
        Ok(())
    }
}
