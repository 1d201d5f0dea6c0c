//! Reference echo protocol for the rutile reactor.
//!
//! Mirrors received bytes back verbatim through a fixed-size
//! per-connection buffer stored as a session attribute. Interest flags
//! drive the flow: a non-empty buffer enables write dispatch, a full
//! buffer disables read dispatch, and a fully flushed buffer switches
//! back to read-only interest. Partial writes keep write interest set
//! until the buffer drains, so no byte is dropped or duplicated however
//! the kernel fragments the transfers.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use tracing::debug;

use rutile::{IoHandler, Session};

/// Default per-connection buffer capacity.
pub const BUF_CAPACITY: usize = 1024;

/// Attribute key under which each session keeps its echo buffer.
const BUF_KEY: &str = "echo.buf";

/// Echo handler: one bounded buffer per session, bytes mirrored in order
/// and in full.
pub struct EchoHandler {
    capacity: usize,
}

impl EchoHandler {
    /// Creates an echo handler with the given per-session buffer
    /// capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        Self { capacity }
    }

    fn buffer(&self, session: &mut Session) -> io::Result<BytesMut> {
        session
            .take_attribute::<BytesMut>(BUF_KEY)
            .ok_or_else(|| io::Error::other("echo buffer missing"))
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(BUF_CAPACITY)
    }
}

impl IoHandler for EchoHandler {
    fn attach(&self, session: &mut Session) -> io::Result<()> {
        session.put_attribute(BUF_KEY, BytesMut::with_capacity(self.capacity));
        session.interest_read();
        Ok(())
    }

    fn read(&self, session: &mut Session) -> io::Result<()> {
        let mut buf = self.buffer(session)?;

        let mut eof = false;
        let mut chunk = [0u8; 512];
        while buf.len() < self.capacity {
            let want = (self.capacity - buf.len()).min(chunk.len());
            match session.read(&mut chunk[..want]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    session.put_attribute(BUF_KEY, buf);
                    return Err(e);
                }
            }
        }

        if eof {
            // Peer finished sending; end the session.
            session.close();
            return Ok(());
        }

        let full = buf.len() >= self.capacity;
        let pending = !buf.is_empty();
        session.put_attribute(BUF_KEY, buf);
        if pending {
            if full {
                // No space left to read into; flush first.
                session.uninterest_read().interest_write();
            } else {
                session.interest_read().interest_write();
            }
        }
        Ok(())
    }

    fn write(&self, session: &mut Session) -> io::Result<()> {
        let mut buf = self.buffer(session)?;

        while !buf.is_empty() {
            match session.write(&buf) {
                Ok(0) => {
                    session.put_attribute(BUF_KEY, buf);
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    session.put_attribute(BUF_KEY, buf);
                    return Err(e);
                }
            }
        }

        let drained = buf.is_empty();
        session.put_attribute(BUF_KEY, buf);
        if drained {
            session.uninterest_write().interest_read();
        } else {
            // Partial write: keep flushing, and read again now that the
            // buffer has room.
            session.interest_read().interest_write();
        }
        Ok(())
    }

    fn detach(&self, session: &mut Session) {
        debug!(peer = %session.peer_addr(), "echo session detached");
    }
}
