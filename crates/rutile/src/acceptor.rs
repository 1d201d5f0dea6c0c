//! Acceptor: the single thread that owns the listening socket.
//!
//! Accepted connections are distributed round-robin across the poller
//! pool by enqueueing a registration task on the chosen poller's handle;
//! the acceptor never touches another thread's multiplexer or sessions.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info};

use crate::error::{ReactorError, ReactorResult};
use crate::handler::SocketConfig;
use crate::poller::{PollerHandle, PollerTask};

/// Token for the listening socket.
const LISTENER_TOKEN: Token = Token(0);
/// Token for the shutdown waker. Must not conflict with LISTENER_TOKEN.
const SHUTDOWN_TOKEN: Token = Token(1);

/// Listen backlog for the bound socket.
const BACKLOG: i32 = 200;

/// Round-robin distributor over the poller pool.
///
/// A single shared monotonic counter; the modulo pick carries no other
/// synchronization semantics.
#[derive(Debug)]
pub(crate) struct RoundRobin {
    counter: AtomicUsize,
    len: usize,
}

impl RoundRobin {
    pub(crate) fn new(len: usize) -> Self {
        assert!(len > 0, "pool size must be positive");
        Self {
            counter: AtomicUsize::new(0),
            len,
        }
    }

    /// Returns the next pool index.
    pub(crate) fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % self.len
    }
}

/// The accepting side of the reactor.
pub(crate) struct Acceptor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    pollers: Vec<PollerHandle>,
    rr: RoundRobin,
    running: Arc<AtomicBool>,
    config: Option<Arc<dyn SocketConfig>>,
    waker: Arc<Waker>,
}

impl Acceptor {
    /// Binds the listening socket and prepares the accept loop.
    ///
    /// The socket is built explicitly so the configuration hook runs
    /// before bind and the backlog is fixed at 200. Bind failures are
    /// returned here, at `init()` time, rather than surfacing only as a
    /// log line from the acceptor thread.
    pub(crate) fn bind(
        host: &str,
        port: u16,
        pollers: Vec<PollerHandle>,
        running: Arc<AtomicBool>,
        config: Option<Arc<dyn SocketConfig>>,
    ) -> ReactorResult<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), SHUTDOWN_TOKEN)?);

        let addr = resolve(host, port)?;
        let mut listener = bind_listener(addr, config.as_deref())
            .map_err(|source| ReactorError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        info!(addr = %local_addr, backlog = BACKLOG, "listening");

        let rr = RoundRobin::new(pollers.len());
        Ok(Self {
            poll,
            events: Events::with_capacity(64),
            listener,
            local_addr,
            pollers,
            rr,
            running,
            config,
            waker,
        })
    }

    /// The bound address (useful when binding to port 0).
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waker that interrupts the unbounded accept wait; used by shutdown.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Runs the accept loop until the shared running flag clears.
    ///
    /// Accept and wait failures are fatal: the caller logs the error and
    /// this thread terminates without retry.
    pub(crate) fn run(&mut self) -> ReactorResult<()> {
        debug!("acceptor started");
        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::Accept(e));
            }
            // Every ready entry is processed; one entry never abandons
            // the rest of the batch.
            for event in self.events.iter() {
                match event.token() {
                    SHUTDOWN_TOKEN => {} // loop condition re-checks the flag
                    LISTENER_TOKEN => self.accept_ready()?,
                    _ => {}
                }
            }
        }
        debug!("acceptor stopped");
        Ok(())
    }

    /// Accepts every pending connection and hands each to a poller.
    fn accept_ready(&self) -> ReactorResult<()> {
        loop {
            match self.listener.accept() {
                // accept4 marks the stream non-blocking at accept time.
                Ok((stream, peer)) => {
                    if let Some(config) = &self.config {
                        config
                            .config_stream(SockRef::from(&stream))
                            .map_err(ReactorError::Accept)?;
                    }
                    let index = self.rr.next();
                    debug!(peer = %peer, poller = index, "accepted connection");
                    self.pollers[index].submit(PollerTask::Register { stream, peer });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ReactorError::Accept(e)),
            }
        }
    }
}

/// Resolves the configured host/port to a socket address.
fn resolve(host: &str, port: u16) -> ReactorResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .and_then(|mut addrs| {
            addrs.next().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "no address for host")
            })
        })
        .map_err(|source| ReactorError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })
}

/// Builds the listening socket: configuration hook, then bind, then
/// listen with the fixed backlog.
fn bind_listener(
    addr: SocketAddr,
    config: Option<&dyn SocketConfig>,
) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if let Some(config) = config {
        config.config_listener(&socket)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn round_robin_cycles_through_every_slot_before_repeating() {
        let rr = RoundRobin::new(4);
        for _cycle in 0..3 {
            let picks: HashSet<_> = (0..4).map(|_| rr.next()).collect();
            assert_eq!(picks.len(), 4, "each cycle must visit every slot once");
        }
    }

    #[test]
    fn round_robin_single_slot() {
        let rr = RoundRobin::new(1);
        for _ in 0..10 {
            assert_eq!(rr.next(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "pool size must be positive")]
    fn round_robin_zero_slots_panics() {
        let _rr = RoundRobin::new(0);
    }

    #[test]
    fn bind_listener_honors_config_hook() {
        struct BigRecvBuffer;
        impl SocketConfig for BigRecvBuffer {
            fn config_listener(&self, socket: &Socket) -> std::io::Result<()> {
                socket.set_recv_buffer_size(256 * 1024)
            }
        }

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_listener(addr, Some(&BigRecvBuffer)).unwrap();
        // Kernels may round the value up; it must at least stick.
        assert!(SockRef::from(&listener).recv_buffer_size().unwrap() >= 256 * 1024);
    }

    #[test]
    fn resolve_rejects_unknown_host() {
        let err = resolve("no.such.host.invalid", 1234).unwrap_err();
        assert!(matches!(err, ReactorError::Bind { .. }));
    }
}
