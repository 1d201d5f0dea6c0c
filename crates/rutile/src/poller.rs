//! Event-loop poller: one per thread, each with a private multiplexer.
//!
//! A poller owns exactly one `mio::Poll`, one pending-task queue, and the
//! table of sessions registered with it. The only cross-thread surface is
//! the [`PollerHandle`]: any thread may enqueue a task through it, but the
//! multiplexer and every session are touched exclusively by the poller's
//! own thread. That confinement is what lets interest flags and the
//! attribute store go unlocked.
//!
//! Each loop iteration waits with a bounded timeout, dispatches the ready
//! set (readability checked before writability), then drains every
//! currently queued task — so a handed-off connection is registered and
//! dispatch-ready within at most one wait period.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};
use tracing::{debug, trace, warn};

use crate::error::{ReactorError, ReactorResult};
use crate::handler::IoHandler;
use crate::queue::TaskQueue;
use crate::session::Session;
use crate::table::{SessionId, SessionTable};

/// Token reserved for the poller's waker. Session tokens are table slot
/// indices counting up from zero, so the two can never collide.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// A task enqueued for execution on the owning poller's thread.
pub(crate) enum PollerTask {
    /// Hand over a freshly accepted connection for registration. The
    /// stream is already non-blocking (marked so at accept time).
    Register {
        stream: TcpStream,
        peer: SocketAddr,
    },
}

/// Cross-thread handle to one poller: a task queue plus the waker that
/// interrupts its bounded wait.
#[derive(Clone)]
pub(crate) struct PollerHandle {
    queue: Arc<TaskQueue<PollerTask>>,
    waker: Arc<Waker>,
}

impl PollerHandle {
    /// Enqueues a task and wakes the poller so it is picked up on the
    /// next loop iteration rather than after a full timeout.
    pub(crate) fn submit(&self, task: PollerTask) {
        self.queue.push(task);
        self.wake();
    }

    /// Interrupts the poller's readiness wait.
    pub(crate) fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake poller");
        }
    }
}

/// One event-loop poller.
pub(crate) struct Poller {
    index: usize,
    poll: Poll,
    events: Events,
    /// Scratch for the ready set, copied out so dispatch can mutate the
    /// session table while iterating.
    ready: Vec<(Token, bool, bool)>,
    queue: Arc<TaskQueue<PollerTask>>,
    table: SessionTable<Session>,
    handler: Arc<dyn IoHandler>,
    running: Arc<AtomicBool>,
    timeout: Duration,
}

impl Poller {
    pub(crate) fn new(
        index: usize,
        handler: Arc<dyn IoHandler>,
        running: Arc<AtomicBool>,
        timeout: Duration,
        events_capacity: usize,
    ) -> ReactorResult<(Self, PollerHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let queue = Arc::new(TaskQueue::new());
        let handle = PollerHandle {
            queue: Arc::clone(&queue),
            waker,
        };
        Ok((
            Self {
                index,
                poll,
                events: Events::with_capacity(events_capacity),
                ready: Vec::new(),
                queue,
                table: SessionTable::new(),
                handler,
                running,
                timeout,
            },
            handle,
        ))
    }

    /// Runs the dispatch loop until the shared running flag clears.
    ///
    /// A wait failure is fatal to this poller only; the caller logs it
    /// and the thread stops serving its share of the sessions.
    pub(crate) fn run(&mut self) -> ReactorResult<()> {
        debug!(poller = self.index, "poller started");
        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut self.events, Some(self.timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::Wait(e));
            }

            self.ready.clear();
            for event in self.events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                self.ready
                    .push((event.token(), event.is_readable(), event.is_writable()));
            }
            for i in 0..self.ready.len() {
                let (token, readable, writable) = self.ready[i];
                self.dispatch(token, readable, writable);
            }

            self.drain_tasks();
        }
        self.teardown();
        debug!(poller = self.index, "poller stopped");
        Ok(())
    }

    /// Dispatches one readiness entry to the handler.
    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(id) = self.table.id_for_token(token) else {
            // The session was closed earlier this tick; the event is stale.
            trace!(poller = self.index, token = token.0, "event for vacated slot");
            return;
        };
        let Some(session) = self.table.get_mut(id) else {
            return;
        };
        session.begin_dispatch(readable, writable);
        let result = if readable {
            self.handler.read(session)
        } else if writable {
            self.handler.write(session)
        } else {
            Ok(())
        };
        session.end_dispatch();

        match result {
            Ok(()) => self.settle(id),
            Err(e) => {
                warn!(
                    poller = self.index,
                    session = %id,
                    error = %e,
                    "handler failure, detaching session"
                );
                self.fail(id);
            }
        }
    }

    /// Executes every task queued at this point, in FIFO order.
    fn drain_tasks(&mut self) {
        while let Some(task) = self.queue.try_pop() {
            match task {
                PollerTask::Register { stream, peer } => self.register(stream, peer),
            }
        }
    }

    /// Registration handoff: constructs a session with zero interest and
    /// lets the handler's attach callback decide the initial interest.
    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.table.insert(|id| Session::new(id, stream, peer));
        debug!(poller = self.index, session = %id, peer = %peer, "session attached");
        let Some(session) = self.table.get_mut(id) else {
            return;
        };
        match self.handler.attach(session) {
            Ok(()) => self.settle(id),
            Err(e) => {
                warn!(
                    poller = self.index,
                    session = %id,
                    error = %e,
                    "attach failed, detaching session"
                );
                self.fail(id);
            }
        }
    }

    /// Post-callback bookkeeping: reap a closed session, otherwise bring
    /// the multiplexer registration in line with the interest flags.
    fn settle(&mut self, id: SessionId) {
        let closed = match self.table.get_mut(id) {
            Some(session) => session.is_closed(),
            None => return,
        };
        if closed {
            self.retire(id);
            return;
        }
        if let Err(e) = self.sync_registration(id) {
            warn!(
                poller = self.index,
                session = %id,
                error = %e,
                "registration update failed, closing session"
            );
            self.fail(id);
        }
    }

    /// Applies the session's interest flags to its registration.
    ///
    /// The registration is re-armed even when the interest is unchanged:
    /// mio reports readiness edge-triggered, and re-registering makes
    /// readiness that was reported but not dispatched this tick (write
    /// readiness, when readability won) show up again on the next wait —
    /// the dispatch semantics a level-triggered multiplexer would give.
    fn sync_registration(&mut self, id: SessionId) -> io::Result<()> {
        let registry = self.poll.registry();
        let Some(session) = self.table.get_mut(id) else {
            return Ok(());
        };
        let token = session.id().token();
        match (session.registration(), session.desired_interest()) {
            (None, Some(want)) => {
                registry.register(session.stream_mut(), token, want)?;
                session.set_registration(Some(want));
            }
            (Some(_), Some(want)) => {
                registry.reregister(session.stream_mut(), token, want)?;
                session.set_registration(Some(want));
            }
            (Some(_), None) => {
                registry.deregister(session.stream_mut())?;
                session.set_registration(None);
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Error recovery for a single session: detach, close, retire. The
    /// loop continues undisturbed for every other session.
    fn fail(&mut self, id: SessionId) {
        if let Some(session) = self.table.get_mut(id) {
            self.handler.detach(session);
            session.close();
        }
        self.retire(id);
    }

    /// Cancels the registration (errors swallowed) and drops the session,
    /// closing its channel.
    fn retire(&mut self, id: SessionId) {
        let registry = self.poll.registry();
        if let Some(mut session) = self.table.remove(id) {
            if session.registration().is_some() {
                let _ = registry.deregister(session.stream_mut());
            }
            debug!(
                poller = self.index,
                session = %id,
                peer = %session.peer_addr(),
                "session closed"
            );
        }
    }

    /// Closes every owned session and discards undrained handoffs.
    fn teardown(&mut self) {
        if self.table.len() > 0 {
            debug!(
                poller = self.index,
                count = self.table.len(),
                "closing sessions on shutdown"
            );
        }
        for mut session in self.table.drain() {
            if session.registration().is_some() {
                let _ = self.poll.registry().deregister(session.stream_mut());
            }
        }

        if self.queue.len() > 0 {
            debug!(
                poller = self.index,
                count = self.queue.len(),
                "dropping undrained registrations on shutdown"
            );
        }
        while self.queue.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct CountingHandler {
        attached: AtomicUsize,
        detached: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Self {
            Self {
                attached: AtomicUsize::new(0),
                detached: AtomicUsize::new(0),
            }
        }
    }

    impl IoHandler for CountingHandler {
        fn attach(&self, session: &mut Session) -> io::Result<()> {
            self.attached.fetch_add(1, Ordering::SeqCst);
            session.interest_read();
            Ok(())
        }

        fn read(&self, _session: &mut Session) -> io::Result<()> {
            Ok(())
        }

        fn write(&self, _session: &mut Session) -> io::Result<()> {
            Ok(())
        }

        fn detach(&self, _session: &mut Session) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// An attach callback that rejects every connection.
    struct RejectingHandler(CountingHandler);

    impl IoHandler for RejectingHandler {
        fn attach(&self, _session: &mut Session) -> io::Result<()> {
            Err(io::Error::other("not today"))
        }

        fn read(&self, _session: &mut Session) -> io::Result<()> {
            Ok(())
        }

        fn write(&self, _session: &mut Session) -> io::Result<()> {
            Ok(())
        }

        fn detach(&self, session: &mut Session) {
            self.0.detach(session);
        }
    }

    fn accepted_pair() -> (TcpStream, SocketAddr, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), peer, client)
    }

    fn run_briefly(mut poller: Poller, running: &Arc<AtomicBool>, handle: &PollerHandle) {
        let flag = Arc::clone(running);
        let worker = thread::spawn(move || poller.run());
        thread::sleep(Duration::from_millis(100));
        flag.store(false, Ordering::Release);
        handle.wake();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn handoff_attaches_session_on_poller_thread() {
        let handler = Arc::new(CountingHandler::new());
        let running = Arc::new(AtomicBool::new(true));
        let (poller, handle) = Poller::new(
            0,
            Arc::clone(&handler) as Arc<dyn IoHandler>,
            Arc::clone(&running),
            Duration::from_millis(25),
            64,
        )
        .unwrap();

        let (stream, peer, _client) = accepted_pair();
        handle.submit(PollerTask::Register { stream, peer });

        run_briefly(poller, &running, &handle);

        assert_eq!(handler.attached.load(Ordering::SeqCst), 1);
        assert_eq!(handler.detached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn attach_failure_detaches_and_recovers() {
        let handler = Arc::new(RejectingHandler(CountingHandler::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (poller, handle) = Poller::new(
            0,
            Arc::clone(&handler) as Arc<dyn IoHandler>,
            Arc::clone(&running),
            Duration::from_millis(25),
            64,
        )
        .unwrap();

        let (stream, peer, _client) = accepted_pair();
        handle.submit(PollerTask::Register { stream, peer });

        run_briefly(poller, &running, &handle);

        assert_eq!(handler.0.detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_flag_ends_loop_within_one_wait_period() {
        let handler = Arc::new(CountingHandler::new());
        let running = Arc::new(AtomicBool::new(true));
        let (mut poller, handle) = Poller::new(
            0,
            handler as Arc<dyn IoHandler>,
            Arc::clone(&running),
            Duration::from_millis(50),
            64,
        )
        .unwrap();

        let worker = thread::spawn(move || poller.run());
        running.store(false, Ordering::Release);
        handle.wake();
        let started = std::time::Instant::now();
        worker.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
