//! Server lifecycle: configuration, the poller pool, and the acceptor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::Waker;
use tracing::{error, info};

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::error::{ReactorError, ReactorResult};
use crate::handler::{IoHandler, SocketConfig};
use crate::poller::{Poller, PollerHandle};

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninit,
    Init,
    Running,
    Stopping,
}

/// The reactor server: one acceptor thread plus a fixed pool of poller
/// threads, all sharing a single handler.
///
/// Construction is fluent; configuration is frozen once [`init`] has
/// built the acceptor and the poller pool.
///
/// ```no_run
/// use rutile::Server;
/// # use rutile::Session;
/// # struct MyHandler;
/// # impl rutile::IoHandler for MyHandler {
/// #     fn attach(&self, s: &mut Session) -> std::io::Result<()> { s.interest_read(); Ok(()) }
/// #     fn read(&self, _s: &mut Session) -> std::io::Result<()> { Ok(()) }
/// #     fn write(&self, _s: &mut Session) -> std::io::Result<()> { Ok(()) }
/// #     fn detach(&self, _s: &mut Session) {}
/// # }
///
/// let mut server = Server::build(MyHandler).host("0.0.0.0").port(7000);
/// server.start()?;
/// // ...
/// server.shutdown();
/// # Ok::<(), rutile::ReactorError>(())
/// ```
///
/// [`init`]: Server::init
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn IoHandler>,
    socket_config: Option<Arc<dyn SocketConfig>>,
    state: Lifecycle,
    running: Arc<AtomicBool>,
    acceptor: Option<Acceptor>,
    acceptor_waker: Option<Arc<Waker>>,
    pollers: Vec<Poller>,
    handles: Vec<PollerHandle>,
    local_addr: Option<SocketAddr>,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Creates a server around a protocol handler, with default
    /// configuration.
    pub fn build(handler: impl IoHandler + 'static) -> Self {
        Self {
            config: ServerConfig::default(),
            handler: Arc::new(handler),
            socket_config: None,
            state: Lifecycle::Uninit,
            running: Arc::new(AtomicBool::new(false)),
            acceptor: None,
            acceptor_waker: None,
            pollers: Vec::new(),
            handles: Vec::new(),
            local_addr: None,
            threads: Vec::new(),
        }
    }

    /// Sets the host to bind to.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the port to bind to (0 for an ephemeral port).
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Installs a socket-configuration collaborator, invoked by the
    /// acceptor thread before bind and after each accept.
    pub fn config(mut self, config: impl SocketConfig + 'static) -> Self {
        self.socket_config = Some(Arc::new(config));
        self
    }

    /// Overrides the poller pool size (default: hardware parallelism
    /// plus one).
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = Some(size);
        self
    }

    /// Overrides the pollers' readiness wait timeout.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the acceptor and the poller pool, and binds the listening
    /// socket. Idempotent: repeated calls leave the constructed pool
    /// untouched, and configuration changes after the first call have no
    /// effect on it.
    pub fn init(&mut self) -> ReactorResult<()> {
        if self.state != Lifecycle::Uninit {
            return Ok(());
        }

        let pool_size = self.config.effective_pool_size();
        let mut pollers = Vec::with_capacity(pool_size);
        let mut handles = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let (poller, handle) = Poller::new(
                index,
                Arc::clone(&self.handler),
                Arc::clone(&self.running),
                self.config.poll_timeout,
                self.config.events_capacity,
            )?;
            pollers.push(poller);
            handles.push(handle);
        }

        let acceptor = Acceptor::bind(
            &self.config.host,
            self.config.port,
            handles.clone(),
            Arc::clone(&self.running),
            self.socket_config.clone(),
        )?;

        self.local_addr = Some(acceptor.local_addr());
        self.acceptor_waker = Some(acceptor.waker());
        self.acceptor = Some(acceptor);
        self.pollers = pollers;
        self.handles = handles;
        self.state = Lifecycle::Init;
        Ok(())
    }

    /// Starts the reactor: one named thread per poller plus the acceptor
    /// thread. Calls [`init`](Self::init) first if needed. A no-op if
    /// already running; an error once [`shutdown`](Self::shutdown) has
    /// torn the pool down, since the acceptor and pollers were consumed
    /// by their threads.
    pub fn start(&mut self) -> ReactorResult<()> {
        match self.state {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopping => return Err(ReactorError::Stopped),
            Lifecycle::Uninit | Lifecycle::Init => {}
        }
        self.init()?;

        self.running.store(true, Ordering::Release);
        self.state = Lifecycle::Running;

        for (index, mut poller) in std::mem::take(&mut self.pollers).into_iter().enumerate() {
            let handle = thread::Builder::new()
                .name(format!("rutile-poller-{index}"))
                .spawn(move || {
                    if let Err(e) = poller.run() {
                        error!(poller = index, error = %e, "poller thread terminated");
                    }
                })
                .map_err(ReactorError::Spawn)?;
            self.threads.push(handle);
        }

        if let Some(mut acceptor) = self.acceptor.take() {
            let handle = thread::Builder::new()
                .name("rutile-acceptor".to_string())
                .spawn(move || {
                    if let Err(e) = acceptor.run() {
                        error!(error = %e, "acceptor thread terminated");
                    }
                })
                .map_err(ReactorError::Spawn)?;
            self.threads.push(handle);
        }

        info!(
            addr = %self.local_addr.map_or_else(|| "?".to_string(), |a| a.to_string()),
            pollers = self.handles.len(),
            "server started"
        );
        Ok(())
    }

    /// Stops the reactor: clears the running flag, wakes every thread
    /// out of its wait, and joins them all, so teardown is complete when
    /// this returns. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state != Lifecycle::Running && self.threads.is_empty() {
            return;
        }
        self.state = Lifecycle::Stopping;
        self.running.store(false, Ordering::Release);

        if let Some(waker) = &self.acceptor_waker {
            if let Err(e) = waker.wake() {
                tracing::warn!(error = %e, "failed to wake acceptor");
            }
        }
        for handle in &self.handles {
            handle.wake();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        info!("server stopped");
    }

    /// The bound listening address, once [`init`](Self::init) has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the reactor threads are running.
    pub fn is_running(&self) -> bool {
        self.state == Lifecycle::Running
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
