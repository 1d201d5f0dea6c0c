//! Server configuration.

use std::thread;
use std::time::Duration;

/// Server configuration.
///
/// Frozen once `Server::init` has constructed the acceptor and the poller
/// pool; changes after that point have no effect on the running reactor.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to. Use 0 to pick an ephemeral port.
    pub port: u16,
    /// Number of poller threads. `None` means available hardware
    /// parallelism plus one.
    pub pool_size: Option<usize>,
    /// Bounded timeout for each poller's readiness wait. Queued
    /// registration tasks are picked up within at most one such period
    /// even under zero I/O activity.
    pub poll_timeout: Duration,
    /// Capacity of each readiness event buffer.
    pub events_capacity: usize,
}

impl ServerConfig {
    /// Creates a configuration with the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the number of poller threads.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the pollers' readiness wait timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the readiness event buffer capacity.
    pub fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Resolves the effective pool size.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, std::num::NonZero::get) + 1
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6666,
            pool_size: None,
            poll_timeout: Duration::from_secs(1),
            events_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6666);
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert!(config.pool_size.is_none());
    }

    #[test]
    fn builder_chain() {
        let config = ServerConfig::new("0.0.0.0", 9000)
            .with_pool_size(3)
            .with_poll_timeout(Duration::from_millis(250))
            .with_events_capacity(64);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.pool_size, Some(3));
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.events_capacity, 64);
    }

    #[test]
    fn effective_pool_size_defaults_to_parallelism_plus_one() {
        let config = ServerConfig::default();
        let parallelism = thread::available_parallelism().map_or(1, std::num::NonZero::get);
        assert_eq!(config.effective_pool_size(), parallelism + 1);
    }

    #[test]
    fn effective_pool_size_honors_override() {
        let config = ServerConfig::default().with_pool_size(2);
        assert_eq!(config.effective_pool_size(), 2);
    }
}
