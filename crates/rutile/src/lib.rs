//! # rutile: a multiplexed non-blocking I/O reactor
//!
//! Rutile accepts inbound connections on a single dedicated thread and
//! distributes them round-robin across a fixed pool of event-loop
//! threads. Each poller thread owns a private readiness multiplexer and
//! dispatches read/write events to a protocol handler, avoiding a
//! thread-per-connection model.
//!
//! The crate uses `mio` for non-blocking I/O with a poll-based event
//! loop: explicit control flow, no async runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Server                             │
//! │  ┌──────────┐    task queues    ┌─────────────────────────┐ │
//! │  │ Acceptor │ ────────────────▶│ Poller 0 .. Poller N     │ │
//! │  │ (1 thread│   (registration   │ (1 thread each, private  │ │
//! │  │  listens)│    handoff)       │  Poll + session table)   │ │
//! │  └──────────┘                   └───────────┬─────────────┘ │
//! └─────────────────────────────────────────────┼───────────────┘
//!                                               ▼
//!                                     IoHandler callbacks
//!                                 (attach / read / write / detach)
//! ```
//!
//! A freshly accepted connection originates on the acceptor thread but
//! must end up owned by exactly one poller. The handoff is the sole
//! synchronization point: the acceptor enqueues a registration task on
//! the chosen poller's thread-safe queue and wakes it; the poller drains
//! its queue once per loop iteration, registers the channel with its own
//! multiplexer, and constructs the [`Session`]. From then on, only that
//! poller's thread ever touches the session — which is why sessions need
//! no locks at all.
//!
//! ## Usage
//!
//! ```ignore
//! use rutile::{IoHandler, Server, Session};
//!
//! let mut server = Server::build(MyProtocol::new())
//!     .host("127.0.0.1")
//!     .port(7000);
//! server.start()?;
//! // ...
//! server.shutdown(); // joins every reactor thread before returning
//! ```

mod acceptor;
mod config;
mod error;
mod handler;
mod poller;
mod queue;
mod server;
mod session;
mod table;

pub use config::ServerConfig;
pub use error::{ReactorError, ReactorResult};
pub use handler::{IoHandler, SocketConfig};
pub use server::Server;
pub use session::Session;
pub use table::SessionId;
