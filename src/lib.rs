//! # Forwarder Stats
//!
//! Statistics collection for a log/metrics forwarder built from input and
//! output plugins. Every active plugin reports throughput samples (records
//! and bytes per second) over its own pipe; a single worker thread collects
//! them into bounded per-plugin histories and serves a Unix control socket
//! for inspection clients.
//!
//! ## Architecture Overview
//!
//! - `datapoint`: the sample type and its fixed-size wire record
//! - `ring_buffer`: per-plugin, time-bucketed circular history
//! - `ipc`: plugin → worker channels and the control socket server
//! - `registry`: one channel and one ring per active plugin
//! - `dispatcher`: readiness multiplexer mapping sources to event kinds
//! - `timer`: the periodic flush tick
//! - `worker`: the aggregator state and its event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use forwarder_stats::{PluginInfo, PluginSet, StatsConfig, StatsEngine};
//!
//! fn main() -> anyhow::Result<()> {
//!     let plugins = PluginSet {
//!         inputs: vec![PluginInfo::active("cpu")],
//!         outputs: vec![PluginInfo::active("es")],
//!     };
//!     let (engine, handles) = StatsEngine::init(StatsConfig::default(), &plugins)?;
//!     let worker = engine.spawn()?;
//!
//!     for handle in &handles {
//!         handle.sender.record(120, 64 * 1024)?;
//!     }
//!
//!     // The worker runs until the process exits.
//!     let _ = worker.join();
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! Plugins send from their own threads and may block only while their pipe
//! is full. The worker is the only reader of every pipe and the only owner of
//! the rings and the client list, so nothing is locked.

pub mod cli;
pub mod config;
pub mod datapoint;

/// Readiness multiplexer used by the worker
///
/// Wraps `mio::Poll` and tags every registered source with an `EventKind`
/// so events are routed by meaning instead of by descriptor.
pub mod dispatcher;

pub mod error;

/// Plugin channels and the control socket
///
/// - `channel()` creates the pipe pair for one plugin
/// - `ControlServer` accepts and tracks inspection clients
pub mod ipc;

pub mod logging;
pub mod registry;
pub mod ring_buffer;
pub mod timer;
pub mod utils;
pub mod worker;

pub use config::StatsConfig;
pub use datapoint::Datapoint;
pub use dispatcher::{Dispatcher, EventKind};
pub use error::{Result, StatsError};
pub use ipc::{ControlServer, Received, StatsReceiver, StatsSender};
pub use registry::{PluginInfo, PluginKind, PluginSet, PluginStatsHandle, StatsRegistry};
pub use ring_buffer::DatapointRing;
pub use worker::{OutputCollector, StatsEngine, TickHandler};

/// The current version of the stats worker
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default control socket path
    pub const SOCKET_PATH: &str = "/tmp/forwarder-stats.sock";

    /// Default number of slots per plugin ring
    ///
    /// One slot per second, so a full ring covers the last minute.
    pub const BUFFER_CAPACITY: usize = 60;

    /// Default listen backlog of the control socket
    pub const LISTEN_BACKLOG: i32 = 5;

    /// Default flush tick period
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

    /// Default number of readiness events handled per wait
    pub const MAX_EVENTS: usize = 64;
}
