//! Error type shared by every stats component.
//!
//! Startup failures (event loop, control socket, timer, plugin channels) are
//! surfaced as distinct variants so the caller can print a clear diagnostic
//! before aborting. Steady-state failures on the worker are logged instead of
//! returned; see the handlers in [`crate::worker`].

use std::io;
use std::path::PathBuf;

use crate::registry::PluginKind;

/// Errors produced by the statistics subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// The readiness multiplexer could not be created or polled.
    #[error("could not initialize event loop: {0}")]
    EventLoop(#[source] io::Error),

    /// The pipe backing a plugin channel could not be created.
    #[error("could not create stats channel for {kind} plugin '{name}': {source}")]
    Channel {
        kind: PluginKind,
        name: String,
        #[source]
        source: io::Error,
    },

    /// A plugin channel could not be added to the event loop.
    #[error("could not register {kind} plugin '{name}' with the event loop: {source}")]
    Register {
        kind: PluginKind,
        name: String,
        #[source]
        source: io::Error,
    },

    /// The Unix control socket could not be created, bound or registered.
    #[error("could not create control socket at {}: {source}", .path.display())]
    ControlSocket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The periodic timer could not be created or armed.
    #[error("could not create tick timer: {0}")]
    Timer(#[source] nix::errno::Errno),

    #[error("datapoint codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("malformed datapoint record: expected {expected} bytes, got {actual}")]
    RecordSize { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not parse configuration file: {0}")]
    ConfigFile(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, StatsError>;
