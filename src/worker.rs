//! # Aggregation Worker
//!
//! [`StatsEngine`] is the whole aggregator state: the dispatcher, the plugin
//! registry, the control socket server and the flush tick. It is built once
//! by [`StatsEngine::init`], then moved onto a dedicated thread by
//! [`StatsEngine::spawn`] where it waits on the dispatcher forever.
//!
//! ## Event routing
//!
//! | Event kind        | Handler                                   |
//! |-------------------|-------------------------------------------|
//! | `InputSample(i)`  | drain input channel `i` into its ring     |
//! | `OutputSample(i)` | drain output channel `i` into its ring    |
//! | `ControlListener` | accept pending control clients            |
//! | `ControlClient(c)`| tear down client `c` once it disconnects  |
//! | `Tick`            | acknowledge the timer, call `TickHandler` |
//!
//! Handlers run to completion one at a time and never block: the channels
//! and sockets are non-blocking and are drained only until they would block.
//! A slow handler delays every other plugin and client.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::config::StatsConfig;
use crate::dispatcher::{Dispatcher, EventKind, ReadyEvent};
use crate::error::Result;
use crate::ipc::ControlServer;
use crate::registry::{PluginKind, PluginSet, PluginStatsHandle, RegistrationState, StatsRegistry};
use crate::timer::TickTimer;
use crate::utils::{format_bytes, unix_time_secs};

/// Receives the periodic flush tick.
///
/// Runs on the worker thread with read access to every plugin's history, so
/// it must return quickly.
pub trait TickHandler: Send {
    fn on_tick(&mut self, registry: &StatsRegistry, now: i64);
}

/// Default tick handler: logs the latest sample of each active output plugin.
#[derive(Debug, Default)]
pub struct OutputCollector;

impl TickHandler for OutputCollector {
    fn on_tick(&mut self, registry: &StatsRegistry, now: i64) {
        for output in registry.outputs() {
            if output.state() != RegistrationState::Registered {
                continue;
            }
            match output.buffer().latest() {
                Some(latest) => debug!(
                    "[stats] {}: {} records, {} at t={} ({}s ago)",
                    output.name(),
                    latest.records,
                    format_bytes(latest.bytes),
                    latest.time,
                    now - latest.time
                ),
                None => trace!("[stats] {}: no samples yet", output.name()),
            }
        }
    }
}

/// Counters describing what the worker has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCounters {
    pub datapoints: u64,
    pub ticks: u64,
    pub accepted: u64,
    pub disconnected: u64,
}

/// Aggregator state owned by the worker thread.
pub struct StatsEngine {
    config: StatsConfig,
    dispatcher: Dispatcher,
    registry: StatsRegistry,
    control: Option<ControlServer>,
    timer: TickTimer,
    tick_handler: Box<dyn TickHandler>,
    counters: WorkerCounters,
}

impl StatsEngine {
    /// Create the event loop, register every active plugin and the flush
    /// tick.
    ///
    /// Returns the engine together with one channel handle per registered
    /// plugin. Any failure here is fatal to the subsystem.
    pub fn init(config: StatsConfig, plugins: &PluginSet) -> Result<(Self, Vec<PluginStatsHandle>)> {
        config.validate()?;

        let mut dispatcher = Dispatcher::new(config.max_events)?;
        let mut registry = StatsRegistry::new(config.buffer_capacity)?;
        let handles = registry.register_all(plugins, &mut dispatcher)?;

        let mut timer = TickTimer::new(config.tick_interval())?;
        timer.register(&mut dispatcher)?;

        info!(
            "Stats initialized: {} input and {} output plugins",
            registry.inputs().len(),
            registry.outputs().len()
        );

        let engine = Self {
            config,
            dispatcher,
            registry,
            control: None,
            timer,
            tick_handler: Box::new(OutputCollector),
            counters: WorkerCounters::default(),
        };
        Ok((engine, handles))
    }

    /// Replace the default [`OutputCollector`].
    pub fn with_tick_handler(mut self, handler: impl TickHandler + 'static) -> Self {
        self.tick_handler = Box::new(handler);
        self
    }

    /// Bind the control socket and add it to the event loop. Calling this
    /// again once the server is up does nothing.
    pub fn start_control_server(&mut self) -> Result<()> {
        if self.control.is_some() {
            return Ok(());
        }
        let mut server = ControlServer::bind(&self.config.socket_path, self.config.listen_backlog)?;
        server.register(&mut self.dispatcher)?;
        self.control = Some(server);
        Ok(())
    }

    /// Wait once and dispatch every ready event.
    ///
    /// Connections left queued by a failed accept are retried after the
    /// batch, so at the latest on the next tick. Returns how many events were
    /// handled.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let ready = self.dispatcher.wait(timeout)?;
        for event in &ready {
            self.dispatch(event);
        }
        if self.control.as_ref().map_or(false, |s| s.accept_retry_pending()) {
            self.accept_clients();
        }
        Ok(ready.len())
    }

    /// Start the control socket and run the event loop.
    ///
    /// Only returns on a fatal error.
    pub fn run(mut self) -> Result<()> {
        self.start_control_server()?;
        info!("Stats worker running");
        loop {
            self.run_once(None)?;
        }
    }

    /// Run the event loop on a dedicated `stats-worker` thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("stats-worker".into())
            .spawn(move || {
                let result = self.run();
                if let Err(e) = &result {
                    error!("Stats worker stopped: {}", e);
                }
                result
            })?;
        Ok(handle)
    }

    fn dispatch(&mut self, event: &ReadyEvent) {
        match event.kind {
            EventKind::InputSample(index) => self.ingest(PluginKind::Input, index),
            EventKind::OutputSample(index) => self.ingest(PluginKind::Output, index),
            EventKind::ControlListener => self.accept_clients(),
            EventKind::ControlClient(id) => {
                if let Some(server) = self.control.as_mut() {
                    if server.service_client(id, event.closed, &mut self.dispatcher) {
                        self.counters.disconnected += 1;
                    }
                }
            }
            EventKind::Tick => self.tick(),
        }
    }

    fn accept_clients(&mut self) {
        if let Some(server) = self.control.as_mut() {
            let accepted = server.accept_pending(&mut self.dispatcher);
            self.counters.accepted += accepted as u64;
        }
    }

    fn ingest(&mut self, kind: PluginKind, index: usize) {
        let pushed = self.registry.ingest(kind, index, &mut self.dispatcher);
        self.counters.datapoints += pushed as u64;
    }

    fn tick(&mut self) {
        match self.timer.acknowledge() {
            Ok(true) => {
                self.counters.ticks += 1;
                self.tick_handler.on_tick(&self.registry, unix_time_secs());
            }
            Ok(false) => trace!("Spurious tick wakeup"),
            Err(e) => warn!("Failed to read tick timer: {}", e),
        }
    }

    pub fn registry(&self) -> &StatsRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn control_server(&self) -> Option<&ControlServer> {
        self.control.as_ref()
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn counters(&self) -> WorkerCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginInfo;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn test_config(dir: &tempfile::TempDir) -> StatsConfig {
        StatsConfig {
            socket_path: dir.path().join("stats.sock"),
            buffer_capacity: 4,
            ..Default::default()
        }
    }

    struct CountingTicks(Arc<AtomicU64>);

    impl TickHandler for CountingTicks {
        fn on_tick(&mut self, _registry: &StatsRegistry, _now: i64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_init_registers_tick_and_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = PluginSet {
            inputs: vec![PluginInfo::active("cpu")],
            outputs: vec![PluginInfo::active("es")],
        };
        let (engine, handles) = StatsEngine::init(test_config(&dir), &plugins).unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(engine.registry().len(), 2);
        assert_eq!(engine.dispatcher().count_where(|k| *k == EventKind::Tick), 1);
        assert!(engine.control_server().is_none());
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StatsConfig {
            buffer_capacity: 0,
            ..test_config(&dir)
        };
        assert!(StatsEngine::init(config, &PluginSet::default()).is_err());
    }

    #[test]
    fn test_start_control_server_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _) = StatsEngine::init(test_config(&dir), &PluginSet::default()).unwrap();
        engine.start_control_server().unwrap();
        engine.start_control_server().unwrap();
        assert_eq!(
            engine.dispatcher().count_where(|k| *k == EventKind::ControlListener),
            1
        );
    }

    #[test]
    fn test_tick_reaches_custom_handler() {
        let dir = tempfile::tempdir().unwrap();
        let config = StatsConfig {
            tick_interval_ms: 20,
            ..test_config(&dir)
        };
        let ticks = Arc::new(AtomicU64::new(0));
        let (engine, _) = StatsEngine::init(config, &PluginSet::default()).unwrap();
        let mut engine = engine.with_tick_handler(CountingTicks(ticks.clone()));

        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            engine.run_once(Some(Duration::from_millis(100))).unwrap();
        }
        assert!(ticks.load(Ordering::SeqCst) >= 1);
        assert_eq!(engine.counters().ticks, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn test_output_collector_handles_empty_registry() {
        let registry = StatsRegistry::new(2).unwrap();
        OutputCollector.on_tick(&registry, 0);
    }
}
