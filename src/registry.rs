//! # Stats Registry
//!
//! Bookkeeping for every plugin that reports throughput. Registering a plugin
//! creates its channel and its datapoint ring, hands the channel's read end to
//! the dispatcher, and returns the write end for the plugin to keep.
//!
//! Membership is fixed once collection starts: there is no runtime
//! unregistration. A plugin whose writer goes away is marked
//! [`RegistrationState::Closed`] and keeps its history.

use std::fmt;

use mio::{Interest, Token};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::datapoint::Datapoint;
use crate::dispatcher::{Dispatcher, EventKind};
use crate::error::{Result, StatsError};
use crate::ipc::{self, Received, StatsReceiver, StatsSender};
use crate::ring_buffer::DatapointRing;

/// Which side of the pipeline a plugin sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    Input,
    Output,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Input => write!(f, "input"),
            PluginKind::Output => write!(f, "output"),
        }
    }
}

impl PluginKind {
    fn event_kind(self, index: usize) -> EventKind {
        match self {
            PluginKind::Input => EventKind::InputSample(index),
            PluginKind::Output => EventKind::OutputSample(index),
        }
    }
}

/// A plugin as described by the plugin framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub active: bool,
}

impl PluginInfo {
    pub fn active(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }

    pub fn inactive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
        }
    }
}

/// All configured plugins, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSet {
    pub inputs: Vec<PluginInfo>,
    pub outputs: Vec<PluginInfo>,
}

/// The write end of a plugin's channel, returned to the framework so it can
/// be given to the plugin.
#[derive(Debug)]
pub struct PluginStatsHandle {
    pub kind: PluginKind,
    pub name: String,
    pub sender: StatsSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Channel registered with the dispatcher and accepting samples.
    Registered,
    /// The plugin dropped its writer; the read end has been deregistered.
    Closed,
}

/// Per-plugin tracking record.
#[derive(Debug)]
pub struct TrackedPlugin {
    name: String,
    kind: PluginKind,
    receiver: StatsReceiver,
    buffer: DatapointRing,
    state: RegistrationState,
    token: Token,
}

impl TrackedPlugin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    pub fn buffer(&self) -> &DatapointRing {
        &self.buffer
    }

    /// Recorded datapoints, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Datapoint> {
        self.buffer.read_all()
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// Owner of every tracking record.
#[derive(Debug)]
pub struct StatsRegistry {
    inputs: Vec<TrackedPlugin>,
    outputs: Vec<TrackedPlugin>,
    buffer_capacity: usize,
}

impl StatsRegistry {
    /// Create an empty registry whose rings hold `buffer_capacity` samples.
    ///
    /// A zero capacity is rejected with [`StatsError::Config`].
    pub fn new(buffer_capacity: usize) -> Result<Self> {
        if buffer_capacity == 0 {
            return Err(StatsError::Config(
                "ring buffer capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            buffer_capacity,
        })
    }

    pub fn register_input(
        &mut self,
        plugin: &PluginInfo,
        dispatcher: &mut Dispatcher,
    ) -> Result<StatsSender> {
        self.register(PluginKind::Input, plugin, dispatcher)
    }

    pub fn register_output(
        &mut self,
        plugin: &PluginInfo,
        dispatcher: &mut Dispatcher,
    ) -> Result<StatsSender> {
        self.register(PluginKind::Output, plugin, dispatcher)
    }

    fn register(
        &mut self,
        kind: PluginKind,
        plugin: &PluginInfo,
        dispatcher: &mut Dispatcher,
    ) -> Result<StatsSender> {
        let (sender, mut receiver) = ipc::channel().map_err(|source| StatsError::Channel {
            kind,
            name: plugin.name.clone(),
            source,
        })?;

        // On failure both pipe ends drop here, so nothing leaks.
        let index = self.records(kind).len();
        let token = dispatcher
            .add(&mut receiver, kind.event_kind(index), Interest::READABLE)
            .map_err(|source| StatsError::Register {
                kind,
                name: plugin.name.clone(),
                source,
            })?;

        let buffer = DatapointRing::new(self.buffer_capacity);
        self.records_mut(kind).push(TrackedPlugin {
            name: plugin.name.clone(),
            kind,
            receiver,
            buffer,
            state: RegistrationState::Registered,
            token,
        });

        debug!("[stats] register {} plugin: {}", kind, plugin.name);
        Ok(sender)
    }

    /// Register every active plugin in `plugins`, inputs first.
    ///
    /// Inactive plugins are skipped. The first failure aborts registration
    /// and is returned; plugins registered before it stay registered.
    pub fn register_all(
        &mut self,
        plugins: &PluginSet,
        dispatcher: &mut Dispatcher,
    ) -> Result<Vec<PluginStatsHandle>> {
        let mut handles = Vec::new();
        let groups = [
            (PluginKind::Input, &plugins.inputs),
            (PluginKind::Output, &plugins.outputs),
        ];
        for (kind, group) in groups {
            for plugin in group {
                if !plugin.active {
                    trace!("Skipping inactive {} plugin {}", kind, plugin.name);
                    continue;
                }
                let sender = self.register(kind, plugin, dispatcher)?;
                handles.push(PluginStatsHandle {
                    kind,
                    name: plugin.name.clone(),
                    sender,
                });
            }
        }
        Ok(handles)
    }

    /// Drain the channel of one plugin into its ring.
    ///
    /// Returns the number of datapoints pushed. A closed channel moves the
    /// record to [`RegistrationState::Closed`] and removes it from the
    /// dispatcher; read failures are logged and end the drain.
    pub fn ingest(&mut self, kind: PluginKind, index: usize, dispatcher: &mut Dispatcher) -> usize {
        let Some(record) = self.records_mut(kind).get_mut(index) else {
            warn!("Sample event for unknown {} plugin #{}", kind, index);
            return 0;
        };
        if record.state == RegistrationState::Closed {
            return 0;
        }

        let mut pushed = 0;
        loop {
            match record.receiver.receive() {
                Ok(Received::Datapoint(datapoint)) => {
                    let outcome = record.buffer.push(datapoint);
                    trace!(plugin = %record.name, ?outcome, time = datapoint.time, "datapoint");
                    pushed += 1;
                }
                Ok(Received::NoData) => break,
                Ok(Received::Closed) => {
                    if let Err(e) = dispatcher.remove(&mut record.receiver, record.token) {
                        warn!("Failed to deregister {} plugin {}: {}", kind, record.name, e);
                    }
                    record.state = RegistrationState::Closed;
                    debug!("[stats] {} plugin {} closed its channel", kind, record.name);
                    break;
                }
                Err(StatsError::Io(e)) => {
                    warn!("Read from {} plugin {} failed: {}", kind, record.name, e);
                    break;
                }
                Err(e) => {
                    warn!("Dropped record from {} plugin {}: {}", kind, record.name, e);
                }
            }
        }
        pushed
    }

    pub fn inputs(&self) -> &[TrackedPlugin] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TrackedPlugin] {
        &self.outputs
    }

    pub fn get(&self, kind: PluginKind, index: usize) -> Option<&TrackedPlugin> {
        self.records(kind).get(index)
    }

    pub fn find(&self, kind: PluginKind, name: &str) -> Option<&TrackedPlugin> {
        self.records(kind).iter().find(|record| record.name == name)
    }

    /// Total number of tracking records.
    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self, kind: PluginKind) -> &Vec<TrackedPlugin> {
        match kind {
            PluginKind::Input => &self.inputs,
            PluginKind::Output => &self.outputs,
        }
    }

    fn records_mut(&mut self, kind: PluginKind) -> &mut Vec<TrackedPlugin> {
        match kind {
            PluginKind::Input => &mut self.inputs,
            PluginKind::Output => &mut self.outputs,
        }
    }
}
