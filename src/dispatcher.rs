//! # Event-Loop Dispatcher
//!
//! A thin layer over [`mio::Poll`] that remembers, for every registered
//! source, which kind of event it produces. The worker waits on the
//! dispatcher and routes each [`ReadyEvent`] by its [`EventKind`] instead of
//! by raw descriptor.
//!
//! Readiness is edge-triggered: a handler must drain its source (until it
//! reports would-block) before returning, or it will not be woken again for
//! data that is already pending.
//!
//! The dispatcher is owned by the worker thread and is never shared, so the
//! registration table needs no locking.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use tracing::trace;

use crate::error::{Result, StatsError};
use crate::ipc::ClientId;

/// What a registered source represents, with the back-reference its handler
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Read end of an input plugin channel; index into the registry's inputs.
    InputSample(usize),
    /// Read end of an output plugin channel; index into the registry's outputs.
    OutputSample(usize),
    /// The control socket listener.
    ControlListener,
    /// A connected control client.
    ControlClient(ClientId),
    /// The periodic flush timer.
    Tick,
}

/// One readiness notification resolved against the registration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub kind: EventKind,
    pub readable: bool,
    /// The peer hung up or the descriptor reported an error.
    pub closed: bool,
}

/// Single-threaded readiness multiplexer.
pub struct Dispatcher {
    poll: Poll,
    events: Events,
    kinds: HashMap<Token, EventKind>,
    next_token: usize,
}

impl Dispatcher {
    /// Create the poller. `max_events` bounds how many notifications a
    /// single [`wait`](Self::wait) can return.
    pub fn new(max_events: usize) -> Result<Self> {
        let poll = Poll::new().map_err(StatsError::EventLoop)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(max_events),
            kinds: HashMap::new(),
            next_token: 0,
        })
    }

    /// Register `source` and tag it with `kind`.
    pub fn add<S>(&mut self, source: &mut S, kind: EventKind, interest: Interest) -> io::Result<Token>
    where
        S: Source + ?Sized,
    {
        let token = Token(self.next_token);
        self.poll.registry().register(source, token, interest)?;
        self.next_token += 1;
        self.kinds.insert(token, kind);
        trace!(?token, ?kind, "registered event source");
        Ok(token)
    }

    /// Deregister `source`. The tag is forgotten even if the poller refuses,
    /// so stale events for `token` are ignored from now on.
    pub fn remove<S>(&mut self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        let kind = self.kinds.remove(&token);
        trace!(?token, ?kind, "deregistering event source");
        self.poll.registry().deregister(source)
    }

    /// Block until at least one source is ready or `timeout` elapses.
    ///
    /// An interrupted wait yields an empty batch. Notifications for tokens
    /// that are no longer registered are dropped.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(StatsError::EventLoop(e));
        }

        let ready = self
            .events
            .iter()
            .filter_map(|event| {
                let token = event.token();
                self.kinds.get(&token).map(|&kind| ReadyEvent {
                    token,
                    kind,
                    readable: event.is_readable(),
                    closed: event.is_read_closed() || event.is_error(),
                })
            })
            .collect();
        Ok(ready)
    }

    pub fn kind_of(&self, token: Token) -> Option<EventKind> {
        self.kinds.get(&token).copied()
    }

    /// Number of registrations whose kind satisfies `pred`.
    pub fn count_where(&self, pred: impl Fn(&EventKind) -> bool) -> usize {
        self.kinds.values().filter(|kind| pred(kind)).count()
    }

    /// Total number of live registrations.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::Datapoint;
    use crate::ipc;

    #[test]
    fn test_add_and_remove_tracks_kinds() {
        let mut dispatcher = Dispatcher::new(8).unwrap();
        let (_tx, mut rx) = ipc::channel().unwrap();

        let token = dispatcher
            .add(&mut rx, EventKind::InputSample(0), Interest::READABLE)
            .unwrap();
        assert_eq!(dispatcher.kind_of(token), Some(EventKind::InputSample(0)));
        assert_eq!(dispatcher.len(), 1);

        dispatcher.remove(&mut rx, token).unwrap();
        assert_eq!(dispatcher.kind_of(token), None);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_tokens_are_distinct() {
        let mut dispatcher = Dispatcher::new(8).unwrap();
        let (_a_tx, mut a) = ipc::channel().unwrap();
        let (_b_tx, mut b) = ipc::channel().unwrap();

        let ta = dispatcher.add(&mut a, EventKind::InputSample(0), Interest::READABLE).unwrap();
        let tb = dispatcher.add(&mut b, EventKind::OutputSample(0), Interest::READABLE).unwrap();
        assert_ne!(ta, tb);
        assert_eq!(dispatcher.count_where(|k| matches!(k, EventKind::InputSample(_))), 1);
        assert_eq!(dispatcher.count_where(|k| matches!(k, EventKind::OutputSample(_))), 1);
    }

    #[test]
    fn test_wait_reports_ready_channel() {
        let mut dispatcher = Dispatcher::new(8).unwrap();
        let (quiet_tx, mut quiet) = ipc::channel().unwrap();
        let (busy_tx, mut busy) = ipc::channel().unwrap();
        dispatcher.add(&mut quiet, EventKind::InputSample(0), Interest::READABLE).unwrap();
        let busy_token = dispatcher
            .add(&mut busy, EventKind::InputSample(1), Interest::READABLE)
            .unwrap();

        busy_tx.send(&Datapoint::new(1, 1, 1)).unwrap();
        let ready = dispatcher.wait(Some(Duration::from_secs(1))).unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].token, busy_token);
        assert_eq!(ready[0].kind, EventKind::InputSample(1));
        assert!(ready[0].readable);
        drop(quiet_tx);
    }

    #[test]
    fn test_wait_times_out_empty() {
        let mut dispatcher = Dispatcher::new(8).unwrap();
        let (_tx, mut rx) = ipc::channel().unwrap();
        dispatcher.add(&mut rx, EventKind::InputSample(0), Interest::READABLE).unwrap();

        let ready = dispatcher.wait(Some(Duration::from_millis(20))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_removed_source_events_are_dropped() {
        let mut dispatcher = Dispatcher::new(8).unwrap();
        let (tx, mut rx) = ipc::channel().unwrap();
        let token = dispatcher.add(&mut rx, EventKind::OutputSample(3), Interest::READABLE).unwrap();
        tx.send(&Datapoint::new(1, 1, 1)).unwrap();
        dispatcher.remove(&mut rx, token).unwrap();

        let ready = dispatcher.wait(Some(Duration::from_millis(20))).unwrap();
        assert!(ready.is_empty());
    }
}
