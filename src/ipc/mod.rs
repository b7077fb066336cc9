//! Plugin → worker channels and the control socket.
//!
//! Each registered plugin gets its own pipe. The plugin keeps the blocking
//! write end ([`StatsSender`]); the worker keeps the non-blocking read end
//! ([`StatsReceiver`]) registered on its event loop. A record is a fixed
//! [`DATAPOINT_WIRE_SIZE`]-byte datapoint, so one `write` is one atomic
//! message on the pipe.

use std::io::{self, Read, Write};
use std::os::unix::io::{FromRawFd, IntoRawFd};

use mio::event::Source;
use mio::unix::pipe;
use mio::{Interest, Registry, Token};
use os_pipe::PipeWriter;
use tracing::trace;

use crate::datapoint::{Datapoint, DATAPOINT_WIRE_SIZE};
use crate::error::Result;

pub mod control_socket;

pub use control_socket::{ClientId, ControlClient, ControlServer};

/// Create a connected sender/receiver pair.
///
/// The descriptors are close-on-exec. Dropping either half closes its end;
/// the receiver reports [`Received::Closed`] once the sender is gone.
pub fn channel() -> io::Result<(StatsSender, StatsReceiver)> {
    let (reader, writer) = os_pipe::pipe()?;

    // SAFETY: `into_raw_fd` transfers sole ownership of a valid descriptor.
    let pipe = unsafe { pipe::Receiver::from_raw_fd(reader.into_raw_fd()) };
    pipe.set_nonblocking(true)?;

    Ok((
        StatsSender { writer },
        StatsReceiver {
            pipe,
            pending: [0u8; DATAPOINT_WIRE_SIZE],
            filled: 0,
        },
    ))
}

/// Write end of a plugin channel, owned by the plugin.
///
/// Not `Clone`: each channel has exactly one writer.
#[derive(Debug)]
pub struct StatsSender {
    writer: PipeWriter,
}

impl StatsSender {
    /// Send one datapoint to the worker.
    ///
    /// Blocks while the pipe is full.
    pub fn send(&self, datapoint: &Datapoint) -> Result<()> {
        let record = datapoint.to_bytes()?;
        (&self.writer).write_all(&record)?;
        Ok(())
    }

    /// Report throughput for the current wall-clock second.
    pub fn record(&self, records: u64, bytes: u64) -> Result<()> {
        self.send(&Datapoint::now(records, bytes))
    }
}

/// Result of a single [`StatsReceiver::receive`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Datapoint(Datapoint),
    /// Nothing (or only part of a record) is available right now.
    NoData,
    /// The writer has been dropped and the pipe is drained.
    Closed,
}

/// Read end of a plugin channel, owned by the worker.
#[derive(Debug)]
pub struct StatsReceiver {
    pipe: pipe::Receiver,
    pending: [u8; DATAPOINT_WIRE_SIZE],
    filled: usize,
}

impl StatsReceiver {
    /// Read exactly one record without blocking.
    ///
    /// A record split across reads is kept until the remainder arrives.
    pub fn receive(&mut self) -> Result<Received> {
        loop {
            match self.pipe.read(&mut self.pending[self.filled..]) {
                Ok(0) => return Ok(Received::Closed),
                Ok(n) => {
                    self.filled += n;
                    if self.filled < DATAPOINT_WIRE_SIZE {
                        trace!(filled = self.filled, "partial datapoint record");
                        continue;
                    }
                    self.filled = 0;
                    let datapoint = Datapoint::from_bytes(&self.pending)?;
                    return Ok(Received::Datapoint(datapoint));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Received::NoData),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Source for StatsReceiver {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.pipe.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.pipe.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.pipe.deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_then_receive() {
        let (tx, mut rx) = channel().unwrap();
        let dp = Datapoint::new(10, 3, 300);
        tx.send(&dp).unwrap();

        assert_eq!(rx.receive().unwrap(), Received::Datapoint(dp));
        assert_eq!(rx.receive().unwrap(), Received::NoData);
    }

    #[test]
    fn test_empty_channel_has_no_data() {
        let (_tx, mut rx) = channel().unwrap();
        assert_eq!(rx.receive().unwrap(), Received::NoData);
    }

    #[test]
    fn test_records_arrive_in_order() {
        let (tx, mut rx) = channel().unwrap();
        for t in 0..5 {
            tx.send(&Datapoint::new(t, t as u64, 0)).unwrap();
        }
        for t in 0..5 {
            assert_eq!(
                rx.receive().unwrap(),
                Received::Datapoint(Datapoint::new(t, t as u64, 0))
            );
        }
    }

    #[test]
    fn test_dropped_sender_closes_after_drain() {
        let (tx, mut rx) = channel().unwrap();
        tx.send(&Datapoint::new(1, 1, 1)).unwrap();
        drop(tx);

        assert!(matches!(rx.receive().unwrap(), Received::Datapoint(_)));
        assert_eq!(rx.receive().unwrap(), Received::Closed);
    }

    #[test]
    fn test_sender_works_from_another_thread() {
        let (tx, mut rx) = channel().unwrap();
        std::thread::spawn(move || tx.record(8, 512).unwrap())
            .join()
            .unwrap();

        match rx.receive().unwrap() {
            Received::Datapoint(dp) => assert_eq!((dp.records, dp.bytes), (8, 512)),
            other => panic!("expected a datapoint, got {:?}", other),
        }
    }
}
