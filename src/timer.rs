//! Periodic tick source for the flush scheduler.
//!
//! Backed by a non-blocking, monotonic `timerfd`, so the tick arrives through
//! the same poller as every other event instead of through a poll timeout.

use std::os::unix::io::{AsFd, AsRawFd};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Interest, Token};
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use crate::dispatcher::{Dispatcher, EventKind};
use crate::error::{Result, StatsError};

pub struct TickTimer {
    fd: TimerFd,
    interval: Duration,
    token: Option<Token>,
}

impl TickTimer {
    /// Create and arm a timer firing every `interval`.
    ///
    /// A zero interval would disarm the timerfd, so it is rejected with
    /// [`StatsError::Config`].
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(StatsError::Config("tick interval must be non-zero".into()));
        }
        let fd = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )
        .map_err(StatsError::Timer)?;
        fd.set(
            Expiration::Interval(TimeSpec::from_duration(interval)),
            TimerSetTimeFlags::empty(),
        )
        .map_err(StatsError::Timer)?;

        Ok(Self {
            fd,
            interval,
            token: None,
        })
    }

    /// Register the timer with the dispatcher as the [`EventKind::Tick`]
    /// source.
    pub fn register(&mut self, dispatcher: &mut Dispatcher) -> Result<()> {
        let raw = self.fd.as_fd().as_raw_fd();
        let token = dispatcher
            .add(&mut SourceFd(&raw), EventKind::Tick, Interest::READABLE)
            .map_err(StatsError::EventLoop)?;
        self.token = Some(token);
        Ok(())
    }

    /// Consume pending expirations.
    ///
    /// Returns `false` when the timer had not actually fired (a spurious
    /// wakeup).
    pub fn acknowledge(&self) -> Result<bool> {
        match self.fd.wait() {
            Ok(()) => Ok(true),
            Err(Errno::EAGAIN) => Ok(false),
            Err(e) => Err(StatsError::Timer(e)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_tick_fires_through_dispatcher() {
        let mut dispatcher = Dispatcher::new(4).unwrap();
        let mut timer = TickTimer::new(Duration::from_millis(20)).unwrap();
        timer.register(&mut dispatcher).unwrap();
        assert_eq!(dispatcher.count_where(|k| *k == EventKind::Tick), 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut fired = false;
        while !fired && Instant::now() < deadline {
            for event in dispatcher.wait(Some(Duration::from_millis(100))).unwrap() {
                if event.kind == EventKind::Tick {
                    fired = timer.acknowledge().unwrap();
                }
            }
        }
        assert!(fired);
    }

    #[test]
    fn test_acknowledge_before_expiry_is_spurious() {
        let timer = TickTimer::new(Duration::from_secs(60)).unwrap();
        assert!(!timer.acknowledge().unwrap());
        assert_eq!(timer.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = TickTimer::new(Duration::ZERO).err().unwrap();
        assert!(matches!(err, StatsError::Config(_)));
    }
}
