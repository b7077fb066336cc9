use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::utils::unix_time_secs;

/// Size in bytes of one encoded datapoint record on a plugin channel.
///
/// Three fixed-width integers encoded with bincode's default (fixint,
/// little-endian) options. Well below `PIPE_BUF`, so a single write of one
/// record is atomic.
pub const DATAPOINT_WIRE_SIZE: usize = 24;

/// One throughput sample reported by a plugin.
///
/// `time` is whole seconds since the Unix epoch and doubles as the bucketing
/// key in [`DatapointRing`](crate::ring_buffer::DatapointRing).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datapoint {
    pub time: i64,
    pub records: u64,
    pub bytes: u64,
}

impl Datapoint {
    pub fn new(time: i64, records: u64, bytes: u64) -> Self {
        Self {
            time,
            records,
            bytes,
        }
    }

    /// Sample stamped with the current wall-clock second.
    pub fn now(records: u64, bytes: u64) -> Self {
        Self::new(unix_time_secs(), records, bytes)
    }

    /// Serialize to the fixed-size wire record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() != DATAPOINT_WIRE_SIZE {
            return Err(StatsError::RecordSize {
                expected: DATAPOINT_WIRE_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Decode one wire record. Anything other than exactly
    /// [`DATAPOINT_WIRE_SIZE`] bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DATAPOINT_WIRE_SIZE {
            return Err(StatsError::RecordSize {
                expected: DATAPOINT_WIRE_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bincode::deserialize(bytes)?)
    }
}
