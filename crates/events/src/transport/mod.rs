//! Contract of the durable, partitioned, replayable log.
//!
//! The broker itself is external. [`EventLog`] and [`LogSubscription`]
//! describe what the producer and the trigger consumer rely on:
//!
//! - records appended with the same key land in the same partition and are
//!   read back in append order;
//! - a consumer group keeps one committed position per partition, and a new
//!   subscription resumes right after it;
//! - live members of one group read disjoint sets of partitions;
//! - a group with no committed position starts at [`StartOffset`].
//!
//! [`MemoryLog`] is the in-process implementation used by single-node
//! deployments and tests.

pub mod memory;

use async_trait::async_trait;
use sitepulse_core::error::TransportError;

pub use memory::MemoryLog;

/// Where a consumer group with no committed position begins reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    /// Replay every retained record.
    #[default]
    Earliest,
    /// Only records appended after the subscription is created.
    Latest,
}

impl std::str::FromStr for StartOffset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!("expected `earliest` or `latest`, got `{other}`")),
        }
    }
}

/// Position of an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

/// A record read back from the log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Vec<u8>,
}

impl LogRecord {
    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Write side and subscription factory of the durable log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append `value` to `topic`, routed by `key`.
    async fn append(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<RecordPosition, TransportError>;

    /// Open a subscription for `group` on `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<Box<dyn LogSubscription>, TransportError>;
}

/// Read side of one consumer group member.
#[async_trait]
pub trait LogSubscription: Send {
    /// Wait for the next record. Not bounded: callers race it against their
    /// cancellation token.
    async fn next(&mut self) -> Result<LogRecord, TransportError>;

    /// Mark `record` (and everything before it in its partition) as handled
    /// for this group.
    async fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError>;
}

/// Map a partition key onto one of `partitions` partitions.
///
/// FNV-1a is used so the mapping is identical across processes and
/// releases, unlike `std`'s randomly seeded hasher.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    hash % partitions.max(1)
}
