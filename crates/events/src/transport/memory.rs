//! In-process implementation of the log contract.
//!
//! Committed positions are tracked per consumer group, so dropping a
//! subscription without committing and opening a new one redelivers the
//! uncommitted records, the same way a broker does after a consumer crash.
//!
//! Live members of one group split the partitions between them: member `i`
//! of `n` (in join order) owns every partition `p` with `p % n == i`. A join
//! or a drop rebalances the group, and every member restarts its newly
//! assigned partitions from the committed positions.
//!
//! A record is released once every known group has committed past it.
//! Offsets keep counting from the partition's base, so released records
//! never shift the offsets of retained ones.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sitepulse_core::error::TransportError;
use tokio::sync::Notify;

use super::{
    partition_for, EventLog, LogRecord, LogSubscription, RecordPosition, StartOffset,
};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Partition {
    /// Offset of the first retained record.
    base: u64,
    records: VecDeque<StoredRecord>,
}

impl Partition {
    fn high_watermark(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&StoredRecord> {
        let index = offset.checked_sub(self.base)?;
        self.records.get(usize::try_from(index).ok()?)
    }

    fn release_below(&mut self, offset: u64) -> usize {
        let mut released = 0;
        while self.base < offset && self.records.pop_front().is_some() {
            self.base += 1;
            released += 1;
        }
        released
    }
}

#[derive(Debug)]
struct GroupState {
    /// Next offset to read per partition.
    committed: Vec<u64>,
    /// Live member ids, in join order.
    members: Vec<u64>,
    /// Bumped on every join and leave.
    generation: u64,
}

impl GroupState {
    fn owns(&self, member: u64, partition: usize) -> bool {
        match self.members.iter().position(|&m| m == member) {
            Some(index) => partition % self.members.len() == index,
            None => false,
        }
    }
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Partition>,
    groups: HashMap<String, GroupState>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Partition::default()).collect(),
            groups: HashMap::new(),
        }
    }

    fn low_watermarks(&self) -> Vec<u64> {
        self.partitions.iter().map(|p| p.base).collect()
    }

    fn high_watermarks(&self) -> Vec<u64> {
        self.partitions.iter().map(Partition::high_watermark).collect()
    }

    /// Drop the records of `partition` that every group has committed.
    fn release(&mut self, partition: usize) -> usize {
        let floor = self
            .groups
            .values()
            .filter_map(|group| group.committed.get(partition).copied())
            .min();
        match (floor, self.partitions.get_mut(partition)) {
            (Some(floor), Some(records)) => records.release_below(floor),
            _ => 0,
        }
    }
}

#[derive(Debug)]
struct Inner {
    partitions: u32,
    topics: Mutex<HashMap<String, TopicLog>>,
    /// Signalled on append and on group membership changes.
    changed: Notify,
    next_member: AtomicU64,
}

impl Inner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Partitioned in-memory log with a fixed set of topics.
///
/// Cheap to clone; clones share the same records and group positions.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    /// Create a log serving `topics`, each split into `partitions`
    /// partitions (at least one).
    pub fn new<I, S>(topics: I, partitions: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let partitions = partitions.max(1);
        let topics = topics
            .into_iter()
            .map(|name| (name.into(), TopicLog::new(partitions)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                partitions,
                topics: Mutex::new(topics),
                changed: Notify::new(),
                next_member: AtomicU64::new(0),
            }),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Number of records retained in `topic`, across all partitions.
    pub fn len(&self, topic: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .map(|log| log.partitions.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Committed position (next offset to read) of `group` in one partition.
    pub fn committed(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        self.inner
            .topics()
            .get(topic)?
            .groups
            .get(group)?
            .committed
            .get(partition as usize)
            .copied()
    }

    /// Number of live subscriptions of `group` on `topic`.
    pub fn members(&self, topic: &str, group: &str) -> usize {
        self.inner
            .topics()
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map(|group| group.members.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<RecordPosition, TransportError> {
        let partition = partition_for(key, self.inner.partitions);
        let offset = {
            let mut topics = self.inner.topics();
            let log = topics
                .get_mut(topic)
                .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
            let records = &mut log.partitions[partition as usize];
            let offset = records.high_watermark();
            records.records.push_back(StoredRecord {
                key: key.to_string(),
                value,
            });
            offset
        };

        self.inner.changed.notify_waiters();
        Ok(RecordPosition { partition, offset })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<Box<dyn LogSubscription>, TransportError> {
        let member = self.inner.next_member.fetch_add(1, Ordering::Relaxed);
        let (positions, generation, members) = {
            let mut topics = self.inner.topics();
            let log = topics
                .get_mut(topic)
                .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
            let initial = match start {
                StartOffset::Earliest => log.low_watermarks(),
                StartOffset::Latest => log.high_watermarks(),
            };
            let state = log
                .groups
                .entry(group.to_string())
                .or_insert_with(|| GroupState {
                    committed: initial,
                    members: Vec::new(),
                    generation: 0,
                });
            state.members.push(member);
            state.generation += 1;
            (state.committed.clone(), state.generation, state.members.len())
        };

        // Existing members pick up the new assignment on their next read.
        self.inner.changed.notify_waiters();
        tracing::debug!(
            topic,
            group,
            member,
            members,
            ?positions,
            "Memory log subscription opened"
        );

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            member,
            generation,
            positions,
            next_partition: 0,
        }))
    }
}

/// One group member reading the partitions currently assigned to it.
///
/// Owned partitions are polled round-robin so a busy key cannot starve the
/// others; order within a partition is preserved.
struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    member: u64,
    generation: u64,
    positions: Vec<u64>,
    next_partition: usize,
}

impl MemorySubscription {
    fn try_next(&mut self) -> Result<Option<LogRecord>, TransportError> {
        let topics = self.inner.topics();
        let log = topics
            .get(&self.topic)
            .ok_or_else(|| TransportError::UnknownTopic(self.topic.clone()))?;
        let group = log
            .groups
            .get(&self.group)
            .ok_or_else(|| TransportError::Rejected(format!("group {} is gone", self.group)))?;

        if group.generation != self.generation {
            tracing::debug!(
                topic = %self.topic,
                group = %self.group,
                member = self.member,
                members = group.members.len(),
                "Memory log group rebalanced"
            );
            self.positions = group.committed.clone();
            self.generation = group.generation;
        }

        let count = log.partitions.len();
        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            if !group.owns(self.member, partition) {
                continue;
            }
            let offset = self.positions[partition];
            if let Some(stored) = log.partitions[partition].get(offset) {
                self.positions[partition] = offset + 1;
                self.next_partition = (partition + 1) % count;
                return Ok(Some(LogRecord {
                    topic: self.topic.clone(),
                    partition: partition as u32,
                    offset,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LogSubscription for MemorySubscription {
    async fn next(&mut self) -> Result<LogRecord, TransportError> {
        let inner = Arc::clone(&self.inner);
        loop {
            // Register for wake-up before checking, so an append between the
            // check and the await is not missed.
            let changed = inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(record) = self.try_next()? {
                return Ok(record);
            }
            changed.await;
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError> {
        let partition = record.partition as usize;
        let mut topics = self.inner.topics();
        let log = topics
            .get_mut(&self.topic)
            .ok_or_else(|| TransportError::UnknownTopic(self.topic.clone()))?;
        let group = log
            .groups
            .get_mut(&self.group)
            .ok_or_else(|| TransportError::Rejected(format!("group {} is gone", self.group)))?;

        if !group.owns(self.member, partition) {
            return Err(TransportError::Rejected(format!(
                "partition {} is not assigned to this member of {}",
                record.partition, self.group
            )));
        }
        let slot = group.committed.get_mut(partition).ok_or_else(|| {
            TransportError::Rejected(format!("no partition {}", record.partition))
        })?;
        *slot = (*slot).max(record.offset + 1);

        let released = log.release(partition);
        if released > 0 {
            tracing::trace!(
                topic = %self.topic,
                partition,
                released,
                "Memory log records released"
            );
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        {
            let mut topics = self.inner.topics();
            let Some(group) = topics
                .get_mut(&self.topic)
                .and_then(|log| log.groups.get_mut(&self.group))
            else {
                return;
            };
            group.members.retain(|&m| m != self.member);
            group.generation += 1;
        }
        self.inner.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn log() -> MemoryLog {
        MemoryLog::new(["user_events"], 4)
    }

    #[tokio::test]
    async fn append_to_unknown_topic_fails() {
        let log = log();
        let result = log.append("nope", "k", b"{}".to_vec()).await;
        assert_matches!(result, Err(TransportError::UnknownTopic(t)) if t == "nope");
    }

    #[tokio::test]
    async fn same_key_is_read_back_in_order() {
        let log = log();
        for i in 0..5 {
            log.append("user_events", "user-42", format!("{i}").into_bytes())
                .await
                .unwrap();
        }

        let mut sub = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            let record = sub.next().await.unwrap();
            assert_eq!(record.key, "user-42");
            seen.push(String::from_utf8(record.value).unwrap());
        }
        assert_eq!(seen, ["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn uncommitted_records_are_redelivered_to_new_subscription() {
        let log = log();
        log.append("user_events", "k", b"a".to_vec()).await.unwrap();
        log.append("user_events", "k", b"b".to_vec()).await.unwrap();

        let mut first = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        let a = first.next().await.unwrap();
        first.commit(&a).await.unwrap();
        let b = first.next().await.unwrap();
        assert_eq!(b.value, b"b");
        drop(first);

        let mut second = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        let again = second.next().await.unwrap();
        assert_eq!(again.value, b"b");
        assert_eq!(again.offset, b.offset);
    }

    #[tokio::test]
    async fn latest_skips_existing_records() {
        let log = log();
        log.append("user_events", "k", b"old".to_vec()).await.unwrap();

        let mut sub = log
            .subscribe("user_events", "fresh", StartOffset::Latest)
            .await
            .unwrap();
        log.append("user_events", "k", b"new".to_vec()).await.unwrap();

        let record = sub.next().await.unwrap();
        assert_eq!(record.value, b"new");
    }

    #[tokio::test]
    async fn next_waits_for_append() {
        let log = log();
        let mut sub = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .append("user_events", "k", b"late".to_vec())
                .await
                .unwrap();
        });

        let record = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("append should wake the subscription")
            .unwrap();
        assert_eq!(record.value, b"late");
    }

    #[tokio::test]
    async fn commit_never_moves_backwards() {
        let log = log();
        let p0 = log.append("user_events", "k", b"a".to_vec()).await.unwrap();
        log.append("user_events", "k", b"b".to_vec()).await.unwrap();

        let mut sub = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        let a = sub.next().await.unwrap();
        let b = sub.next().await.unwrap();
        sub.commit(&b).await.unwrap();
        sub.commit(&a).await.unwrap();

        assert_eq!(log.committed("user_events", "g", p0.partition), Some(2));
    }

    /// First key of the form `key-N` that routes to `partition`.
    fn key_for(partition: u32, partitions: u32) -> String {
        (0..)
            .map(|i| format!("key-{i}"))
            .find(|key| partition_for(key, partitions) == partition)
            .unwrap()
    }

    async fn next_within(sub: &mut Box<dyn LogSubscription>, wait: Duration) -> Option<LogRecord> {
        tokio::time::timeout(wait, sub.next())
            .await
            .ok()
            .map(|record| record.unwrap())
    }

    #[tokio::test]
    async fn group_members_split_partitions() {
        let log = MemoryLog::new(["user_events"], 2);
        let mut a = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        let mut b = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        assert_eq!(log.members("user_events", "g"), 2);

        log.append("user_events", &key_for(0, 2), b"p0".to_vec())
            .await
            .unwrap();
        log.append("user_events", &key_for(1, 2), b"p1".to_vec())
            .await
            .unwrap();

        let from_a = next_within(&mut a, Duration::from_secs(2)).await.unwrap();
        let from_b = next_within(&mut b, Duration::from_secs(2)).await.unwrap();
        assert_eq!(from_a.partition, 0);
        assert_eq!(from_b.partition, 1);

        assert!(next_within(&mut a, Duration::from_millis(50)).await.is_none());
        assert!(next_within(&mut b, Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn departed_member_partitions_resume_from_committed() {
        let log = MemoryLog::new(["user_events"], 2);
        let mut a = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        let mut b = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        log.append("user_events", &key_for(1, 2), b"p1".to_vec())
            .await
            .unwrap();

        // Received by b but never committed.
        let lost = next_within(&mut b, Duration::from_secs(2)).await.unwrap();
        drop(b);

        let again = next_within(&mut a, Duration::from_secs(2))
            .await
            .expect("remaining member should take over the partition");
        assert_eq!(again.partition, lost.partition);
        assert_eq!(again.offset, lost.offset);
        assert_eq!(log.members("user_events", "g"), 1);
    }

    #[tokio::test]
    async fn commit_on_foreign_partition_is_rejected() {
        let log = MemoryLog::new(["user_events"], 2);
        let mut a = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();
        log.append("user_events", &key_for(1, 2), b"p1".to_vec())
            .await
            .unwrap();
        let record = next_within(&mut a, Duration::from_secs(2)).await.unwrap();

        // b joins and takes partition 1 before a commits.
        let _b = log
            .subscribe("user_events", "g", StartOffset::Earliest)
            .await
            .unwrap();

        assert_matches!(a.commit(&record).await, Err(TransportError::Rejected(_)));
        assert_eq!(log.committed("user_events", "g", 1), Some(0));
    }

    #[tokio::test]
    async fn records_are_released_once_every_group_commits() {
        let log = MemoryLog::new(["user_events"], 1);
        for i in 0..100 {
            log.append("user_events", "k", format!("{i}").into_bytes())
                .await
                .unwrap();
        }

        let mut fast = log
            .subscribe("user_events", "fast", StartOffset::Earliest)
            .await
            .unwrap();
        let mut slow = log
            .subscribe("user_events", "slow", StartOffset::Earliest)
            .await
            .unwrap();

        for _ in 0..100 {
            let record = fast.next().await.unwrap();
            fast.commit(&record).await.unwrap();
        }
        assert_eq!(log.len("user_events"), 100, "slow group still needs them");

        for _ in 0..60 {
            let record = slow.next().await.unwrap();
            slow.commit(&record).await.unwrap();
        }
        assert_eq!(log.len("user_events"), 40);

        // Offsets keep counting past released records.
        let position = log.append("user_events", "k", b"100".to_vec()).await.unwrap();
        assert_eq!(position.offset, 100);
        let record = slow.next().await.unwrap();
        assert_eq!(record.offset, 60);
        assert_eq!(record.value, b"60");
    }

    #[tokio::test]
    async fn new_group_starts_at_first_retained_record() {
        let log = MemoryLog::new(["user_events"], 1);
        for value in [b"a", b"b", b"c"] {
            log.append("user_events", "k", value.to_vec()).await.unwrap();
        }
        let mut first = log
            .subscribe("user_events", "g1", StartOffset::Earliest)
            .await
            .unwrap();
        let a = first.next().await.unwrap();
        first.commit(&a).await.unwrap();

        let mut late = log
            .subscribe("user_events", "g2", StartOffset::Earliest)
            .await
            .unwrap();
        let record = late.next().await.unwrap();
        assert_eq!(record.offset, 1);
        assert_eq!(record.value, b"b");
    }
}
