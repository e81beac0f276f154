//! In-process broker.
//!
//! Topics are split into a fixed number of partitions; the partition of a
//! record is a stable hash of its key. Each consumer group tracks one
//! committed offset per partition and polls always read from that offset,
//! so anything polled but not committed is served again. Partitions are
//! assigned round-robin across the members of a group.
//!
//! Records below the lowest committed offset of every group that reads a
//! partition are discarded, and each partition keeps at most
//! `retention` records. A group positioned before the start of the log
//! resumes at its first retained record.
//!
//! All state sits behind one async mutex that is never held across an
//! await on anything other than itself.

use super::{
    Acks, Broker, BrokerError, ConsumedMessage, Consumer, DeliveryReport, Producer, ProducerId,
    ProducerRecord, ProducerSettings,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tracing::debug;
use uuid::Uuid;

/// How many recent sequence numbers are remembered per producer and
/// partition for de-duplication.
const SEQUENCE_WINDOW: usize = 1024;

/// Default partition count for topics.
pub const DEFAULT_PARTITIONS: u32 = 6;

/// Default cap on retained records per partition.
pub const DEFAULT_RETENTION: usize = 100_000;

/// Stable partition choice for a key (32-bit FNV-1a).
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions.max(1)
}

/// In-process [`Broker`] implementation. Cheap to clone.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    partitions: u32,
    retention: usize,
    state: Mutex<State>,
    next_member: AtomicU64,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, TopicLog>,
    committed: HashMap<GroupPartition, u64>,
    /// Members per (group, topic), in join order.
    members: HashMap<(String, String), Vec<u64>>,
    failing_sends: u32,
    consume_faults: HashMap<String, VecDeque<BrokerError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupPartition {
    group: String,
    topic: String,
    partition: u32,
}

struct TopicLog {
    partitions: Vec<PartitionLog>,
    /// Bumped on every append so blocked polls wake up.
    appended: watch::Sender<u64>,
}

#[derive(Default)]
struct PartitionLog {
    /// Offset of the first retained record.
    base_offset: u64,
    records: VecDeque<StoredRecord>,
    /// sequence -> offset, per producer.
    sequences: HashMap<ProducerId, BTreeMap<u64, u64>>,
}

struct StoredRecord {
    key: String,
    payload: Bytes,
    timestamp: OffsetDateTime,
}

impl PartitionLog {
    fn get(&self, offset: u64) -> Option<&StoredRecord> {
        let index = offset.checked_sub(self.base_offset)?;
        self.records.get(usize::try_from(index).ok()?)
    }

    fn next_offset(&self) -> u64 {
        self.base_offset + self.records.len() as u64
    }

    /// Drop every record below `offset`. Returns how many were dropped.
    fn truncate_before(&mut self, offset: u64) -> usize {
        let excess = offset.saturating_sub(self.base_offset);
        let count = usize::try_from(excess)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        self.records.drain(..count);
        self.base_offset += count as u64;
        count
    }
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        let (appended, _) = watch::channel(0u64);
        Self {
            partitions: (0..partitions.max(1)).map(|_| PartitionLog::default()).collect(),
            appended,
        }
    }
}

impl State {
    fn topic_mut(&mut self, name: &str, partitions: u32) -> &mut TopicLog {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| TopicLog::new(partitions))
    }

    fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        let key = GroupPartition {
            group: group.to_string(),
            topic: topic.to_string(),
            partition,
        };
        self.committed.get(&key).copied().unwrap_or(0)
    }

    /// Partitions owned by `member` under round-robin assignment.
    fn assignment(&self, group: &str, topic: &str, member: u64, partitions: u32) -> Vec<u32> {
        let Some(members) = self.members.get(&(group.to_string(), topic.to_string())) else {
            return Vec::new();
        };
        let Some(index) = members.iter().position(|m| *m == member) else {
            return Vec::new();
        };
        let count = members.len();
        (0..partitions)
            .filter(|p| *p as usize % count == index)
            .collect()
    }

    /// Next record at the committed position of any assigned partition,
    /// rotating the starting partition for fairness.
    fn next_record(
        &self,
        group: &str,
        topic: &str,
        assigned: &[u32],
        cursor: &mut usize,
    ) -> Option<ConsumedMessage> {
        let log = self.topics.get(topic)?;
        if assigned.is_empty() {
            return None;
        }
        for step in 0..assigned.len() {
            let partition = assigned[(*cursor + step) % assigned.len()];
            let Some(partition_log) = log.partitions.get(partition as usize) else {
                continue;
            };
            let offset = self
                .committed_offset(group, topic, partition)
                .max(partition_log.base_offset);
            if let Some(record) = partition_log.get(offset) {
                *cursor = (*cursor + step + 1) % assigned.len();
                return Some(ConsumedMessage {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    timestamp: record.timestamp,
                });
            }
        }
        None
    }

    /// Lowest committed offset across the groups reading `topic`, or `None`
    /// when no group reads it.
    fn low_watermark(&self, topic: &str, partition: u32) -> Option<u64> {
        let groups: HashSet<&str> = self
            .members
            .keys()
            .filter(|(_, t)| t == topic)
            .map(|(group, _)| group.as_str())
            .chain(
                self.committed
                    .keys()
                    .filter(|k| k.topic == topic && k.partition == partition)
                    .map(|k| k.group.as_str()),
            )
            .collect();
        groups
            .into_iter()
            .map(|group| self.committed_offset(group, topic, partition))
            .min()
    }

    /// Discard records every reading group has committed.
    fn compact(&mut self, topic: &str, partition: u32) {
        let Some(low) = self.low_watermark(topic, partition) else {
            return;
        };
        let Some(partition_log) = self
            .topics
            .get_mut(topic)
            .and_then(|log| log.partitions.get_mut(partition as usize))
        else {
            return;
        };
        let dropped = partition_log.truncate_before(low);
        if dropped > 0 {
            debug!(
                topic,
                partition,
                dropped,
                base_offset = partition_log.base_offset,
                "Compacted partition"
            );
        }
    }

    fn append(
        &mut self,
        partitions: u32,
        retention: usize,
        producer: Option<(ProducerId, u64)>,
        topic: &str,
        key: String,
        payload: Bytes,
    ) -> DeliveryReport {
        let partition = partition_for(&key, partitions);
        let log = self.topic_mut(topic, partitions);
        let Some(partition_log) = log.partitions.get_mut(partition as usize) else {
            // Every topic shares the broker's partition count.
            return DeliveryReport {
                partition: 0,
                offset: None,
            };
        };

        let duplicate = producer.and_then(|(producer_id, sequence)| {
            partition_log
                .sequences
                .get(&producer_id)
                .and_then(|seen| seen.get(&sequence))
                .map(|offset| (sequence, *offset))
        });
        if let Some((sequence, offset)) = duplicate {
            debug!(topic, partition, sequence, "Dropped duplicate producer sequence");
            return DeliveryReport {
                partition,
                offset: Some(offset),
            };
        }

        let offset = partition_log.next_offset();
        partition_log.records.push_back(StoredRecord {
            key,
            payload,
            timestamp: OffsetDateTime::now_utc(),
        });
        if partition_log.records.len() > retention {
            let keep_from = partition_log.next_offset() - retention as u64;
            partition_log.truncate_before(keep_from);
        }
        if let Some((producer_id, sequence)) = producer {
            let seen = partition_log.sequences.entry(producer_id).or_default();
            seen.insert(sequence, offset);
            while seen.len() > SEQUENCE_WINDOW {
                seen.pop_first();
            }
        }
        log.appended.send_modify(|n| *n = n.wrapping_add(1));

        DeliveryReport {
            partition,
            offset: Some(offset),
        }
    }
}

impl MemoryBroker {
    /// Create a broker whose topics have `partitions` partitions each.
    /// The contract topics are created up front.
    pub fn new(partitions: u32) -> Self {
        Self::with_retention(partitions, DEFAULT_RETENTION)
    }

    /// Like [`MemoryBroker::new`], keeping at most `retention` records per
    /// partition.
    pub fn with_retention(partitions: u32, retention: usize) -> Self {
        let partitions = partitions.max(1);
        let mut state = State::default();
        for topic in livescore_sdk::topics::ALL_TOPICS {
            state.topic_mut(topic, partitions);
        }
        Self {
            inner: Arc::new(Inner {
                partitions,
                retention: retention.max(1),
                state: Mutex::new(state),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Append a record directly, bypassing producer settings.
    pub async fn produce_raw(
        &self,
        topic: &str,
        key: &str,
        payload: impl Into<Bytes>,
    ) -> DeliveryReport {
        let mut state = self.inner.state.lock().await;
        state.append(
            self.inner.partitions,
            self.inner.retention,
            None,
            topic,
            key.to_string(),
            payload.into(),
        )
    }

    /// Make the next `count` producer sends fail with a transient error.
    pub async fn fail_next_sends(&self, count: u32) {
        self.inner.state.lock().await.failing_sends = count;
    }

    /// Queue an error to be returned by the next poll on `topic`.
    pub async fn inject_consume_error(&self, topic: &str, error: BrokerError) {
        self.inner
            .state
            .lock()
            .await
            .consume_faults
            .entry(topic.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every retained record of `topic`, partition by partition, in offset
    /// order.
    pub async fn records(&self, topic: &str) -> Vec<ConsumedMessage> {
        let state = self.inner.state.lock().await;
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, p)| {
                p.records
                    .iter()
                    .enumerate()
                    .map(move |(index, r)| ConsumedMessage {
                        topic: topic.to_string(),
                        partition: partition as u32,
                        offset: p.base_offset + index as u64,
                        key: r.key.clone(),
                        payload: r.payload.clone(),
                        timestamp: r.timestamp,
                    })
            })
            .collect()
    }

    pub async fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.inner
            .state
            .lock()
            .await
            .committed_offset(group, topic, partition)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn producer(&self, settings: ProducerSettings) -> Result<Arc<dyn Producer>, BrokerError> {
        Ok(Arc::new(MemoryProducer {
            inner: self.inner.clone(),
            id: Uuid::new_v4(),
            settings,
        }))
    }

    async fn consumer(&self, group_id: &str, topic: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let member_id = self.inner.next_member.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock().await;
            state.topic_mut(topic, self.inner.partitions);
            state
                .members
                .entry((group_id.to_string(), topic.to_string()))
                .or_default()
                .push(member_id);
        }
        debug!(group_id, topic, member_id, "Consumer joined group");
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            member_id,
            cursor: 0,
            closed: false,
        }))
    }
}

struct MemoryProducer {
    inner: Arc<Inner>,
    id: ProducerId,
    settings: ProducerSettings,
}

#[async_trait]
impl Producer for MemoryProducer {
    fn producer_id(&self) -> ProducerId {
        self.id
    }

    async fn send(&self, batch: Vec<ProducerRecord>) -> Result<Vec<DeliveryReport>, BrokerError> {
        let mut state = self.inner.state.lock().await;
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            if self.settings.acks == Acks::None {
                // Nobody is waiting for an answer: the batch is lost.
                debug!(records = batch.len(), "Unacknowledged batch dropped");
                return Ok(batch
                    .iter()
                    .map(|record| unacknowledged(record, self.inner.partitions))
                    .collect());
            }
            return Err(BrokerError::Transient("injected send failure".into()));
        }

        let reports = batch
            .into_iter()
            .map(|record| {
                let identity = self
                    .settings
                    .idempotent
                    .then_some((self.id, record.sequence));
                let report = state.append(
                    self.inner.partitions,
                    self.inner.retention,
                    identity,
                    &record.topic,
                    record.key,
                    record.payload,
                );
                match self.settings.acks {
                    Acks::None => DeliveryReport {
                        offset: None,
                        ..report
                    },
                    Acks::Leader | Acks::All => report,
                }
            })
            .collect();
        Ok(reports)
    }
}

/// Report for a record sent without acknowledgement: the partition is known
/// from the key, the offset is not.
fn unacknowledged(record: &ProducerRecord, partitions: u32) -> DeliveryReport {
    DeliveryReport {
        partition: partition_for(&record.key, partitions),
        offset: None,
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    group_id: String,
    topic: String,
    member_id: u64,
    cursor: usize,
    closed: bool,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        let partitions = self.inner.partitions;

        loop {
            let mut appended = {
                let mut state = self.inner.state.lock().await;
                if let Some(error) = state
                    .consume_faults
                    .get_mut(&self.topic)
                    .and_then(VecDeque::pop_front)
                {
                    return Err(error);
                }
                let assigned =
                    state.assignment(&self.group_id, &self.topic, self.member_id, partitions);
                if let Some(message) =
                    state.next_record(&self.group_id, &self.topic, &assigned, &mut self.cursor)
                {
                    return Ok(Some(message));
                }
                // Subscribe while still holding the lock so no append slips
                // between the check and the wait.
                state.topic_mut(&self.topic, partitions).appended.subscribe()
            };

            match tokio::time::timeout_at(deadline, appended.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(BrokerError::Closed),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let mut state = self.inner.state.lock().await;
        let key = GroupPartition {
            group: self.group_id.clone(),
            topic: message.topic.clone(),
            partition: message.partition,
        };
        let position = state.committed.entry(key).or_insert(0);
        *position = (*position).max(message.offset + 1);
        state.compact(&message.topic, message.partition);
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.inner.state.lock().await;
        if let Some(members) = state
            .members
            .get_mut(&(self.group_id.clone(), self.topic.clone()))
        {
            members.retain(|m| *m != self.member_id);
        }
        debug!(group_id = %self.group_id, topic = %self.topic, "Consumer left group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, key: &str, payload: &'static str, sequence: u64) -> ProducerRecord {
        ProducerRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            sequence,
        }
    }

    #[test]
    fn test_partition_is_stable_per_key() {
        let first = partition_for("17", 6);
        for _ in 0..10 {
            assert_eq!(partition_for("17", 6), first);
        }
        assert!(first < 6);
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[tokio::test]
    async fn test_uncommitted_record_is_served_again() {
        let broker = MemoryBroker::new(1);
        broker.produce_raw("live-scores", "1", "a").await;
        broker.produce_raw("live-scores", "1", "b").await;

        let mut consumer = broker.consumer("g", "live-scores").await.unwrap();
        let first = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(&first.payload[..], b"a");

        // Not committed: same record again.
        let again = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.offset, first.offset);

        consumer.commit(&again).await.unwrap();
        let next = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(&next.payload[..], b"b");
        assert_eq!(broker.committed_offset("g", "live-scores", 0).await, 1);
    }

    #[tokio::test]
    async fn test_idempotent_producer_drops_duplicate_sequence() {
        let broker = MemoryBroker::new(3);
        let producer = broker.producer(ProducerSettings::default()).await.unwrap();

        let first = producer
            .send(vec![record("ingest-events", "5", "x", 0)])
            .await
            .unwrap();
        let retry = producer
            .send(vec![record("ingest-events", "5", "x", 0)])
            .await
            .unwrap();

        assert_eq!(first, retry);
        assert_eq!(broker.records("ingest-events").await.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let broker = MemoryBroker::new(1);
        let producer = broker.producer(ProducerSettings::default()).await.unwrap();
        broker.fail_next_sends(1).await;

        let failed = producer.send(vec![record("live-scores", "1", "x", 0)]).await;
        assert!(matches!(failed, Err(BrokerError::Transient(_))));
        assert!(producer.send(vec![record("live-scores", "1", "x", 0)]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_then_wakes_on_append() {
        let broker = MemoryBroker::new(2);
        let mut consumer = broker.consumer("g", "player-updates").await.unwrap();

        assert!(consumer.poll(Duration::from_secs(1)).await.unwrap().is_none());

        let writer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.produce_raw("player-updates", "42", "stats").await;
        });
        let message = consumer.poll(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(message.key, "42");
    }

    #[tokio::test]
    async fn test_group_members_split_partitions() {
        let broker = MemoryBroker::new(4);
        for key in 0..40 {
            broker.produce_raw("ingest-events", &key.to_string(), "e").await;
        }
        let mut a = broker.consumer("g", "ingest-events").await.unwrap();
        let mut b = broker.consumer("g", "ingest-events").await.unwrap();

        let from_a = a.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        let from_b = b.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_ne!(from_a.partition % 2, from_b.partition % 2);

        // After `b` leaves, `a` owns every partition.
        b.close().await;
        let mut seen = std::collections::HashSet::new();
        while let Some(message) = a.poll(Duration::from_millis(10)).await.unwrap() {
            seen.insert(message.partition);
            a.commit(&message).await.unwrap();
        }
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn test_injected_consume_error_is_returned_once() {
        let broker = MemoryBroker::new(1);
        let mut consumer = broker.consumer("g", "live-scores").await.unwrap();
        broker
            .inject_consume_error(
                "live-scores",
                BrokerError::Fatal {
                    reason: "connection lost".into(),
                    raw: Some(Bytes::from_static(b"partial")),
                },
            )
            .await;

        let error = consumer.poll(Duration::from_millis(10)).await.unwrap_err();
        assert!(error.is_fatal());
        assert_eq!(error.raw_payload().map(|b| &b[..]), Some(&b"partial"[..]));
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_shrinks_once_every_group_has_committed() {
        let broker = MemoryBroker::new(1);
        for payload in ["a", "b", "c", "d", "e"] {
            broker.produce_raw("live-scores", "1", payload).await;
        }
        let mut fast = broker.consumer("fast", "live-scores").await.unwrap();
        let mut slow = broker.consumer("slow", "live-scores").await.unwrap();

        for _ in 0..3 {
            let message = fast.poll(Duration::from_millis(10)).await.unwrap().unwrap();
            fast.commit(&message).await.unwrap();
        }
        // `slow` has not committed anything yet.
        assert_eq!(broker.records("live-scores").await.len(), 5);

        let message = slow.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        slow.commit(&message).await.unwrap();
        let retained = broker.records("live-scores").await;
        assert_eq!(retained.len(), 4);
        assert_eq!(retained[0].offset, 1);

        let message = slow.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        slow.commit(&message).await.unwrap();
        let message = slow.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        slow.commit(&message).await.unwrap();
        let retained = broker.records("live-scores").await;
        assert_eq!(retained.len(), 2);
        assert_eq!(&retained[0].payload[..], b"d");

        let next = fast.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!((next.offset, &next.payload[..]), (3, &b"d"[..]));
    }

    #[tokio::test]
    async fn test_retention_caps_unread_partitions() {
        let broker = MemoryBroker::with_retention(1, 3);
        for payload in ["a", "b", "c", "d", "e"] {
            broker.produce_raw("dead-letter-queue", "k", payload).await;
        }

        let retained = broker.records("dead-letter-queue").await;
        assert_eq!(retained.len(), 3);
        assert_eq!(retained[0].offset, 2);

        // A late group starts at the oldest retained record.
        let mut late = broker.consumer("late", "dead-letter-queue").await.unwrap();
        let first = late.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!((first.offset, &first.payload[..]), (2, &b"c"[..]));
    }

    #[tokio::test]
    async fn test_unacknowledged_producer_never_sees_failures() {
        let broker = MemoryBroker::new(2);
        let producer = broker
            .producer(ProducerSettings {
                acks: Acks::None,
                idempotent: false,
            })
            .await
            .unwrap();
        broker.fail_next_sends(1).await;

        let lost = producer
            .send(vec![record("live-scores", "3", "x", 0)])
            .await
            .unwrap();
        assert_eq!(lost[0].offset, None);
        assert_eq!(lost[0].partition, partition_for("3", 2));
        assert!(broker.records("live-scores").await.is_empty());

        let sent = producer
            .send(vec![record("live-scores", "3", "y", 1)])
            .await
            .unwrap();
        assert_eq!(sent[0].offset, None);
        assert_eq!(broker.records("live-scores").await.len(), 1);
    }
}
