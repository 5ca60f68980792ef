//! Keyed publisher for the durable log.
//!
//! [`EventProducer::publish`] serializes the payload on the caller's task
//! and hands the bytes to a bounded buffer drained by a single background
//! writer. The caller never waits for the transport, so a crash between
//! `publish` returning and the writer appending loses that event. Callers
//! that need the append confirmed use [`EventProducer::publish_acked`],
//! which goes through the same buffer (keeping per-key order) and waits for
//! the result.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use sitepulse_core::error::{DrainTimeoutError, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::transport::{EventLog, RecordPosition};

/// Default number of writes that may wait for the background writer.
const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Default budget for flushing buffered writes on [`EventProducer::close`].
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time [`EventProducer::publish_acked`] waits for the append.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer tuning.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub buffer_capacity: usize,
    pub drain_timeout: Duration,
    /// Bound on the whole of [`EventProducer::publish_acked`], buffer wait
    /// included.
    pub ack_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

type AckSender = oneshot::Sender<Result<RecordPosition, TransportError>>;

struct PendingWrite {
    topic: String,
    key: String,
    value: Vec<u8>,
    ack: Option<AckSender>,
}

/// Publishes serialized payloads to the durable log.
///
/// Shared via `Arc<EventProducer>` between request handlers.
pub struct EventProducer {
    sender: Mutex<Option<mpsc::Sender<PendingWrite>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    config: ProducerConfig,
}

impl EventProducer {
    /// Start the background writer for `log`. Must be called inside a Tokio
    /// runtime.
    pub fn new(log: Arc<dyn EventLog>, config: ProducerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let writer = tokio::spawn(run_writer(log, rx));

        Self {
            sender: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            config,
        }
    }

    /// Queue `payload` for `topic`, routed by `key`, without waiting for the
    /// transport.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<(), TransportError> {
        let value = serde_json::to_vec(payload)?;
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = sender.as_ref().ok_or(TransportError::Closed)?;

        tx.try_send(PendingWrite {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
            ack: None,
        })
        .map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull {
                capacity: self.config.buffer_capacity,
            },
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Queue `payload` and wait until the transport has appended it.
    ///
    /// Gives up with [`TransportError::Timeout`] after the configured
    /// `ack_timeout`. The write may still be appended later.
    pub async fn publish_acked<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<RecordPosition, TransportError> {
        let value = serde_json::to_vec(payload)?;
        let timeout = self.config.ack_timeout;

        tokio::time::timeout(timeout, self.send_acked(topic, key, value))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(topic, key, ?timeout, "Acknowledged publish timed out");
                Err(TransportError::Timeout(timeout))
            })
    }

    async fn send_acked(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<RecordPosition, TransportError> {
        let tx = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(PendingWrite {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
            ack: Some(ack_tx),
        })
        .await
        .map_err(|_| TransportError::Closed)?;
        drop(tx);

        ack_rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting publishes and flush what is buffered.
    ///
    /// If the buffer does not drain within the configured timeout the writer
    /// is aborted (remaining writes are lost) and [`DrainTimeoutError`] is
    /// returned. Subsequent calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), DrainTimeoutError> {
        // Dropping the last sender lets the writer finish once it has
        // drained the buffer.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut writer) = writer else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.drain_timeout, &mut writer).await {
            Ok(_) => {
                tracing::info!("Event producer drained and closed");
                Ok(())
            }
            Err(_) => {
                writer.abort();
                let err = DrainTimeoutError {
                    component: "event producer",
                    timeout: self.config.drain_timeout,
                };
                tracing::error!(error = %err, "Event producer closed with writes still pending");
                Err(err)
            }
        }
    }
}

impl Drop for EventProducer {
    fn drop(&mut self) {
        if let Some(writer) = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            writer.abort();
        }
    }
}

/// Append buffered writes one at a time, in buffer order.
async fn run_writer(log: Arc<dyn EventLog>, mut rx: mpsc::Receiver<PendingWrite>) {
    while let Some(write) = rx.recv().await {
        let result = log.append(&write.topic, &write.key, write.value).await;

        match write.ack {
            Some(ack) => {
                // The caller may have given up waiting; nothing to do then.
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::error!(
                        error = %e,
                        topic = %write.topic,
                        key = %write.key,
                        "Buffered publish failed, event dropped"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;
    use sitepulse_core::Envelope;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::transport::{LogSubscription, MemoryLog, StartOffset};

    fn producer(log: &MemoryLog) -> EventProducer {
        EventProducer::new(Arc::new(log.clone()), ProducerConfig::default())
    }

    #[tokio::test]
    async fn publish_acked_returns_position() {
        let log = MemoryLog::new(["user_events"], 4);
        let producer = producer(&log);

        let envelope = Envelope::new("user.signup", "w1");
        let position = producer
            .publish_acked("user_events", "user-42", &envelope)
            .await
            .unwrap();

        assert_eq!(position.offset, 0);
        assert_eq!(log.len("user_events"), 1);
    }

    #[tokio::test]
    async fn publish_acked_surfaces_transport_rejection() {
        let log = MemoryLog::new(["user_events"], 1);
        let producer = producer(&log);

        let result = producer.publish_acked("unknown", "k", &json!({})).await;
        assert_matches!(result, Err(TransportError::UnknownTopic(_)));
    }

    #[tokio::test]
    async fn close_flushes_buffered_publishes() {
        let log = MemoryLog::new(["user_events"], 2);
        let producer = producer(&log);

        for i in 0..10 {
            producer
                .publish("user_events", "user-42", &json!({ "n": i }))
                .unwrap();
        }
        producer.close().await.unwrap();

        assert_eq!(log.len("user_events"), 10);
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let log = MemoryLog::new(["user_events"], 1);
        let producer = producer(&log);
        producer.close().await.unwrap();

        assert!(producer.is_closed());
        assert_matches!(
            producer.publish("user_events", "k", &json!({})),
            Err(TransportError::Closed)
        );
        assert_matches!(
            producer.publish_acked("user_events", "k", &json!({})).await,
            Err(TransportError::Closed)
        );
        // Second close is a no-op.
        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn same_key_publishes_keep_their_order() {
        let log = MemoryLog::new(["user_events"], 8);
        let producer = producer(&log);

        for i in 0..20 {
            producer
                .publish("user_events", "session-1", &json!({ "seq": i }))
                .unwrap();
        }
        producer.close().await.unwrap();

        let mut sub = log
            .subscribe("user_events", "check", StartOffset::Earliest)
            .await
            .unwrap();
        for expected in 0..20 {
            let record = sub.next().await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&record.value).unwrap();
            assert_eq!(value["seq"], expected);
        }
    }

    /// A log whose appends wait for permits, to hold writes in the buffer.
    struct GatedLog {
        inner: MemoryLog,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl EventLog for GatedLog {
        async fn append(
            &self,
            topic: &str,
            key: &str,
            value: Vec<u8>,
        ) -> Result<RecordPosition, TransportError> {
            let _permit = self.gate.acquire().await.map_err(|_| TransportError::Closed)?;
            self.inner.append(topic, key, value).await
        }

        async fn subscribe(
            &self,
            topic: &str,
            group: &str,
            start: StartOffset,
        ) -> Result<Box<dyn LogSubscription>, TransportError> {
            self.inner.subscribe(topic, group, start).await
        }
    }

    #[tokio::test]
    async fn full_buffer_rejects_without_blocking() {
        let gate = Arc::new(Semaphore::new(0));
        let log = GatedLog {
            inner: MemoryLog::new(["user_events"], 1),
            gate: Arc::clone(&gate),
        };
        let producer = EventProducer::new(
            Arc::new(log),
            ProducerConfig {
                buffer_capacity: 2,
                drain_timeout: Duration::from_millis(50),
                ..ProducerConfig::default()
            },
        );

        // One write is taken by the writer (stuck on the gate), two fill
        // the buffer; keep going until the buffer reports full.
        let mut rejected = None;
        for i in 0..10 {
            if let Err(e) = producer.publish("user_events", "k", &json!({ "n": i })) {
                rejected = Some(e);
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_matches!(rejected, Some(TransportError::BufferFull { capacity: 2 }));

        let err = producer.close().await.unwrap_err();
        assert_eq!(err.component, "event producer");
    }

    #[tokio::test]
    async fn stalled_append_times_out_acked_publish() {
        let log = GatedLog {
            inner: MemoryLog::new(["user_events"], 1),
            gate: Arc::new(Semaphore::new(0)),
        };
        let producer = EventProducer::new(
            Arc::new(log),
            ProducerConfig {
                ack_timeout: Duration::from_millis(50),
                drain_timeout: Duration::from_millis(50),
                ..ProducerConfig::default()
            },
        );

        let result = producer.publish_acked("user_events", "k", &json!({})).await;
        assert_matches!(result, Err(TransportError::Timeout(t)) if t == Duration::from_millis(50));
    }

    /// JSON object keys must be strings; tuple keys cannot be serialized.
    fn unserializable() -> HashMap<(u8, u8), u8> {
        HashMap::from([((1, 2), 3)])
    }

    #[tokio::test]
    async fn unserializable_payload_is_rejected_before_buffering() {
        let log = MemoryLog::new(["user_events"], 1);
        let producer = producer(&log);

        assert_matches!(
            producer.publish("user_events", "k", &unserializable()),
            Err(TransportError::Serialization(_))
        );
        assert_matches!(
            producer
                .publish_acked("user_events", "k", &unserializable())
                .await,
            Err(TransportError::Serialization(_))
        );

        producer.close().await.unwrap();
        assert!(log.is_empty("user_events"));
    }
}
