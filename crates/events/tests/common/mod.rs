#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sitepulse_core::error::TransportError;
use sitepulse_core::Envelope;
use sitepulse_events::actions::{Action, ActionError, ActionOutcome};
use sitepulse_events::transport::RecordPosition;
use sitepulse_events::{ConsumerConfig, EventLog, LogRecord, LogSubscription, MemoryLog, StartOffset};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "user_events";
pub const GROUP: &str = "test-triggers";

pub fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        topic: TOPIC.to_string(),
        group_id: GROUP.to_string(),
        start_offset: StartOffset::Earliest,
        shutdown_timeout: Duration::from_secs(2),
    }
}

/// Wait for the next envelope seen by a [`RecordingAction`].
pub async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("action should be invoked")
        .expect("action channel closed")
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Forwards every envelope it executes to a channel.
pub struct RecordingAction {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl RecordingAction {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
        let _ = self.tx.send(envelope.clone());
        Ok(ActionOutcome::Completed)
    }
}

/// Always fails.
pub struct FailingAction;

#[async_trait]
impl Action for FailingAction {
    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(&self, _envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
        Err(ActionError::InvalidInput("downstream refused".into()))
    }
}

/// Signals when it starts, then takes `delay` to finish.
pub struct SlowAction {
    pub delay: Duration,
    pub started: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl Action for SlowAction {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
        let _ = self.started.send(());
        tokio::time::sleep(self.delay).await;
        Ok(ActionOutcome::Completed)
    }
}

// ---------------------------------------------------------------------------
// Transport wrappers
// ---------------------------------------------------------------------------

/// Simulates a process crash between handling and commit: the first commit
/// is never applied and the consumer's token is cancelled.
pub struct CrashBeforeCommit {
    pub inner: MemoryLog,
    pub crash: CancellationToken,
}

#[async_trait]
impl EventLog for CrashBeforeCommit {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<RecordPosition, TransportError> {
        self.inner.append(topic, key, value).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<Box<dyn LogSubscription>, TransportError> {
        let inner = self.inner.subscribe(topic, group, start).await?;
        Ok(Box::new(CrashingSubscription {
            inner,
            crash: self.crash.clone(),
        }))
    }
}

struct CrashingSubscription {
    inner: Box<dyn LogSubscription>,
    crash: CancellationToken,
}

#[async_trait]
impl LogSubscription for CrashingSubscription {
    async fn next(&mut self) -> Result<LogRecord, TransportError> {
        self.inner.next().await
    }

    async fn commit(&mut self, _record: &LogRecord) -> Result<(), TransportError> {
        self.crash.cancel();
        Err(TransportError::Closed)
    }
}
