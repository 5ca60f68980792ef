//! Durable trigger consumer.
//!
//! [`TriggerConsumer`] holds one subscription under a named consumer group
//! and handles one envelope at a time:
//!
//! ```text
//! Idle -> Receiving -> Handling -> Committing -> Receiving ...
//!                \-> Stopping -> Stopped            (on cancellation)
//! ```
//!
//! The offset is committed after the handling attempt, whether the actions
//! succeeded or not. A crash between handling and commit therefore
//! redelivers the envelope on restart (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use sitepulse_core::error::{DrainTimeoutError, TransportError};
use sitepulse_core::topics::{GROUP_TRIGGERS, TOPIC_USER_EVENTS};
use sitepulse_core::Envelope;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionOutcome, ActionRegistry};
use crate::transport::{EventLog, LogRecord, StartOffset};

/// Pause after a failed receive before polling the transport again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default window for finishing the in-flight envelope on shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Config / state
// ---------------------------------------------------------------------------

/// Subscription settings for one consumer instance.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    /// Durable cursor name. Renaming it restarts from `start_offset`.
    pub group_id: String,
    /// Where a group without a committed position begins.
    pub start_offset: StartOffset,
    /// Budget for finishing the in-flight envelope after cancellation.
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: TOPIC_USER_EVENTS.to_string(),
            group_id: GROUP_TRIGGERS.to_string(),
            start_offset: StartOffset::Earliest,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Lifecycle of the receive loop, observable through
/// [`TriggerConsumer::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Receiving,
    Handling,
    Committing,
    Stopping,
    Stopped,
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub received: u64,
    pub handled: u64,
    pub malformed: u64,
    pub action_failures: u64,
    pub commit_failures: u64,
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Actions { failed: u64 },
    Malformed,
}

// ---------------------------------------------------------------------------
// TriggerConsumer
// ---------------------------------------------------------------------------

/// Drives trigger actions from the durable log.
///
/// Holds no state shared with other instances, so several can run in the
/// same group; partition assignment between them is the transport's job.
pub struct TriggerConsumer {
    log: Arc<dyn EventLog>,
    config: ConsumerConfig,
    actions: Arc<ActionRegistry>,
    state: watch::Sender<ConsumerState>,
}

impl TriggerConsumer {
    pub fn new(log: Arc<dyn EventLog>, config: ConsumerConfig, actions: Arc<ActionRegistry>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            log,
            config,
            actions,
            state,
        }
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run the receive loop until `cancel` fires.
    ///
    /// Only a failed subscription is returned as an error; receive, decode
    /// and action failures are logged and the loop carries on.
    pub async fn run(self, cancel: CancellationToken) -> Result<ConsumerReport, TransportError> {
        let topic = self.config.topic.as_str();
        let group = self.config.group_id.as_str();

        let mut subscription = self
            .log
            .subscribe(topic, group, self.config.start_offset)
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, topic, group, "Trigger consumer failed to subscribe");
                self.set_state(ConsumerState::Stopped);
            })?;

        tracing::info!(
            topic,
            group,
            start_offset = ?self.config.start_offset,
            "Trigger consumer started"
        );

        let mut report = ConsumerReport::default();

        loop {
            self.set_state(ConsumerState::Receiving);

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = subscription.next() => received,
            };

            let record = match received {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, topic, group, "Receive failed, retrying");
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => false,
                    };
                    if cancelled {
                        break;
                    }
                    continue;
                }
            };
            report.received += 1;

            self.set_state(ConsumerState::Handling);
            let Some(handled) = self.handle_until_drained(&record, &cancel).await else {
                // Abandoned without commit; the record is redelivered later.
                break;
            };

            match handled {
                Handled::Actions { failed } => {
                    report.handled += 1;
                    report.action_failures += failed;
                }
                Handled::Malformed => report.malformed += 1,
            }

            self.set_state(ConsumerState::Committing);
            if let Err(e) = subscription.commit(&record).await {
                report.commit_failures += 1;
                tracing::error!(
                    error = %e,
                    topic,
                    group,
                    partition = record.partition,
                    offset = record.offset,
                    "Offset commit failed, record will be redelivered after restart"
                );
            }
        }

        self.set_state(ConsumerState::Stopping);
        drop(subscription);
        self.set_state(ConsumerState::Stopped);

        tracing::info!(
            topic,
            group,
            received = report.received,
            handled = report.handled,
            malformed = report.malformed,
            action_failures = report.action_failures,
            "Trigger consumer stopped"
        );
        Ok(report)
    }

    /// Handle `record`, letting it finish within the shutdown window if
    /// cancellation arrives mid-flight. `None` means the window elapsed.
    async fn handle_until_drained(
        &self,
        record: &LogRecord,
        cancel: &CancellationToken,
    ) -> Option<Handled> {
        let handling = self.handle(record);
        tokio::pin!(handling);

        tokio::select! {
            biased;
            handled = &mut handling => Some(handled),
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.config.shutdown_timeout, &mut handling).await {
                    Ok(handled) => Some(handled),
                    Err(_) => {
                        let err = DrainTimeoutError {
                            component: "trigger consumer",
                            timeout: self.config.shutdown_timeout,
                        };
                        tracing::error!(
                            error = %err,
                            partition = record.partition,
                            offset = record.offset,
                            "Abandoning in-flight envelope"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Decode one record and run every action registered for its type.
    async fn handle(&self, record: &LogRecord) -> Handled {
        let envelope = match Envelope::decode(&record.value) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    key = %record.key,
                    "Skipping malformed envelope"
                );
                return Handled::Malformed;
            }
        };

        let actions = self.actions.actions_for(&envelope.event_type);
        if actions.is_empty() {
            tracing::debug!(
                event_type = %envelope.event_type,
                tenant_id = %envelope.tenant_id,
                "No trigger actions for event type"
            );
            return Handled::Actions { failed: 0 };
        }

        let mut failed = 0;
        for action in actions {
            match action.execute(&envelope).await {
                Ok(ActionOutcome::Completed) => {
                    tracing::debug!(
                        action = action.name(),
                        event_type = %envelope.event_type,
                        tenant_id = %envelope.tenant_id,
                        "Trigger action completed"
                    );
                }
                Ok(ActionOutcome::Skipped) => {}
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        error = %e,
                        action = action.name(),
                        event_type = %envelope.event_type,
                        tenant_id = %envelope.tenant_id,
                        partition = record.partition,
                        offset = record.offset,
                        "Trigger action failed, not retried"
                    );
                }
            }
        }
        Handled::Actions { failed }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}
