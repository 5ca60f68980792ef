//! Durable event path of the SitePulse pipeline.
//!
//! - [`transport`]: the log contract ([`EventLog`]) and the in-process
//!   [`MemoryLog`].
//! - [`EventProducer`]: keyed, buffered publisher.
//! - [`TriggerConsumer`]: consumer-group receive loop driving actions.
//! - [`actions`]: email, webhook and condition-gated side effects.
//! - [`rules`]: JSON rule file that maps envelope types to actions.

pub mod actions;
pub mod consumer;
pub mod producer;
pub mod rules;
pub mod transport;

pub use actions::{Action, ActionError, ActionOutcome, ActionRegistry};
pub use consumer::{ConsumerConfig, ConsumerReport, ConsumerState, TriggerConsumer};
pub use producer::{EventProducer, ProducerConfig};
pub use rules::{ActionContext, RuleSet};
pub use transport::{EventLog, LogRecord, LogSubscription, MemoryLog, StartOffset};
