use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ws::hub::LiveHub;

/// Spawn a background task that enqueues a Ping frame to every live client
/// each `period`.
///
/// The task stops when `cancel` fires or the hub stops.
pub fn start_heartbeat(
    hub: LiveHub,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if hub.ping_all().await.is_err() {
                break;
            }
            tracing::debug!("Live heartbeat ping");
        }
        tracing::debug!("Live heartbeat stopped");
    })
}
