//! Outbox relay.

use std::time::Duration;

use chrono::Utc;
use saga_store::SagaStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::publisher::MessagePublisher;

/// Pause between retention sweeps in `run`.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Moves committed outbox messages to a publisher, in commit order.
///
/// A pass stops at the first publish failure so that later messages are
/// never delivered ahead of an earlier one; the failed message is retried
/// on the next pass. Relayed messages are kept for the retention period,
/// if one is set, and then deleted.
pub struct OutboxRelay<St: SagaStore, P: MessagePublisher> {
    store: St,
    publisher: P,
    batch_size: usize,
    retention: Option<Duration>,
}

impl<St: SagaStore, P: MessagePublisher> OutboxRelay<St, P> {
    /// Creates a relay.
    pub fn new(store: St, publisher: P, batch_size: usize) -> Self {
        Self {
            store,
            publisher,
            batch_size: batch_size.max(1),
            retention: None,
        }
    }

    /// Deletes relayed messages once they are older than `retention`.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Deletes relayed messages past the retention period. Returns how many
    /// were deleted; without a retention period nothing is.
    pub async fn prune_dispatched(&self) -> Result<u64> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let pruned = self.store.prune_dispatched(cutoff).await?;
        if pruned > 0 {
            tracing::debug!(pruned, "relayed outbox messages pruned");
            metrics::counter!("outbox_messages_pruned_total").increment(pruned);
        }
        Ok(pruned)
    }

    /// Relays one batch of pending messages. Returns how many were
    /// published.
    #[tracing::instrument(skip(self))]
    pub async fn relay_pending(&self) -> Result<usize> {
        let pending = self.store.pending_outbox(self.batch_size).await?;
        let mut relayed = 0;

        for message in pending {
            if let Err(e) = self.publisher.publish(&message).await {
                tracing::warn!(
                    message_id = %message.id,
                    message_type = %message.message_type,
                    error = %e,
                    "publish failed, will retry"
                );
                metrics::counter!("outbox_publish_failures_total").increment(1);
                break;
            }

            self.store.mark_dispatched(message.id).await?;
            metrics::counter!(
                "outbox_messages_relayed_total",
                "message_type" => message.message_type.clone()
            )
            .increment(1);
            relayed += 1;
        }

        if relayed > 0 {
            tracing::debug!(relayed, "outbox batch relayed");
        }
        Ok(relayed)
    }

    /// Relays until the queue is empty or a publish fails.
    pub async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let relayed = self.relay_pending().await?;
            total += relayed;
            if relayed < self.batch_size {
                return Ok(total);
            }
        }
    }

    /// Runs relay passes every `interval` until `shutdown` turns true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(PRUNE_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?interval, retention = ?self.retention, "outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_pending().await {
                        tracing::error!(error = %e, "outbox relay pass failed");
                    }
                }
                _ = sweep.tick(), if self.retention.is_some() => {
                    if let Err(e) = self.prune_dispatched().await {
                        tracing::error!(error = %e, "outbox retention sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox relay stopped");
    }
}
