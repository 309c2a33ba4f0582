//! Delivery of due timeouts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use saga_store::TimeoutScheduler;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::router::MessageRouter;

/// Polls the timeout scheduler and feeds due timeouts through the router.
///
/// A timeout is acknowledged once processing returns, whether it caused a
/// transition or was absorbed as stale. Transient failures leave it armed so
/// the next pass redelivers it.
pub struct TimeoutPoller<T: TimeoutScheduler> {
    scheduler: T,
    router: Arc<MessageRouter>,
    batch_size: usize,
}

impl<T: TimeoutScheduler> TimeoutPoller<T> {
    /// Creates a poller.
    pub fn new(scheduler: T, router: Arc<MessageRouter>, batch_size: usize) -> Self {
        Self {
            scheduler,
            router,
            batch_size: batch_size.max(1),
        }
    }

    /// Delivers timeouts due at `now`. Returns how many were acknowledged.
    #[tracing::instrument(skip(self))]
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.scheduler.due(now, self.batch_size).await?;
        let mut acknowledged = 0;

        for timeout in due {
            match self.router.route_timeout(&timeout).await {
                Ok(outcome) => {
                    tracing::debug!(
                        token = %timeout.token,
                        correlation_id = %timeout.correlation_id,
                        transitioned = outcome.is_transitioned(),
                        "timeout delivered"
                    );
                    metrics::counter!(
                        "saga_timeouts_fired_total",
                        "saga_type" => timeout.saga_type.clone()
                    )
                    .increment(1);
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(
                        token = %timeout.token,
                        correlation_id = %timeout.correlation_id,
                        error = %e,
                        "undeliverable timeout discarded"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        token = %timeout.token,
                        correlation_id = %timeout.correlation_id,
                        error = %e,
                        "timeout delivery failed, will retry"
                    );
                    continue;
                }
            }

            self.scheduler.acknowledge(timeout.token).await?;
            acknowledged += 1;
        }

        Ok(acknowledged)
    }

    /// Runs poll passes every `interval` until `shutdown` turns true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?interval, "timeout poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.fire_due(Utc::now()).await {
                        tracing::error!(error = %e, "timeout poll pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("timeout poller stopped");
    }
}
