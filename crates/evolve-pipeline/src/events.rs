//! Step-level events, plus every per-unit event forwarded from the
//! swarm each step runs against, tagged with step identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evolve_swarm::SwarmEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// One event published while a [`crate::Pipeline`] runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A step is about to run.
    StepStart {
        /// The step's zero-based position.
        step_index: usize,
        /// The step's operator name (`"map"`, `"filter"`, `"reduce"`).
        step_name: String,
        /// Number of items the step was scheduled against.
        item_count: usize,
    },
    /// A step finished.
    StepComplete {
        /// The step's zero-based position.
        step_index: usize,
        /// The step's operator name.
        step_name: String,
        /// Wall-clock duration of the step.
        duration_ms: u64,
        /// Count of successful units.
        success_count: usize,
        /// Count of units rejected by a filter predicate.
        filtered_count: usize,
        /// Count of failed units.
        error_count: usize,
    },
    /// A step failed outright (not a per-unit error, but one that
    /// terminates the whole pipeline — currently unreachable, since every
    /// composition operator captures unit failures into `SwarmResult`
    /// rather than propagating `Err`; kept for forward compatibility with
    /// a future operator that can fail at the call boundary).
    StepError {
        /// The step's zero-based position.
        step_index: usize,
        /// The step's operator name.
        step_name: String,
        /// The failure.
        error: String,
    },
    /// A per-unit event forwarded from the swarm this step ran on,
    /// tagged with which step it belongs to.
    Unit {
        /// The step's zero-based position.
        step_index: usize,
        /// The step's operator name.
        step_name: String,
        /// The forwarded swarm event.
        event: SwarmEvent,
    },
}

#[derive(Debug, Default)]
struct Stats {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Point-in-time statistics for a [`PipelineEventBus`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineEventBusStats {
    /// Total events published since the bus was created.
    pub total_published: u64,
    /// Currently active subscribers.
    pub active_subscribers: usize,
    /// Events dropped because no subscriber was registered at publish time.
    pub dropped_events: u64,
}

/// A broadcast channel fanning [`PipelineEvent`]s out to every registered
/// subscriber. Drop-on-no-subscriber, matching
/// [`evolve_swarm::SwarmEventBus`]. Cheaply `Clone`: every clone shares the
/// same underlying channel and counters.
#[derive(Clone)]
pub struct PipelineEventBus {
    tx: broadcast::Sender<PipelineEvent>,
    stats: Arc<Stats>,
}

impl Default for PipelineEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineEventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        PipelineEventBus { tx, stats: Arc::new(Stats::default()) }
    }

    /// Subscribe to the bus.
    pub fn subscribe(&self) -> PipelineEventSubscription {
        PipelineEventSubscription { rx: self.tx.subscribe() }
    }

    /// Publish an event, dropping and counting it if nobody is subscribed.
    pub fn publish(&self, event: PipelineEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A snapshot of bus statistics.
    pub fn stats(&self) -> PipelineEventBusStats {
        PipelineEventBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: self.tx.receiver_count(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

/// A handle receiving events from a [`PipelineEventBus`].
pub struct PipelineEventSubscription {
    rx: broadcast::Receiver<PipelineEvent>,
}

impl PipelineEventSubscription {
    /// Await the next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain any event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscriber_is_dropped_and_counted() {
        let bus = PipelineEventBus::new();
        bus.publish(PipelineEvent::StepStart { step_index: 0, step_name: "map".into(), item_count: 1 });
        assert_eq!(bus.stats().dropped_events, 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = PipelineEventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(PipelineEvent::StepStart { step_index: 0, step_name: "map".into(), item_count: 2 });
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, PipelineEvent::StepStart { item_count: 2, .. }));
    }
}
