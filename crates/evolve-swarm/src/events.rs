//! Per-unit events emitted while an operator call is in flight.
//!
//! `evolve-pipeline` subscribes to this bus to add `step_name`/`step_index`
//! context and its own step-level events on top.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evolve_core::BaseMeta;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// One event published while units are scheduled and run.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// A `map`/`filter`/`reduce` worker finished (any status).
    WorkerComplete {
        /// The worker's metadata.
        meta: BaseMeta,
        /// Whether the worker succeeded, was filtered, or errored.
        status: evolve_core::SwarmStatus,
    },
    /// A `verify` decorator unit finished judging a worker's output.
    VerifierComplete {
        /// The verifier's metadata.
        meta: BaseMeta,
        /// Whether the worker's output passed verification.
        passed: bool,
    },
    /// A `best_of` candidate finished.
    CandidateComplete {
        /// The candidate's metadata.
        meta: BaseMeta,
        /// Whether the candidate succeeded or errored.
        status: evolve_core::SwarmStatus,
    },
    /// A `best_of` judge finished choosing a winner.
    JudgeComplete {
        /// The judge's metadata.
        meta: BaseMeta,
        /// Index of the winning candidate.
        winner_index: usize,
    },
    /// A unit is about to retry after a failed attempt.
    ItemRetry {
        /// The unit's metadata, as of the attempt that just failed.
        meta: BaseMeta,
        /// The attempt number about to be retried.
        attempt: u32,
    },
}

#[derive(Debug, Default)]
struct Stats {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Point-in-time statistics for a [`SwarmEventBus`].
#[derive(Debug, Clone, Copy)]
pub struct SwarmEventBusStats {
    /// Total events published since the bus was created.
    pub total_published: u64,
    /// Currently active subscribers.
    pub active_subscribers: usize,
    /// Events dropped because no subscriber was registered at publish time.
    pub dropped_events: u64,
}

/// A broadcast channel fanning [`SwarmEvent`]s out to every registered
/// subscriber. Drop-on-no-subscriber, matching
/// `evolve_observe::bus::ChannelBus`.
pub struct SwarmEventBus {
    tx: broadcast::Sender<SwarmEvent>,
    stats: Arc<Stats>,
}

impl Default for SwarmEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmEventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        SwarmEventBus { tx, stats: Arc::new(Stats::default()) }
    }

    /// Subscribe to the bus.
    pub fn subscribe(&self) -> SwarmEventSubscription {
        SwarmEventSubscription { rx: self.tx.subscribe() }
    }

    /// Publish an event, dropping and counting it if nobody is subscribed.
    pub fn publish(&self, event: SwarmEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A snapshot of bus statistics.
    pub fn stats(&self) -> SwarmEventBusStats {
        SwarmEventBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: self.tx.receiver_count(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

/// A handle receiving events from a [`SwarmEventBus`].
pub struct SwarmEventSubscription {
    rx: broadcast::Receiver<SwarmEvent>,
}

impl SwarmEventSubscription {
    /// Await the next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SwarmEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain any event already buffered, without waiting. Used by a
    /// forwarder that has just been told to stop, to pick up anything
    /// published between its last poll and the stop signal.
    pub fn try_recv(&mut self) -> Option<SwarmEvent> {
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
    use evolve_core::{Operation, OperatorRole, SwarmStatus};

    fn meta() -> BaseMeta {
        BaseMeta::new("abc123", Operation::Map, OperatorRole::Worker)
    }

    #[tokio::test]
    async fn publish_with_no_subscriber_is_dropped_and_counted() {
        let bus = SwarmEventBus::new();
        bus.publish(SwarmEvent::WorkerComplete { meta: meta(), status: SwarmStatus::Success });
        assert_eq!(bus.stats().dropped_events, 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = SwarmEventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(SwarmEvent::WorkerComplete { meta: meta(), status: SwarmStatus::Success });
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, SwarmEvent::WorkerComplete { status: SwarmStatus::Success, .. }));
    }
}
