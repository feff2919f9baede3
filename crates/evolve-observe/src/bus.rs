//! A broadcast-based event bus supporting the four session event channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evolve_core::LifecycleEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// The four channels a Session Controller emits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Raw stdout passthrough.
    Stdout,
    /// Raw stderr passthrough.
    Stderr,
    /// Structured content updates (message chunks, tool calls, plans).
    Content,
    /// Sandbox/agent lifecycle transitions.
    Lifecycle,
}

/// One event delivered on the bus, tagged with the channel it was
/// published on.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A stdout chunk.
    Stdout(String),
    /// A stderr chunk.
    Stderr(String),
    /// A structured content update, carried as pre-serialized JSON so this
    /// crate stays independent of the capability-layer event types.
    Content(serde_json::Value),
    /// A lifecycle transition.
    Lifecycle(LifecycleEvent),
}

impl SessionEvent {
    /// Which channel this event belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            SessionEvent::Stdout(_) => Channel::Stdout,
            SessionEvent::Stderr(_) => Channel::Stderr,
            SessionEvent::Content(_) => Channel::Content,
            SessionEvent::Lifecycle(_) => Channel::Lifecycle,
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Point-in-time statistics for a [`ChannelBus`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelBusStats {
    /// Total events published since the bus was created.
    pub total_published: u64,
    /// Currently active subscribers.
    pub active_subscribers: usize,
    /// Events dropped because no subscriber was registered at publish time.
    pub dropped_events: u64,
}

/// A broadcast channel fanning [`SessionEvent`]s out to every registered
/// callback.
///
/// Callbacks are not buffered: an event published while no subscriber is
/// registered is dropped and counted, never replayed.
pub struct ChannelBus {
    tx: broadcast::Sender<SessionEvent>,
    stats: Arc<Stats>,
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        ChannelBus { tx, stats: Arc::new(Stats::default()) }
    }

    /// Subscribe to all channels; callers filter by [`SessionEvent::channel`]
    /// themselves, mirroring `on(channel, callback)` registration at a
    /// higher layer.
    pub fn subscribe(&self) -> ChannelSubscription {
        ChannelSubscription { rx: self.tx.subscribe() }
    }

    /// Publish an event. Silently dropped (and counted) if nobody is
    /// subscribed.
    pub fn publish(&self, event: SessionEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// A snapshot of bus statistics.
    pub fn stats(&self) -> ChannelBusStats {
        ChannelBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: self.tx.receiver_count(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

/// A handle receiving events from a [`ChannelBus`].
pub struct ChannelSubscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl ChannelSubscription {
    /// Await the next event, or `None` once the bus is gone.
    ///
    /// A subscriber that falls behind the broadcast buffer observes a gap
    /// (lagged events are skipped, never replayed from the start).
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscriber_is_dropped_and_counted() {
        let bus = ChannelBus::new();
        bus.publish(SessionEvent::Stdout("hi".into()));
        assert_eq!(bus.stats().dropped_events, 1);
        assert_eq!(bus.stats().total_published, 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = ChannelBus::new();
        let mut sub = bus.subscribe();
        bus.publish(SessionEvent::Stdout("hi".into()));
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Stdout(s) if s == "hi"));
    }

    #[tokio::test]
    async fn events_are_filterable_by_channel() {
        let bus = ChannelBus::new();
        let mut sub = bus.subscribe();
        bus.publish(SessionEvent::Stdout("out".into()));
        bus.publish(SessionEvent::Stderr("err".into()));
        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.channel(), Channel::Stdout);
        assert_eq!(second.channel(), Channel::Stderr);
    }
}
