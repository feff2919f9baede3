#![warn(missing_docs)]
//! The four-channel event bus a Session Controller fans its events out on,
//! and the append-only observability log each session writes.

pub mod bus;
pub mod log;

pub use bus::{Channel, ChannelBus, ChannelBusStats, ChannelSubscription, SessionEvent};
pub use log::ObservabilityLog;
