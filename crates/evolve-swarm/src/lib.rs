#![warn(missing_docs)]
//! Swarm concurrency core and composition operators.
//!
//! A [`Swarm`] bounds total concurrency with a single counting semaphore
//! shared by every unit scheduled on it, and owns the capability seams
//! (sandbox provider, agent drivers, session defaults) that `map`,
//! `filter`, `reduce`, and `best_of` build ephemeral sessions from. The
//! `verify` decorator and `best_of`'s judge phase live alongside the
//! operators since both are properties of how a unit is scheduled, not of
//! the session runtime itself.

pub mod cancel;
pub mod events;
pub mod operators;
pub mod swarm;
pub mod template;

pub use cancel::SwarmCancellation;
pub use events::{SwarmEvent, SwarmEventBus, SwarmEventBusStats, SwarmEventSubscription};
pub use operators::{filter, map, reduce};
pub use swarm::Swarm;
pub use template::SessionTemplate;
