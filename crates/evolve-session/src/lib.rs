#![warn(missing_docs)]
//! The Session Controller: one sandbox, one agent, serialised state
//! transitions.
//!
//! A [`SessionController`] owns a single [`evolve_capability::sandbox::SandboxProvider`]
//! and a single [`evolve_capability::driver::AgentDriver`]. It boots the
//! sandbox and prepares the workspace exactly once, behind an init-lock;
//! serialises every `run()`/`execute_command()` behind a run-lock; and
//! fans out stdout/stderr/content/lifecycle events on a
//! [`evolve_observe::bus::ChannelBus`].

pub mod controller;
pub mod credential;
pub mod options;

pub use controller::{SessionConfig, SessionController};
pub use credential::{resolve_credential, Credential, CredentialProvider, ExplicitCredentials, NoCredentials};
pub use options::{ExecOptions, RunOptions};
