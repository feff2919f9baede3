#![doc = "Core data model shared by the Evolve session runtime and swarm orchestrator."]
#![warn(missing_docs)]

//! Value types only: no I/O, no async, no sandbox or provider knowledge.
//! Every other `evolve-*` crate depends on this one and builds behaviour
//! on top of these shapes.

pub mod agent;
pub mod cost;
pub mod files;
pub mod meta;
pub mod output;
pub mod pipeline;
pub mod session;
pub mod swarm;
pub mod verify;

pub use agent::{AgentType, ReasoningEffort, ValidationMode, WorkspaceMode};
pub use cost::{RunCost, SessionCost};
pub use files::{decode_base64, encode_base64, FileContent, FileMap};
pub use meta::{BaseMeta, JudgeMeta, Operation, OperatorRole, ReduceMeta, VerifyMeta, WorkerMeta};
pub use output::OutputResult;
pub use pipeline::{PipelineOutput, PipelineResult, StepResult};
pub use session::{
    AgentResponse, AgentState, CheckpointInfo, LifecycleEvent, LifecycleReason, Run,
    SandboxState, SessionStatus,
};
pub use swarm::{BestOfInfo, SwarmResult, SwarmStatus, VerifyInfo};
pub use verify::VerifyDecision;

/// Schema contract version embedded in every observability log envelope.
pub const CONTRACT_VERSION: &str = "evolve/v1";

/// Render a random 16 hex character identifier, used for `operation_id` and
/// `pipeline_run_id`.
pub fn random_hex_id() -> String {
    let bytes: [u8; 8] = rand_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// Kept dependency-free (no `rand` crate in the workspace stack): derive
// eight bytes of entropy from a fresh UUIDv4, which already carries a
// cryptographically-sound random payload on most platforms.
fn rand_bytes() -> [u8; 8] {
    let uuid = uuid::Uuid::new_v4();
    let b = uuid.as_bytes();
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}
