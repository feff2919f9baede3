// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Comprehensive error catalog for the Evolve runtime.
//!
//! Every error code follows the pattern `EVOLVE-X###` where `X` is the
//! category letter and `###` is a three-digit number:
//!
//! - **C** — Contract errors (malformed data model values)
//! - **O** — Orchestration errors (session/operator concurrency rules)
//! - **R** — Runtime errors (sandbox/provider/transport failures)
//! - **V** — Validation errors (schema mismatches)
//! - **S** — System errors (I/O, serialization, internal invariants)

use std::fmt;

/// The closed set of error kinds a conforming implementation may surface.
///
/// Per the error handling design, kinds in this enum are split across two
/// propagation paths: kinds used inside composition operators (`verify`,
/// `best_of`, `map`/`filter`/`reduce`) are captured locally into
/// `SwarmResult { status: "error", .. }` and never unwind; kinds raised by
/// the Session Controller or Checkpoint Store propagate as `Result::Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // ── Contract (C) ──────────────────────────────────────────────
    /// A `SessionStatus` or similar snapshot value failed a structural check.
    InvalidSessionStatus,
    /// A prompt or command string was empty where one is required.
    EmptyPrompt,
    /// A UUID field (run id, operation id) was nil or malformed.
    InvalidIdentifier,

    // ── Orchestration (O) ─────────────────────────────────────────
    /// A second `run()`/`execute_command()` was attempted while one was
    /// already in flight on the same session.
    ConcurrentOperation,
    /// Two mutually exclusive options were supplied together (e.g.
    /// `from_checkpoint` with a bound `sandbox_id`; `verify` with
    /// `best_of`).
    MutualExclusion,
    /// The `verify` decorator exhausted all configured attempts without a
    /// passing decision.
    VerifyExhausted,
    /// The retry executor exhausted all configured attempts.
    RetryExhausted,
    /// The `best_of` judge exhausted its internal retries.
    JudgeFailed,

    // ── Runtime (R) ────────────────────────────────────────────────
    /// The provider no longer recognises the requested sandbox id.
    SandboxNotFound,
    /// The bridge/transport connection to a sandbox could not be
    /// established or was lost.
    BridgeConnectionError,
    /// The bridge process could not be built/started.
    BridgeBuildError,
    /// A per-call deadline was exceeded.
    Timeout,
    /// The caller cancelled the operation.
    Cancelled,

    // ── Validation (V) ─────────────────────────────────────────────
    /// `output/result.json` was missing, malformed, or did not match the
    /// declared schema.
    SchemaValidationError,

    // ── System (S) ─────────────────────────────────────────────────
    /// An I/O operation failed.
    IoError,
    /// JSON serialization or deserialization failed.
    SerializationError,
    /// A checksum did not match the expected value.
    ChecksumMismatch,
    /// An unexpected internal invariant was violated.
    InternalError,
}

impl ErrorKind {
    /// Machine-readable code string (e.g. `"EVOLVE-O001"`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSessionStatus => "EVOLVE-C001",
            Self::EmptyPrompt => "EVOLVE-C002",
            Self::InvalidIdentifier => "EVOLVE-C003",

            Self::ConcurrentOperation => "EVOLVE-O001",
            Self::MutualExclusion => "EVOLVE-O002",
            Self::VerifyExhausted => "EVOLVE-O003",
            Self::RetryExhausted => "EVOLVE-O004",
            Self::JudgeFailed => "EVOLVE-O005",

            Self::SandboxNotFound => "EVOLVE-R001",
            Self::BridgeConnectionError => "EVOLVE-R002",
            Self::BridgeBuildError => "EVOLVE-R003",
            Self::Timeout => "EVOLVE-R004",
            Self::Cancelled => "EVOLVE-R005",

            Self::SchemaValidationError => "EVOLVE-V001",

            Self::IoError => "EVOLVE-S001",
            Self::SerializationError => "EVOLVE-S002",
            Self::ChecksumMismatch => "EVOLVE-S003",
            Self::InternalError => "EVOLVE-S004",
        }
    }

    /// Human-readable category label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidSessionStatus | Self::EmptyPrompt | Self::InvalidIdentifier => "contract",
            Self::ConcurrentOperation
            | Self::MutualExclusion
            | Self::VerifyExhausted
            | Self::RetryExhausted
            | Self::JudgeFailed => "orchestration",
            Self::SandboxNotFound
            | Self::BridgeConnectionError
            | Self::BridgeBuildError
            | Self::Timeout
            | Self::Cancelled => "runtime",
            Self::SchemaValidationError => "validation",
            Self::IoError | Self::SerializationError | Self::ChecksumMismatch | Self::InternalError => "system",
        }
    }

    /// Whether this kind is recovered locally into a `SwarmResult` by a
    /// composition operator, rather than propagated as `Result::Err`.
    #[must_use]
    pub fn is_operator_local(&self) -> bool {
        matches!(
            self,
            Self::VerifyExhausted | Self::RetryExhausted | Self::JudgeFailed | Self::SchemaValidationError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The runtime's top-level error type.
///
/// Each variant carries an [`ErrorKind`] for machine dispatch plus a
/// human-readable message, and may wrap a source error for I/O or
/// serialization failures.
#[derive(Debug, thiserror::Error)]
pub enum EvolveError {
    /// A `run()`/`execute_command()` was attempted while one was already
    /// in flight.
    #[error("{0}: another operation is already in flight on this session")]
    ConcurrentOperation(&'static str),

    /// Two mutually exclusive options were supplied together.
    #[error("{0}: mutually exclusive options supplied")]
    MutualExclusion(&'static str),

    /// The `verify` decorator exhausted all attempts.
    #[error("verify exhausted after {attempts} attempt(s): {last_reasoning}")]
    VerifyExhausted {
        /// Total attempts taken.
        attempts: u32,
        /// The final verifier's reasoning.
        last_reasoning: String,
    },

    /// The retry executor exhausted all attempts.
    #[error("retry exhausted after {attempts} attempt(s)")]
    RetryExhausted {
        /// Total attempts taken.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The `best_of` judge exhausted its internal retries.
    #[error("best_of judge failed after {attempts} attempt(s): {reason}")]
    JudgeFailed {
        /// Total attempts taken by the judge.
        attempts: u32,
        /// The reason the judge could not be completed.
        reason: String,
    },

    /// The provider no longer recognises the sandbox id.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// The bridge/transport connection failed.
    #[error("bridge connection error: {0}")]
    BridgeConnectionError(String),

    /// The bridge process could not be built/started.
    #[error("bridge build error: {0}")]
    BridgeBuildError(String),

    /// A per-call deadline was exceeded.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// `output/result.json` failed schema validation.
    #[error("schema validation failed: {0}")]
    SchemaValidationError(String),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A checksum did not match the expected value.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The expected hash.
        expected: String,
        /// The hash actually computed.
        actual: String,
    },

    /// An unexpected internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EvolveError {
    /// The [`ErrorKind`] this error corresponds to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrentOperation(_) => ErrorKind::ConcurrentOperation,
            Self::MutualExclusion(_) => ErrorKind::MutualExclusion,
            Self::VerifyExhausted { .. } => ErrorKind::VerifyExhausted,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::JudgeFailed { .. } => ErrorKind::JudgeFailed,
            Self::SandboxNotFound(_) => ErrorKind::SandboxNotFound,
            Self::BridgeConnectionError(_) => ErrorKind::BridgeConnectionError,
            Self::BridgeBuildError(_) => ErrorKind::BridgeBuildError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::SchemaValidationError(_) => ErrorKind::SchemaValidationError,
            Self::Io(_) => ErrorKind::IoError,
            Self::Serialization(_) => ErrorKind::SerializationError,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Machine-readable code string, delegating to [`ErrorKind::code`].
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

/// Convenience alias for fallible runtime operations.
pub type Result<T> = std::result::Result<T, EvolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let kinds = [
            ErrorKind::InvalidSessionStatus,
            ErrorKind::EmptyPrompt,
            ErrorKind::InvalidIdentifier,
            ErrorKind::ConcurrentOperation,
            ErrorKind::MutualExclusion,
            ErrorKind::VerifyExhausted,
            ErrorKind::RetryExhausted,
            ErrorKind::JudgeFailed,
            ErrorKind::SandboxNotFound,
            ErrorKind::BridgeConnectionError,
            ErrorKind::BridgeBuildError,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::SchemaValidationError,
            ErrorKind::IoError,
            ErrorKind::SerializationError,
            ErrorKind::ChecksumMismatch,
            ErrorKind::InternalError,
        ];
        let mut codes: Vec<&str> = kinds.iter().map(|k| k.code()).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before);
    }

    #[test]
    fn operator_local_kinds_match_design() {
        assert!(ErrorKind::VerifyExhausted.is_operator_local());
        assert!(ErrorKind::RetryExhausted.is_operator_local());
        assert!(ErrorKind::JudgeFailed.is_operator_local());
        assert!(ErrorKind::SchemaValidationError.is_operator_local());
        assert!(!ErrorKind::SandboxNotFound.is_operator_local());
        assert!(!ErrorKind::ConcurrentOperation.is_operator_local());
    }

    #[test]
    fn error_kind_round_trips_through_evolve_error() {
        let err = EvolveError::SandboxNotFound("sbx-1".into());
        assert_eq!(err.kind(), ErrorKind::SandboxNotFound);
        assert_eq!(err.code(), "EVOLVE-R001");
    }
}
