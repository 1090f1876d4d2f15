//! Crate-wide error types.
//!
//! Every fallible operation returns a typed `Result`; there is no
//! `anyhow` in the library surface (only in dev-dependencies, for test
//! ergonomics). `SessionError` is the caller-facing error returned by
//! every [`crate::session::SessionManager`] operation; `KernelError`
//! is raised inside [`crate::orchestrator::Kernel::step`] for
//! conditions the spec calls invariant violations — bugs, not
//! recoverable states — and composes into `SessionError` via `From`.
//! `Kernel::snapshot`/`Kernel::restore` also raise `KernelError` for
//! checkpoint-specific failures (bad JSON, a config that no longer
//! matches the checkpoint, a corrupted snapshot).

use thiserror::Error;

/// Errors raised by the step executor itself.
///
/// These correspond to the distilled spec's "invariant violation" error
/// kind (§7): conditions that must not occur by construction. When one
/// fires, the owning session is forced to `Stopped`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    #[error("step executed while session was not Running")]
    NotRunning,
    #[error("balance sheet invariant violated for bank {bank_id}: {detail}")]
    InvariantViolation { bank_id: u32, detail: String },
    #[error("unknown market id referenced: {0}")]
    UnknownMarket(String),
    #[error("failed to (de)serialize a checkpoint: {0}")]
    Serialization(String),
    #[error("checkpoint config hash mismatch: expected {expected}, got {actual}")]
    ConfigMismatch { expected: String, actual: String },
    #[error("checkpoint failed validation: {0}")]
    InvalidSnapshot(String),
}

/// Errors surfaced to a session's caller.
///
/// Shaped so a caller can build the distilled spec's `{error_kind,
/// reason, state_before}` triple (§7) from the `Display` impl plus the
/// session state captured at the time the error occurred.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("illegal transition: {action} requires a different state, session is {state}")]
    Precondition { action: String, state: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("kernel invariant violation, session stopped: {0}")]
    Invariant(#[from] KernelError),
    #[error("control channel closed")]
    ChannelClosed,
}

impl SessionError {
    pub fn precondition(action: impl Into<String>, state: impl Into<String>) -> Self {
        SessionError::Precondition {
            action: action.into(),
            state: state.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SessionError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
