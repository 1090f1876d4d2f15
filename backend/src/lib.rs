//! Systemic Risk Simulation Kernel — Rust Engine
//!
//! A deterministic, discrete-time agent-based simulation of an
//! interbank network: banks lend, invest, and default against each
//! other and a small set of tradable market indices, driven entirely
//! by a seeded RNG so any run is byte-for-byte replayable.
//!
//! # Architecture
//!
//! - **config**: session configuration surface (`SessionConfig` et al.)
//! - **core**: the simulation clock
//! - **models**: domain types (`Bank`, `BalanceSheet`, `Market`, `Ledger`)
//! - **events**: the typed event protocol and its wire encoding
//! - **oracle**: the strategic-priority collaborator trait
//! - **risk**: stand-alone default-probability scoring
//! - **policy**: the bank decision engine (game-theoretic + heuristic)
//! - **orchestrator**: the nine-phase step executor (`Kernel`)
//! - **session**: the `tokio`-backed session lifecycle and worker loop
//! - **rng**: deterministic random number generation
//!
//! # Critical invariants
//!
//! 1. All randomness is deterministic (seeded xorshift64*); no other
//!    source of randomness may enter a step.
//! 2. A defaulted bank never un-defaults (`Bank::is_defaulted` is
//!    monotone).
//! 3. Every session's mutable state is owned by exactly one worker
//!    task; no simulation state is shared without message passing.

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod models;
pub mod oracle;
pub mod orchestrator;
pub mod policy;
pub mod risk;
pub mod rng;
pub mod session;

pub use config::SessionConfig;
pub use error::{KernelError, SessionError};
pub use events::{Event, EventLog};
pub use models::BankId;
pub use orchestrator::Kernel;
pub use rng::RngManager;
pub use session::{ControlCommand, SessionId, SessionManager, SessionState, SessionStatus};
