//! Strategic policy for bank actions.
//!
//! A bank's action each step comes from one of two branches — a
//! heuristic rule ladder, or a game-theoretic best-response computation
//! against an estimated opponent strategy — selected once per session
//! by `SessionConfig::use_game_theory`. See [`PolicyEngine`].

mod engine;

pub use engine::PolicyEngine;
