// src/lib.rs

// The durable agent runtime core (C1-C11 of the design). See SPEC_FULL.md.
pub mod agentloom;

// Re-export the pieces an embedder reaches for most often, so callers don't
// have to spell out `agentloom::control_loop::run` etc.
pub use agentloom::{run, Ledger, Message, Part, PlanResult, Role, RunInput, RunOutput, RuntimeError};
