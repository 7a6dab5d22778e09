//! Attach Composer
//!
//! The orchestrator of the engine: consumes the gateway's composed
//! template, resolves real funding UTXOs, reconciles outputs (protocol
//! outputs, optional service fee, recomputed change) under exact satoshi
//! accounting and dust policy, and produces a finalized signable
//! transaction plus per-input signing instructions.

// Submodules
pub mod assemble;
pub mod builder;
pub mod errors;
pub mod plan;

// Re-exports for convenience
pub use builder::{AttachComposer, BuildOutcome, BuildRequest, InputToSign, ServiceFeeSpec};
pub use errors::ComposeError;
pub use plan::{BalanceDecision, BuildPlan};
