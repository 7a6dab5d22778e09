//! Protocol Query Gateway
//!
//! Executes the remote compose-attach call against an ordered list of
//! redundant provider nodes: cache read first, then per-node bounded
//! immediate retries, then failover to the next node. An application-level
//! rejection from any node is terminal for the whole call.

// Submodules
pub mod client;
pub mod errors;

// Re-exports for convenience
pub use client::{ComposeOptions, ComposedTransaction, QueryGateway};
pub use errors::GatewayError;
