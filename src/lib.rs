//! Bitcoin Attach-Transaction Composition Engine
//!
//! Builds a partially-signed Bitcoin transaction carrying a protocol
//! asset-attach operation plus an optional flat service fee, with exact
//! satoshi accounting, fee-rate-driven sizing, and failover across
//! redundant protocol provider nodes.
//!
//! Components, leaves first: fee normalization ([`fee_rate`]), script
//! classification ([`script_type`]), vsize estimation ([`size_estimator`]),
//! the provider-node gateway ([`gateway`]), and the orchestrating composer
//! ([`composer`]) — the externally invoked entry point.

pub mod cache;
pub mod composer;
pub mod config;
pub mod fee_rate;
pub mod gateway;
pub mod observability;
pub mod script_type;
pub mod size_estimator;
pub mod utxo;

// Re-export the commonly used surface
pub use composer::{AttachComposer, BuildOutcome, BuildRequest, ComposeError, ServiceFeeSpec};
pub use config::EngineConfig;
pub use fee_rate::{FeeRate, FeeRateInput};
pub use gateway::{GatewayError, QueryGateway};
