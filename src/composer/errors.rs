//! Error taxonomy for the attach composer.
//!
//! Every failure surfaced to the caller is a typed variant, never a bare
//! string, so calling layers can map errors to user-facing messages without
//! string-matching. Validation failures are raised before any network call;
//! nothing at this layer is retried.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Failures of one build, terminal for that build.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Fee-rate input absent, duplicated, or non-positive.
    #[error("invalid fee rate: {0}")]
    InvalidFeeRate(String),

    /// Malformed request fields: bad address, bad `txid:vout` reference,
    /// zero quantity, inconsistent service fee.
    #[error("validation error: {0}")]
    Validation(String),

    /// A funding UTXO could not be resolved, or lacked the value/script
    /// data required to spend it.
    #[error("input {txid}:{vout} not found or unusable: {reason}")]
    InputNotFound {
        txid: String,
        vout: u32,
        reason: String,
    },

    /// The inputs cannot cover the fixed outputs plus the network fee.
    /// Carries the exact satoshi deficit so the caller can adjust and
    /// resubmit.
    #[error(
        "insufficient funds: short {deficit_sats} sats \
         (inputs {inputs_sats}, fixed outputs {outputs_sats}, network fee {fee_sats})"
    )]
    InsufficientFunds {
        deficit_sats: u64,
        inputs_sats: u64,
        outputs_sats: u64,
        fee_sats: u64,
    },

    /// The remote compose call was reached and rejected the operation.
    /// Carries the remote message verbatim; not retried.
    #[error("compose rejected by {node}: {message}")]
    ProtocolApplication { node: String, message: String },

    /// Every provider node was exhausted at the transport level.
    #[error("all {total} provider nodes unavailable after {attempts_per_node} attempts each")]
    AllNodesUnavailable { total: usize, attempts_per_node: u32 },

    /// The transaction primitive could not produce a signable transaction.
    /// The underlying message is preserved.
    #[error("failed to finalize signable transaction: {0}")]
    Finalization(String),

    /// Unexpected state: collaborator transport failures and malformed
    /// remote data that survived gateway validation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ComposeError {
    /// Whether resubmitting the same build later might succeed.
    ///
    /// Service-side outages are retryable; everything the caller must
    /// correct first is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ComposeError::AllNodesUnavailable { .. } => true,
            ComposeError::Finalization(_) => true,
            ComposeError::Internal(_) => true,
            ComposeError::InvalidFeeRate(_) => false,
            ComposeError::Validation(_) => false,
            ComposeError::InputNotFound { .. } => false,
            ComposeError::InsufficientFunds { .. } => false,
            ComposeError::ProtocolApplication { .. } => false,
        }
    }

    /// Error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            ComposeError::InvalidFeeRate(_) => "fee_rate",
            ComposeError::Validation(_) => "validation",
            ComposeError::InputNotFound { .. } => "input",
            ComposeError::InsufficientFunds { .. } => "balance",
            ComposeError::ProtocolApplication { .. } => "application",
            ComposeError::AllNodesUnavailable { .. } => "exhausted",
            ComposeError::Finalization(_) => "finalization",
            ComposeError::Internal(_) => "internal",
        }
    }

    /// The satoshi deficit, for `InsufficientFunds`.
    pub fn deficit(&self) -> Option<u64> {
        match self {
            ComposeError::InsufficientFunds { deficit_sats, .. } => Some(*deficit_sats),
            _ => None,
        }
    }
}

// Convenience constructors for common failure sites
impl ComposeError {
    pub fn invalid_fee_rate(reason: impl Into<String>) -> Self {
        Self::InvalidFeeRate(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn input_not_found(
        txid: impl Into<String>,
        vout: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::InputNotFound {
            txid: txid.into(),
            vout,
            reason: reason.into(),
        }
    }

    pub fn finalization(reason: impl Into<String>) -> Self {
        Self::Finalization(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<GatewayError> for ComposeError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Application { node, message } => {
                ComposeError::ProtocolApplication { node, message }
            }
            GatewayError::AllNodesUnavailable {
                total,
                attempts_per_node,
            } => ComposeError::AllNodesUnavailable {
                total,
                attempts_per_node,
            },
            GatewayError::Configuration(message) => ComposeError::Validation(message),
            other => ComposeError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = ComposeError::InsufficientFunds {
            deficit_sats: 1200,
            inputs_sats: 50_000,
            outputs_sats: 49_700,
            fee_sats: 1500,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: short 1200 sats \
             (inputs 50000, fixed outputs 49700, network fee 1500)"
        );
        assert_eq!(err.deficit(), Some(1200));
    }

    #[test]
    fn retryability_split() {
        assert!(ComposeError::AllNodesUnavailable {
            total: 3,
            attempts_per_node: 2
        }
        .is_retryable());
        assert!(ComposeError::finalization("missing spend data").is_retryable());

        assert!(!ComposeError::invalid_fee_rate("zero").is_retryable());
        assert!(!ComposeError::ProtocolApplication {
            node: "n1".into(),
            message: "rejected".into()
        }
        .is_retryable());
        assert!(!ComposeError::input_not_found("ab".repeat(32), 0, "missing").is_retryable());
    }

    #[test]
    fn gateway_errors_map_to_composer_taxonomy() {
        let app = ComposeError::from(GatewayError::Application {
            node: "n1".into(),
            message: "Insufficient BTC".into(),
        });
        assert!(matches!(app, ComposeError::ProtocolApplication { .. }));
        assert!(app.to_string().contains("Insufficient BTC"));

        let exhausted = ComposeError::from(GatewayError::AllNodesUnavailable {
            total: 2,
            attempts_per_node: 3,
        });
        assert!(matches!(
            exhausted,
            ComposeError::AllNodesUnavailable { total: 2, attempts_per_node: 3 }
        ));

        let transport = ComposeError::from(GatewayError::Transport {
            node: "n1".into(),
            message: "boom".into(),
        });
        assert!(matches!(transport, ComposeError::Internal(_)));
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(ComposeError::validation("x").category(), "validation");
        assert_eq!(
            ComposeError::InsufficientFunds {
                deficit_sats: 1,
                inputs_sats: 0,
                outputs_sats: 0,
                fee_sats: 1
            }
            .category(),
            "balance"
        );
    }
}
