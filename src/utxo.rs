//! UTXO lookup collaborator contract.
//!
//! The engine never owns UTXO state; it resolves funding inputs through the
//! [`UtxoProvider`] contract and treats results as immutable for the
//! duration of one build. `EsploraUtxoProvider` is a thin HTTP adapter over
//! an esplora-style public API for the operator CLI; tests use in-memory
//! fakes.

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Txid};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// A spendable prior output, immutable once fetched.
#[derive(Debug, Clone)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value_sats: u64,
    pub script: ScriptBuf,
    /// Full previous transaction, when the source already had it on hand.
    /// Required for non-witness signing; fetched lazily otherwise.
    pub raw_tx_hex: Option<String>,
    /// Redeem script for P2SH-locked outputs, when known.
    pub redeem_script: Option<ScriptBuf>,
}

#[derive(Debug, Error)]
pub enum UtxoLookupError {
    #[error("utxo source transport error: {0}")]
    Transport(String),
    #[error("utxo source returned malformed data: {0}")]
    Malformed(String),
}

/// Lookup contract for funding inputs and previous transactions.
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// Resolve one specific output. `None` when it does not exist (or is
    /// already spent, for sources that only index the UTXO set).
    async fn get_specific_utxo(
        &self,
        txid: Txid,
        vout: u32,
    ) -> Result<Option<Utxo>, UtxoLookupError>;

    /// Fetch the full raw transaction hex, `None` when unknown.
    async fn get_raw_transaction_hex(
        &self,
        txid: Txid,
    ) -> Result<Option<String>, UtxoLookupError>;
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey: String,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    vout: Vec<EsploraVout>,
}

/// Esplora-style HTTP UTXO source (Blockstream/mempool.space API shape).
#[derive(Debug, Clone)]
pub struct EsploraUtxoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl EsploraUtxoProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UtxoProvider for EsploraUtxoProvider {
    async fn get_specific_utxo(
        &self,
        txid: Txid,
        vout: u32,
    ) -> Result<Option<Utxo>, UtxoLookupError> {
        let url = format!("{}/tx/{txid}", self.base_url);
        debug!(%txid, vout, %url, "fetching utxo details");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UtxoLookupError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(UtxoLookupError::Transport(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let tx: EsploraTx = response
            .json()
            .await
            .map_err(|e| UtxoLookupError::Malformed(e.to_string()))?;
        let Some(output) = tx.vout.get(vout as usize) else {
            return Ok(None);
        };
        let script = ScriptBuf::from_hex(&output.scriptpubkey)
            .map_err(|e| UtxoLookupError::Malformed(format!("bad scriptpubkey hex: {e}")))?;

        Ok(Some(Utxo {
            txid,
            vout,
            value_sats: output.value,
            script,
            raw_tx_hex: None,
            redeem_script: None,
        }))
    }

    async fn get_raw_transaction_hex(
        &self,
        txid: Txid,
    ) -> Result<Option<String>, UtxoLookupError> {
        let url = format!("{}/tx/{txid}/hex", self.base_url);
        debug!(%txid, %url, "fetching raw transaction hex");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UtxoLookupError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(UtxoLookupError::Transport(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let hex = response
            .text()
            .await
            .map_err(|e| UtxoLookupError::Transport(e.to_string()))?;
        Ok(Some(hex.trim().to_string()))
    }
}
