//! Compose-call execution: node iteration, retries, caching.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::{get_or_compute, ResponseCache};
use crate::config::{GatewayConfig, ProviderNode};
use crate::gateway::errors::GatewayError;

/// Closed options record for the compose-attach call. Unset fields are
/// omitted from the request; the remote applies its own defaults.
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Fee rate in sat/kB, the unit the compose API prices in.
    pub fee_per_kb: Option<u64>,
    pub allow_unconfirmed_inputs: Option<bool>,
    /// Explicit funding input as `txid:vout`, passed through verbatim.
    pub inputs_set: Option<String>,
    pub regular_dust_size: Option<u64>,
    pub multisig_dust_size: Option<u64>,
    pub confirmation_target: Option<u32>,
}

/// The composed transaction template returned by a provider node.
///
/// Read-only once obtained: its outputs are copied verbatim into the final
/// transaction, so nothing here is ever mutated.
#[derive(Debug, Clone)]
pub struct ComposedTransaction {
    pub raw_hex: String,
    pub template: Transaction,
    pub psbt_base64: Option<String>,
    /// Name of the node that produced the template.
    pub provider: String,
}

/// Cacheable wire-level compose result; the template is re-decoded from hex
/// after a cache hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComposeResult {
    raw_tx_hex: String,
    psbt_base64: Option<String>,
    provider: String,
}

/// Outcome of a single attempt against a single node.
enum Attempt {
    Success(ComposeResult),
    /// Application-level rejection: terminal for the whole call.
    Terminal(GatewayError),
    /// Transport-level failure: retry this node, then fail over.
    Transient(String),
}

/// Gateway over the ordered provider-node list.
///
/// Construction takes the node list as an immutable value; there is no
/// global registry, so tests can run against fake lists.
#[derive(Debug)]
pub struct QueryGateway {
    nodes: Vec<ProviderNode>,
    attempts_per_node: u32,
    cache_ttl: Duration,
    cache: Arc<dyn ResponseCache>,
    http: reqwest::Client,
}

impl QueryGateway {
    pub fn new(
        nodes: Vec<ProviderNode>,
        config: &GatewayConfig,
        cache: Arc<dyn ResponseCache>,
    ) -> Result<Self, GatewayError> {
        if nodes.is_empty() {
            return Err(GatewayError::Configuration(
                "provider node list is empty".to_string(),
            ));
        }
        if config.attempts_per_node == 0 {
            return Err(GatewayError::Configuration(
                "attempts_per_node must be at least 1".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            nodes,
            attempts_per_node: config.attempts_per_node,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache,
            http,
        })
    }

    /// Execute the compose-attach call with caching and failover.
    pub async fn compose_attach(
        &self,
        address: &str,
        asset: &str,
        quantity: u64,
        options: &ComposeOptions,
    ) -> Result<ComposedTransaction, GatewayError> {
        let endpoint = format!("/addresses/{address}/compose/attach");
        let params = build_params(address, asset, quantity, options);
        let key = cache_key(&endpoint, &params);

        let result: ComposeResult = get_or_compute(
            self.cache.as_ref(),
            &key,
            self.cache_ttl,
            || self.query_nodes(&endpoint, &params),
        )
        .await?;

        let template = decode_transaction(&result.raw_tx_hex).map_err(|message| {
            GatewayError::MalformedResponse {
                node: result.provider.clone(),
                message,
            }
        })?;

        Ok(ComposedTransaction {
            raw_hex: result.raw_tx_hex,
            template,
            psbt_base64: result.psbt_base64,
            provider: result.provider,
        })
    }

    /// The explicit two-level loop: outer over nodes in priority order,
    /// inner over bounded immediate re-attempts. An application error is
    /// terminal; a transport error continues.
    async fn query_nodes(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ComposeResult, GatewayError> {
        for node in &self.nodes {
            for attempt in 1..=self.attempts_per_node {
                match self.attempt_node(node, endpoint, params).await {
                    Attempt::Success(result) => {
                        info!(node = %node.name, attempt, "compose call succeeded");
                        return Ok(result);
                    }
                    Attempt::Terminal(err) => {
                        warn!(node = %node.name, %err, "compose call rejected by node");
                        return Err(err);
                    }
                    Attempt::Transient(message) => {
                        warn!(node = %node.name, attempt, %message, "compose attempt failed");
                    }
                }
            }
            debug!(node = %node.name, "node exhausted, failing over");
        }

        Err(GatewayError::AllNodesUnavailable {
            total: self.nodes.len(),
            attempts_per_node: self.attempts_per_node,
        })
    }

    async fn attempt_node(
        &self,
        node: &ProviderNode,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Attempt {
        let url = format!("{}{endpoint}", node.base_url.trim_end_matches('/'));

        let mut request = self.http.get(&url).query(params);
        if let Some((user, pass)) = node.credentials() {
            request = request.basic_auth(user, Some(pass));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Transient(e.to_string()),
        };
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Attempt::Transient(format!("failed to read body: {e}")),
        };

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) => return Attempt::Transient(format!("http {status}: unparseable body")),
        };

        // A well-formed error member is an application-level outcome, no
        // matter the HTTP status: the operation was rejected, not the node.
        if let Some(err) = body.get("error").filter(|v| !v.is_null()) {
            let message = err
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| err.to_string());
            return Attempt::Terminal(GatewayError::Application {
                node: node.name.clone(),
                message,
            });
        }

        let Some(result) = body.get("result") else {
            return Attempt::Transient(if status.is_success() {
                "response missing result and error members".to_string()
            } else {
                format!("http {status}")
            });
        };

        let Some(raw_tx_hex) = result.get("rawtransaction").and_then(Value::as_str) else {
            return Attempt::Transient("compose result missing rawtransaction".to_string());
        };
        if let Err(message) = decode_transaction(raw_tx_hex) {
            return Attempt::Transient(format!("undecodable rawtransaction: {message}"));
        }

        Attempt::Success(ComposeResult {
            raw_tx_hex: raw_tx_hex.to_string(),
            psbt_base64: result
                .get("psbt")
                .and_then(Value::as_str)
                .map(str::to_owned),
            provider: node.name.clone(),
        })
    }
}

/// Canonicalized request parameters: a sorted map so the cache key and the
/// query string are deterministic for equal requests.
fn build_params(
    address: &str,
    asset: &str,
    quantity: u64,
    options: &ComposeOptions,
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("asset".to_string(), asset.to_string());
    params.insert("quantity".to_string(), quantity.to_string());
    params.insert("return_psbt".to_string(), "true".to_string());
    params.insert("verbose".to_string(), "true".to_string());
    params.insert("multisig_dust_size".to_string(), "788".to_string());

    if is_bech32_address(address) {
        params.insert("segwit".to_string(), "true".to_string());
    }
    if let Some(fee_per_kb) = options.fee_per_kb {
        params.insert("fee_per_kb".to_string(), fee_per_kb.to_string());
    }
    if let Some(allow) = options.allow_unconfirmed_inputs {
        params.insert("allow_unconfirmed_inputs".to_string(), allow.to_string());
    }
    if let Some(inputs_set) = &options.inputs_set {
        params.insert("inputs_set".to_string(), inputs_set.clone());
    }
    if let Some(dust) = options.regular_dust_size {
        params.insert("regular_dust_size".to_string(), dust.to_string());
    }
    if let Some(dust) = options.multisig_dust_size {
        params.insert("multisig_dust_size".to_string(), dust.to_string());
    }
    if let Some(target) = options.confirmation_target {
        params.insert("confirmation_target".to_string(), target.to_string());
    }

    params
}

fn is_bech32_address(address: &str) -> bool {
    address.starts_with("bc1") || address.starts_with("tb1") || address.starts_with("bcrt1")
}

/// Deterministic cache key: hash of method endpoint + canonical parameters.
fn cache_key(endpoint: &str, params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    for (k, v) in params {
        hasher.update(b"&");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    let digest = hasher.finalize();
    format!("compose_attach:{}", hex::encode(&digest[..16]))
}

fn decode_transaction(raw_hex: &str) -> Result<Transaction, String> {
    let bytes = hex::decode(raw_hex).map_err(|e| format!("invalid hex: {e}"))?;
    deserialize::<Transaction>(&bytes).map_err(|e| format!("invalid transaction: {e}"))
}
