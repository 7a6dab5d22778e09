//! Attach-composer orchestration.
//!
//! One build is a linear pipeline with no branching back:
//! COMPOSED → INPUT_RESOLVED → OUTPUTS_PLANNED → SIZED → BALANCED →
//! FINALIZED. Each step's output is required input to the next, so steps
//! run strictly in order; any failure aborts the whole build with a typed
//! error and nothing is retried here (the gateway owns node-level retries).
//!
//! Builds are independent tasks: the plan lives in task-local memory and is
//! discarded once the outcome is returned, and the only shared state is the
//! gateway cache and the UTXO source, both concurrency-safe black boxes.

use std::str::FromStr;
use std::sync::Arc;

use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::deserialize;
use bitcoin::{Address, EcdsaSighashType, OutPoint, ScriptBuf, Sequence, Transaction, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::composer::assemble::assemble_signable;
use crate::composer::errors::ComposeError;
use crate::composer::plan::{
    decide_balance, BuildPlan, InputDescriptor, OutputDescriptor, OutputSource, SpendData,
};
use crate::config::PolicyConfig;
use crate::fee_rate::{FeeRate, FeeRateInput};
use crate::gateway::{ComposeOptions, QueryGateway};
use crate::observability::CorrelationId;
use crate::script_type::{ScriptKind, ScriptTypeInfo};
use crate::size_estimator::{estimate_vsize, OutputClass};
use crate::utxo::UtxoProvider;

/// Inbound build request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Source address funding the attach; also receives change.
    pub address: String,
    /// Protocol asset identifier (cpid).
    pub asset: String,
    /// Asset quantity to attach; must be positive.
    pub quantity: u64,
    /// Optional explicit funding input as `txid:vout`.
    #[serde(default)]
    pub explicit_input: Option<String>,
    pub fee_rate: FeeRateInput,
    #[serde(default)]
    pub service_fee: Option<ServiceFeeSpec>,
    /// Defaults to allowing unconfirmed inputs (and opting into RBF).
    #[serde(default)]
    pub allow_unconfirmed_inputs: Option<bool>,
}

/// Optional flat service fee. Zero amount or an empty address means no
/// service-fee output is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceFeeSpec {
    pub amount_sats: u64,
    pub pay_to_address: String,
}

/// One input the wallet must sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputToSign {
    pub index: usize,
    pub address: String,
    pub sighash_type: u32,
}

/// Successful build result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Serialized signable PSBT, hex encoded.
    pub signable_tx_hex: String,
    pub inputs_to_sign: Vec<InputToSign>,
    /// Effective fee: network fee plus any below-dust change folded in.
    pub estimated_fee: u64,
    pub estimated_vsize: u64,
    /// Change emitted back to the funding address; zero when folded.
    pub change_sats: u64,
    /// Provider node that composed the template.
    pub provider: String,
}

/// Request fields after validation, before any network call.
#[derive(Debug)]
struct ValidatedRequest {
    funding_script: ScriptBuf,
    fee_rate: FeeRate,
    explicit_input: Option<OutPoint>,
    service_fee: Option<(Address, u64)>,
    sequence: Sequence,
}

/// The externally invoked entry point of the engine.
pub struct AttachComposer {
    gateway: QueryGateway,
    utxo_provider: Arc<dyn UtxoProvider>,
    policy: PolicyConfig,
}

impl AttachComposer {
    pub fn new(
        gateway: QueryGateway,
        utxo_provider: Arc<dyn UtxoProvider>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            gateway,
            utxo_provider,
            policy,
        }
    }

    /// Build a signable attach transaction.
    pub async fn build_attach_transaction(
        &self,
        request: &BuildRequest,
    ) -> Result<BuildOutcome, ComposeError> {
        let correlation = CorrelationId::new();
        info!(
            correlation = %correlation,
            address = %request.address,
            asset = %request.asset,
            quantity = request.quantity,
            "starting attach build"
        );

        let validated = self.validate(request)?;

        // COMPOSED
        let options = ComposeOptions {
            fee_per_kb: Some(validated.fee_rate.sats_per_kvb),
            allow_unconfirmed_inputs: request.allow_unconfirmed_inputs,
            inputs_set: validated
                .explicit_input
                .map(|op| format!("{}:{}", op.txid, op.vout)),
            ..Default::default()
        };
        let composed = self
            .gateway
            .compose_attach(&request.address, &request.asset, request.quantity, &options)
            .await?;
        debug!(
            correlation = %correlation,
            provider = %composed.provider,
            template_inputs = composed.template.input.len(),
            template_outputs = composed.template.output.len(),
            "phase composed"
        );
        if composed.template.output.is_empty() {
            return Err(ComposeError::internal("composed template has no outputs"));
        }

        // INPUT_RESOLVED
        let outpoints: Vec<OutPoint> = match validated.explicit_input {
            Some(outpoint) => vec![outpoint],
            None => composed
                .template
                .input
                .iter()
                .map(|txin| txin.previous_output)
                .collect(),
        };
        if outpoints.is_empty() {
            return Err(ComposeError::internal("composed template has no inputs"));
        }

        let mut plan = BuildPlan::default();
        for outpoint in outpoints {
            let input = self.resolve_input(outpoint, validated.sequence).await?;
            plan.push_input(input);
        }
        debug!(
            correlation = %correlation,
            inputs = plan.inputs.len(),
            sum_inputs_sats = plan.sum_inputs_sats,
            "phase input_resolved"
        );

        // OUTPUTS_PLANNED: protocol outputs are copied verbatim and in
        // order; a template output already paying the funding address is a
        // protocol-side change slot and is replaced (exactly once) by our
        // own change in the balance step, never duplicated.
        let mut replaced_sats = 0u64;
        for txout in &composed.template.output {
            if txout.script_pubkey == validated.funding_script {
                replaced_sats += txout.value.to_sat();
                continue;
            }
            plan.push_fixed_output(OutputDescriptor {
                script: txout.script_pubkey.clone(),
                value_sats: txout.value.to_sat(),
                source: OutputSource::ProtocolTemplate,
            });
        }
        if replaced_sats > 0 {
            debug!(
                correlation = %correlation,
                replaced_sats,
                "replacing template change slot with recomputed change"
            );
        }
        if let Some((address, amount_sats)) = &validated.service_fee {
            plan.push_fixed_output(OutputDescriptor {
                script: address.script_pubkey(),
                value_sats: *amount_sats,
                source: OutputSource::ServiceFee,
            });
        }

        // SIZED
        let input_infos: Vec<ScriptTypeInfo> =
            plan.inputs.iter().map(|input| input.script_type).collect();
        let output_classes: Vec<OutputClass> = plan
            .outputs
            .iter()
            .map(|output| OutputClass::from_script(&output.script))
            .collect();
        let change_class = OutputClass::from_script(&validated.funding_script);
        let vsize_with_change = estimate_vsize(&input_infos, &output_classes, Some(change_class));
        let vsize_without_change = estimate_vsize(&input_infos, &output_classes, None);

        // BALANCED
        let decision = decide_balance(
            plan.sum_inputs_sats,
            plan.sum_fixed_outputs_sats,
            validated.fee_rate,
            vsize_with_change,
            vsize_without_change,
            self.policy.dust_threshold_sats,
        )?;
        plan.apply_balance(&decision, validated.funding_script.clone());
        plan.assert_balanced()?;
        debug!(
            correlation = %correlation,
            vsize = decision.vsize,
            network_fee_sats = decision.network_fee_sats,
            change_sats = decision.change_sats,
            folded_sats = decision.folded_sats,
            "phase balanced"
        );

        // FINALIZED
        let signable_tx_hex = assemble_signable(&plan)?;
        let inputs_to_sign = plan
            .inputs
            .iter()
            .enumerate()
            .map(|(index, _)| InputToSign {
                index,
                address: request.address.clone(),
                sighash_type: EcdsaSighashType::All.to_u32(),
            })
            .collect();

        info!(
            correlation = %correlation,
            estimated_vsize = decision.vsize,
            estimated_fee = decision.effective_fee_sats(),
            change_sats = decision.change_sats,
            "attach build finalized"
        );

        Ok(BuildOutcome {
            signable_tx_hex,
            inputs_to_sign,
            estimated_fee: decision.effective_fee_sats(),
            estimated_vsize: decision.vsize,
            change_sats: decision.change_sats,
            provider: composed.provider,
        })
    }

    /// Validate everything that can fail without touching the network.
    fn validate(&self, request: &BuildRequest) -> Result<ValidatedRequest, ComposeError> {
        if request.quantity == 0 {
            return Err(ComposeError::validation("quantity must be positive"));
        }

        let fee_rate = FeeRate::normalize(request.fee_rate)?;

        let funding_address = parse_address(&request.address, self.policy.network)?;
        let funding_script = funding_address.script_pubkey();

        let explicit_input = request
            .explicit_input
            .as_deref()
            .map(parse_outpoint)
            .transpose()?;

        let service_fee = match &request.service_fee {
            Some(spec) if spec.amount_sats > 0 && !spec.pay_to_address.is_empty() => {
                let address = parse_address(&spec.pay_to_address, self.policy.network)?;
                Some((address, spec.amount_sats))
            }
            _ => None,
        };

        // RBF-enabled unless the caller explicitly disallows unconfirmed
        // inputs.
        let sequence = if request.allow_unconfirmed_inputs == Some(false) {
            Sequence::MAX
        } else {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        };

        Ok(ValidatedRequest {
            funding_script,
            fee_rate,
            explicit_input,
            service_fee,
            sequence,
        })
    }

    /// Resolve one funding outpoint into a fully described input.
    async fn resolve_input(
        &self,
        outpoint: OutPoint,
        sequence: Sequence,
    ) -> Result<InputDescriptor, ComposeError> {
        let txid_hex = outpoint.txid.to_string();

        let utxo = self
            .utxo_provider
            .get_specific_utxo(outpoint.txid, outpoint.vout)
            .await
            .map_err(|e| ComposeError::internal(format!("utxo lookup failed: {e}")))?
            .ok_or_else(|| {
                ComposeError::input_not_found(txid_hex.clone(), outpoint.vout, "no such output")
            })?;
        if utxo.value_sats == 0 || utxo.script.is_empty() {
            return Err(ComposeError::input_not_found(
                txid_hex.clone(),
                outpoint.vout,
                "missing value or script data",
            ));
        }

        let script_type =
            ScriptTypeInfo::classify_with_redeem(&utxo.script, utxo.redeem_script.as_deref());

        let spend_data = if script_type.is_witness {
            SpendData::Witness {
                script: utxo.script.clone(),
                value_sats: utxo.value_sats,
            }
        } else {
            let raw_hex = match &utxo.raw_tx_hex {
                Some(raw_hex) => raw_hex.clone(),
                None => self
                    .utxo_provider
                    .get_raw_transaction_hex(outpoint.txid)
                    .await
                    .map_err(|e| {
                        ComposeError::internal(format!("raw transaction fetch failed: {e}"))
                    })?
                    .ok_or_else(|| {
                        ComposeError::input_not_found(
                            txid_hex.clone(),
                            outpoint.vout,
                            "previous transaction unavailable for non-witness input",
                        )
                    })?,
            };
            let bytes = hex::decode(raw_hex.trim()).map_err(|e| {
                ComposeError::input_not_found(
                    txid_hex.clone(),
                    outpoint.vout,
                    format!("undecodable previous transaction: {e}"),
                )
            })?;
            let prev_tx: Transaction = deserialize(&bytes).map_err(|e| {
                ComposeError::input_not_found(
                    txid_hex.clone(),
                    outpoint.vout,
                    format!("undecodable previous transaction: {e}"),
                )
            })?;
            SpendData::NonWitness { prev_tx }
        };

        let redeem_script = if script_type.kind == ScriptKind::P2sh {
            utxo.redeem_script.clone()
        } else {
            None
        };

        Ok(InputDescriptor {
            outpoint,
            value_sats: utxo.value_sats,
            script: utxo.script,
            script_type,
            sequence,
            spend_data,
            redeem_script,
        })
    }
}

fn parse_address(raw: &str, network: bitcoin::Network) -> Result<Address, ComposeError> {
    raw.parse::<Address<NetworkUnchecked>>()
        .map_err(|e| ComposeError::validation(format!("invalid address '{raw}': {e}")))?
        .require_network(network)
        .map_err(|e| ComposeError::validation(format!("address '{raw}' is on the wrong network: {e}")))
}

fn parse_outpoint(raw: &str) -> Result<OutPoint, ComposeError> {
    let (txid_part, vout_part) = raw.split_once(':').ok_or_else(|| {
        ComposeError::validation(format!("explicit input must be 'txid:vout', got '{raw}'"))
    })?;
    let txid = Txid::from_str(txid_part)
        .map_err(|e| ComposeError::validation(format!("bad txid in explicit input: {e}")))?;
    let vout: u32 = vout_part.parse().map_err(|_| {
        ComposeError::validation(format!("bad output index in explicit input: '{vout_part}'"))
    })?;
    Ok(OutPoint { txid, vout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{GatewayConfig, ProviderNode};

    const FUNDING_ADDRESS: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
    const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

    fn composer() -> AttachComposer {
        let gateway = QueryGateway::new(
            vec![ProviderNode {
                name: "test".into(),
                base_url: "http://127.0.0.1:1".into(),
                username: None,
                password: None,
            }],
            &GatewayConfig::default(),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();

        struct NoUtxos;
        #[async_trait::async_trait]
        impl UtxoProvider for NoUtxos {
            async fn get_specific_utxo(
                &self,
                _txid: Txid,
                _vout: u32,
            ) -> Result<Option<crate::utxo::Utxo>, crate::utxo::UtxoLookupError> {
                Ok(None)
            }
            async fn get_raw_transaction_hex(
                &self,
                _txid: Txid,
            ) -> Result<Option<String>, crate::utxo::UtxoLookupError> {
                Ok(None)
            }
        }

        AttachComposer::new(gateway, Arc::new(NoUtxos), PolicyConfig::default())
    }

    fn request() -> BuildRequest {
        BuildRequest {
            address: FUNDING_ADDRESS.to_string(),
            asset: "A95428956661682177".to_string(),
            quantity: 1,
            explicit_input: None,
            fee_rate: FeeRateInput {
                sats_per_vbyte: Some(10.0),
                sats_per_kvb: None,
            },
            service_fee: None,
            allow_unconfirmed_inputs: None,
        }
    }

    #[test]
    fn rejects_zero_quantity_before_any_network_call() {
        let mut req = request();
        req.quantity = 0;
        let err = composer().validate(&req).unwrap_err();
        assert!(matches!(err, ComposeError::Validation(_)));
    }

    #[test]
    fn rejects_malformed_explicit_input() {
        let bads = vec![
            "deadbeef".to_string(),
            "xyz:0".to_string(),
            "abc".to_string(),
            format!("{TXID}:notanum"),
        ];
        for bad in bads {
            let mut req = request();
            req.explicit_input = Some(bad.clone());
            let err = composer().validate(&req).unwrap_err();
            assert!(matches!(err, ComposeError::Validation(_)), "accepted '{bad}'");
        }
    }

    #[test]
    fn accepts_well_formed_explicit_input() {
        let mut req = request();
        req.explicit_input = Some(format!("{TXID}:1"));
        let validated = composer().validate(&req).unwrap();
        let outpoint = validated.explicit_input.unwrap();
        assert_eq!(outpoint.vout, 1);
        assert_eq!(outpoint.txid.to_string(), TXID);
    }

    #[test]
    fn rejects_invalid_and_wrong_network_addresses() {
        let mut req = request();
        req.address = "not-an-address".to_string();
        assert!(matches!(
            composer().validate(&req).unwrap_err(),
            ComposeError::Validation(_)
        ));

        // Testnet address against a mainnet policy.
        req.address = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string();
        assert!(matches!(
            composer().validate(&req).unwrap_err(),
            ComposeError::Validation(_)
        ));
    }

    #[test]
    fn zero_or_addressless_service_fee_is_dropped() {
        let mut req = request();
        req.service_fee = Some(ServiceFeeSpec {
            amount_sats: 0,
            pay_to_address: FUNDING_ADDRESS.to_string(),
        });
        assert!(composer().validate(&req).unwrap().service_fee.is_none());

        req.service_fee = Some(ServiceFeeSpec {
            amount_sats: 42_000,
            pay_to_address: String::new(),
        });
        assert!(composer().validate(&req).unwrap().service_fee.is_none());

        req.service_fee = Some(ServiceFeeSpec {
            amount_sats: 42_000,
            pay_to_address: FUNDING_ADDRESS.to_string(),
        });
        let validated = composer().validate(&req).unwrap();
        assert_eq!(validated.service_fee.unwrap().1, 42_000);
    }

    #[test]
    fn sequence_follows_unconfirmed_input_allowance() {
        let mut req = request();
        assert_eq!(
            composer().validate(&req).unwrap().sequence,
            Sequence::ENABLE_RBF_NO_LOCKTIME
        );

        req.allow_unconfirmed_inputs = Some(true);
        assert_eq!(
            composer().validate(&req).unwrap().sequence,
            Sequence::ENABLE_RBF_NO_LOCKTIME
        );

        req.allow_unconfirmed_inputs = Some(false);
        assert_eq!(composer().validate(&req).unwrap().sequence, Sequence::MAX);
    }
}
