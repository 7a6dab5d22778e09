//! The build plan: the working structure one build populates and freezes.
//!
//! A `BuildPlan` is exclusively owned by the build task that created it and
//! lives only for that build. The satoshi arithmetic is kept here, pure and
//! integer-exact, so the balance invariant can be unit-tested without any
//! collaborator.

use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction};

use crate::composer::errors::ComposeError;
use crate::fee_rate::FeeRate;
use crate::script_type::ScriptTypeInfo;

/// Spend data attached to an input for signing.
///
/// Witness inputs need only the referenced output's script and value;
/// non-witness inputs require the entire previous transaction for a correct
/// sighash.
#[derive(Debug, Clone)]
pub enum SpendData {
    Witness { script: ScriptBuf, value_sats: u64 },
    NonWitness { prev_tx: Transaction },
}

/// One resolved funding input.
#[derive(Debug, Clone)]
pub struct InputDescriptor {
    pub outpoint: OutPoint,
    pub value_sats: u64,
    pub script: ScriptBuf,
    pub script_type: ScriptTypeInfo,
    pub sequence: Sequence,
    pub spend_data: SpendData,
    pub redeem_script: Option<ScriptBuf>,
}

/// Where an output came from; change is the only one the balancer may add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    ProtocolTemplate,
    ServiceFee,
    Change,
}

/// One planned output.
#[derive(Debug, Clone)]
pub struct OutputDescriptor {
    pub script: ScriptBuf,
    pub value_sats: u64,
    pub source: OutputSource,
}

/// Result of the balance step: which sizing applies, the network fee at
/// that sizing, and what happens to the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDecision {
    pub vsize: u64,
    pub network_fee_sats: u64,
    /// Change emitted as an output; zero when none is.
    pub change_sats: u64,
    pub emit_change: bool,
    /// Below-dust remainder absorbed into the effective fee.
    pub folded_sats: u64,
}

impl BalanceDecision {
    /// The fee the caller actually pays: network fee plus folded dust.
    pub fn effective_fee_sats(&self) -> u64 {
        self.network_fee_sats + self.folded_sats
    }
}

/// Decide the final balance for a build.
///
/// Change is affordable iff the with-change sizing leaves at least the dust
/// threshold; otherwise the without-change sizing applies and any remainder
/// is folded into the fee. Negative change at the without-change sizing is
/// `InsufficientFunds` with the exact deficit.
pub fn decide_balance(
    sum_inputs_sats: u64,
    sum_fixed_outputs_sats: u64,
    fee_rate: FeeRate,
    vsize_with_change: u64,
    vsize_without_change: u64,
    dust_threshold_sats: u64,
) -> Result<BalanceDecision, ComposeError> {
    let fee_with_change = fee_rate.fee_for_vsize(vsize_with_change);
    let spendable = sum_inputs_sats.saturating_sub(sum_fixed_outputs_sats);

    if sum_inputs_sats >= sum_fixed_outputs_sats
        && spendable >= fee_with_change
        && spendable - fee_with_change >= dust_threshold_sats
    {
        return Ok(BalanceDecision {
            vsize: vsize_with_change,
            network_fee_sats: fee_with_change,
            change_sats: spendable - fee_with_change,
            emit_change: true,
            folded_sats: 0,
        });
    }

    let fee_without_change = fee_rate.fee_for_vsize(vsize_without_change);
    let required = sum_fixed_outputs_sats + fee_without_change;
    if sum_inputs_sats < required {
        return Err(ComposeError::InsufficientFunds {
            deficit_sats: required - sum_inputs_sats,
            inputs_sats: sum_inputs_sats,
            outputs_sats: sum_fixed_outputs_sats,
            fee_sats: fee_without_change,
        });
    }

    Ok(BalanceDecision {
        vsize: vsize_without_change,
        network_fee_sats: fee_without_change,
        change_sats: 0,
        emit_change: false,
        folded_sats: sum_inputs_sats - required,
    })
}

/// The central working structure of one build.
#[derive(Debug, Default)]
pub struct BuildPlan {
    pub inputs: Vec<InputDescriptor>,
    pub outputs: Vec<OutputDescriptor>,
    pub sum_inputs_sats: u64,
    pub sum_fixed_outputs_sats: u64,
    pub estimated_vsize: u64,
    pub network_fee_sats: u64,
    pub change_sats: u64,
    pub folded_sats: u64,
}

impl BuildPlan {
    pub fn push_input(&mut self, input: InputDescriptor) {
        self.sum_inputs_sats += input.value_sats;
        self.inputs.push(input);
    }

    /// Add a fixed (template or service-fee) output.
    pub fn push_fixed_output(&mut self, output: OutputDescriptor) {
        debug_assert_ne!(output.source, OutputSource::Change);
        self.sum_fixed_outputs_sats += output.value_sats;
        self.outputs.push(output);
    }

    /// Apply a balance decision: record fee figures and append the change
    /// output when one is emitted.
    pub fn apply_balance(&mut self, decision: &BalanceDecision, change_script: ScriptBuf) {
        self.estimated_vsize = decision.vsize;
        self.network_fee_sats = decision.network_fee_sats;
        self.change_sats = decision.change_sats;
        self.folded_sats = decision.folded_sats;
        if decision.emit_change {
            self.outputs.push(OutputDescriptor {
                script: change_script,
                value_sats: decision.change_sats,
                source: OutputSource::Change,
            });
        }
    }

    /// Freeze-time check: exact satoshi accounting with zero residual.
    pub fn assert_balanced(&self) -> Result<(), ComposeError> {
        let accounted = self
            .sum_fixed_outputs_sats
            .checked_add(self.network_fee_sats)
            .and_then(|n| n.checked_add(self.change_sats))
            .and_then(|n| n.checked_add(self.folded_sats));
        if accounted != Some(self.sum_inputs_sats) {
            return Err(ComposeError::internal(format!(
                "balance invariant violated: inputs {} != outputs {} + fee {} + change {} + folded {}",
                self.sum_inputs_sats,
                self.sum_fixed_outputs_sats,
                self.network_fee_sats,
                self.change_sats,
                self.folded_sats,
            )));
        }
        Ok(())
    }
}
