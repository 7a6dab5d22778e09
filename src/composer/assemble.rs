//! Signable-transaction assembly.
//!
//! Hands the frozen plan to the transaction-primitive library: builds the
//! unsigned transaction, attaches per-input spend data to the PSBT, and
//! runs the finalization check — every input must carry enough data to
//! derive its signature hash before the PSBT leaves the engine.

use bitcoin::absolute::LockTime;
use bitcoin::psbt::PsbtSighashType;
use bitcoin::transaction::Version;
use bitcoin::{Amount, EcdsaSighashType, Psbt, ScriptBuf, Transaction, TxIn, TxOut, Witness};

use crate::composer::errors::ComposeError;
use crate::composer::plan::{BuildPlan, SpendData};

/// Build the signable PSBT from a frozen plan and serialize it to hex.
pub fn assemble_signable(plan: &BuildPlan) -> Result<String, ComposeError> {
    let unsigned_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: plan
            .inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: input.sequence,
                witness: Witness::default(),
            })
            .collect(),
        output: plan
            .outputs
            .iter()
            .map(|output| TxOut {
                value: Amount::from_sat(output.value_sats),
                script_pubkey: output.script.clone(),
            })
            .collect(),
    };

    let mut psbt =
        Psbt::from_unsigned_tx(unsigned_tx).map_err(|e| ComposeError::finalization(e.to_string()))?;

    for (input, psbt_input) in plan.inputs.iter().zip(psbt.inputs.iter_mut()) {
        match &input.spend_data {
            SpendData::Witness { script, value_sats } => {
                psbt_input.witness_utxo = Some(TxOut {
                    value: Amount::from_sat(*value_sats),
                    script_pubkey: script.clone(),
                });
            }
            SpendData::NonWitness { prev_tx } => {
                psbt_input.non_witness_utxo = Some(prev_tx.clone());
            }
        }
        if let Some(redeem) = &input.redeem_script {
            psbt_input.redeem_script = Some(redeem.clone());
        }
        psbt_input.sighash_type = Some(PsbtSighashType::from(EcdsaSighashType::All));
    }

    finalize_check(&psbt)?;
    Ok(hex::encode(psbt.serialize()))
}

/// Fail unless every input can produce a signature hash: witness inputs
/// need their witness UTXO, non-witness inputs need a previous transaction
/// that actually contains the spent outpoint.
fn finalize_check(psbt: &Psbt) -> Result<(), ComposeError> {
    for (index, input) in psbt.inputs.iter().enumerate() {
        let outpoint = psbt.unsigned_tx.input[index].previous_output;
        match (&input.witness_utxo, &input.non_witness_utxo) {
            (None, None) => {
                return Err(ComposeError::finalization(format!(
                    "input #{index} ({outpoint}) has neither witness nor non-witness spend data"
                )));
            }
            (None, Some(prev_tx)) => {
                if prev_tx.compute_txid() != outpoint.txid {
                    return Err(ComposeError::finalization(format!(
                        "input #{index}: previous transaction does not match {}",
                        outpoint.txid
                    )));
                }
                if prev_tx.output.len() <= outpoint.vout as usize {
                    return Err(ComposeError::finalization(format!(
                        "input #{index}: previous transaction has no output {}",
                        outpoint.vout
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::plan::{InputDescriptor, OutputDescriptor, OutputSource};
    use crate::script_type::ScriptTypeInfo;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, Sequence, Txid};

    fn p2wpkh_script() -> ScriptBuf {
        let mut bytes = vec![0x00, 0x14];
        bytes.extend([0x42; 20]);
        ScriptBuf::from_bytes(bytes)
    }

    fn witness_input(value_sats: u64) -> InputDescriptor {
        let script = p2wpkh_script();
        InputDescriptor {
            outpoint: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0,
            },
            value_sats,
            script: script.clone(),
            script_type: ScriptTypeInfo::classify(&script),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            spend_data: SpendData::Witness {
                script,
                value_sats,
            },
            redeem_script: None,
        }
    }

    fn plan_with(inputs: Vec<InputDescriptor>, outputs: Vec<OutputDescriptor>) -> BuildPlan {
        let mut plan = BuildPlan::default();
        for input in inputs {
            plan.push_input(input);
        }
        for output in outputs {
            plan.push_fixed_output(output);
        }
        plan
    }

    #[test]
    fn assembles_decodable_psbt_with_spend_data() {
        let plan = plan_with(
            vec![witness_input(10_000)],
            vec![OutputDescriptor {
                script: p2wpkh_script(),
                value_sats: 9_000,
                source: OutputSource::ProtocolTemplate,
            }],
        );

        let hex_psbt = assemble_signable(&plan).unwrap();
        let psbt = Psbt::deserialize(&hex::decode(hex_psbt).unwrap()).unwrap();

        assert_eq!(psbt.inputs.len(), 1);
        assert!(psbt.inputs[0].witness_utxo.is_some());
        assert_eq!(
            psbt.inputs[0].sighash_type,
            Some(PsbtSighashType::from(EcdsaSighashType::All))
        );
        assert_eq!(
            psbt.unsigned_tx.input[0].sequence,
            Sequence::ENABLE_RBF_NO_LOCKTIME
        );
        assert_eq!(psbt.unsigned_tx.output.len(), 1);
        assert_eq!(psbt.unsigned_tx.output[0].value, Amount::from_sat(9_000));
    }

    #[test]
    fn non_witness_prev_tx_must_cover_the_outpoint() {
        let prev_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(5_000),
                script_pubkey: p2wpkh_script(),
            }],
        };
        let prev_txid = prev_tx.compute_txid();

        let mut input = witness_input(5_000);
        input.outpoint = OutPoint {
            txid: prev_txid,
            vout: 3, // out of range
        };
        input.spend_data = SpendData::NonWitness { prev_tx };

        let plan = plan_with(
            vec![input],
            vec![OutputDescriptor {
                script: p2wpkh_script(),
                value_sats: 4_000,
                source: OutputSource::ProtocolTemplate,
            }],
        );

        let err = assemble_signable(&plan).unwrap_err();
        assert!(matches!(err, ComposeError::Finalization(_)));
        assert!(err.to_string().contains("no output 3"));
    }

    #[test]
    fn mismatched_prev_txid_is_rejected() {
        let prev_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(5_000),
                script_pubkey: p2wpkh_script(),
            }],
        };

        let mut input = witness_input(5_000);
        // outpoint txid stays all-zeros, which no real tx hashes to
        input.spend_data = SpendData::NonWitness { prev_tx };

        let plan = plan_with(
            vec![input],
            vec![OutputDescriptor {
                script: p2wpkh_script(),
                value_sats: 4_000,
                source: OutputSource::ProtocolTemplate,
            }],
        );

        let err = assemble_signable(&plan).unwrap_err();
        assert!(matches!(err, ComposeError::Finalization(_)));
    }
}
