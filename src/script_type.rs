//! Locking-script classification.
//!
//! Classifies a UTXO's locking script into the small closed set of spend
//! types the engine understands, by opcode/length template matching over the
//! raw script bytes — never by address decoding. Unrecognized templates are
//! `Unknown` and must be spent as non-witness inputs (full previous
//! transaction attached), never guessed at.

use bitcoin::Script;
use serde::{Deserialize, Serialize};

/// The closed set of recognized locking-script templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    Unknown,
}

impl ScriptKind {
    /// Whether this template is a native witness program.
    pub fn is_witness_template(self) -> bool {
        matches!(self, ScriptKind::P2wpkh | ScriptKind::P2wsh | ScriptKind::P2tr)
    }
}

/// Derived classification of one locking script.
///
/// `is_witness` is true only for native witness templates or a P2SH script
/// whose supplied redeem script is itself a witness template (wrapped
/// segwit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTypeInfo {
    pub kind: ScriptKind,
    pub is_witness: bool,
    pub redeem_script_kind: Option<ScriptKind>,
}

impl ScriptTypeInfo {
    /// Classify a locking script with no redeem script context.
    pub fn classify(script: &Script) -> Self {
        Self::classify_with_redeem(script, None)
    }

    /// Classify a locking script, inspecting the redeem script (when the
    /// caller has one) to detect P2SH-wrapped segwit sub-types.
    pub fn classify_with_redeem(script: &Script, redeem_script: Option<&Script>) -> Self {
        let kind = match_template(script.as_bytes());
        let mut info = Self {
            kind,
            is_witness: kind.is_witness_template(),
            redeem_script_kind: None,
        };

        if kind == ScriptKind::P2sh {
            if let Some(redeem) = redeem_script {
                let redeem_kind = match_template(redeem.as_bytes());
                info.redeem_script_kind = Some(redeem_kind);
                if redeem_kind.is_witness_template() {
                    info.is_witness = true;
                }
            }
        }

        info
    }
}

/// Opcode/length signatures for the standard templates.
///
/// P2PKH:  OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG   (25 bytes)
/// P2SH:   OP_HASH160 <20> OP_EQUAL                            (23 bytes)
/// P2WPKH: OP_0 <20>                                           (22 bytes)
/// P2WSH:  OP_0 <32>                                           (34 bytes)
/// P2TR:   OP_1 <32>                                           (34 bytes)
fn match_template(bytes: &[u8]) -> ScriptKind {
    match bytes {
        [0x76, 0xa9, 0x14, .., 0x88, 0xac] if bytes.len() == 25 => ScriptKind::P2pkh,
        [0xa9, 0x14, .., 0x87] if bytes.len() == 23 => ScriptKind::P2sh,
        [0x00, 0x14, ..] if bytes.len() == 22 => ScriptKind::P2wpkh,
        [0x00, 0x20, ..] if bytes.len() == 34 => ScriptKind::P2wsh,
        [0x51, 0x20, ..] if bytes.len() == 34 => ScriptKind::P2tr,
        _ => ScriptKind::Unknown,
    }
}
