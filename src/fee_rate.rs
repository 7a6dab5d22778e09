//! Fee-rate normalization.
//!
//! The protocol compose API prices in satoshis per kilobyte while wallets and
//! the size estimator work in satoshis per virtual byte. `FeeRate` is the
//! canonical pair carried through a build; `FeeRate::normalize` is the only
//! way to construct one.

use serde::{Deserialize, Serialize};

use crate::composer::errors::ComposeError;

/// Canonical fee rate for one build.
///
/// Invariant: `sats_per_kvb == sats_per_vbyte * 1000`, exactly. The vbyte
/// leg is derived first (half-up rounding, floored at 1 so a normalized rate
/// can never be zero) and the kilobyte leg is recomputed from it, so the
/// invariant holds for any accepted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub sats_per_vbyte: u64,
    pub sats_per_kvb: u64,
}

/// Caller-supplied fee rate in one of the two conventional units.
///
/// Exactly one field must be set; anything else is `InvalidFeeRate`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeeRateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sats_per_vbyte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sats_per_kvb: Option<f64>,
}

impl FeeRate {
    /// Normalize a caller-supplied rate into the canonical pair.
    pub fn normalize(input: FeeRateInput) -> Result<Self, ComposeError> {
        let vbyte = match (input.sats_per_vbyte, input.sats_per_kvb) {
            (Some(v), None) => {
                require_positive(v)?;
                v.round().max(1.0)
            }
            (None, Some(kvb)) => {
                require_positive(kvb)?;
                (kvb / 1000.0).round().max(1.0)
            }
            (Some(_), Some(_)) => {
                return Err(ComposeError::invalid_fee_rate(
                    "supply exactly one of sats_per_vbyte or sats_per_kvb, not both",
                ))
            }
            (None, None) => return Err(ComposeError::invalid_fee_rate("no fee rate supplied")),
        };

        let sats_per_vbyte = vbyte as u64;
        Ok(Self {
            sats_per_vbyte,
            sats_per_kvb: sats_per_vbyte * 1000,
        })
    }

    /// Network fee in satoshis for an estimated virtual size at this rate.
    ///
    /// Both operands are integers so the product is exact; no further
    /// rounding is applied here.
    pub fn fee_for_vsize(&self, vsize: u64) -> u64 {
        vsize * self.sats_per_vbyte
    }
}

fn require_positive(value: f64) -> Result<(), ComposeError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ComposeError::invalid_fee_rate(format!(
            "fee rate must be a positive finite number, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn vbyte_input_sets_both_legs() {
        let rate = FeeRate::normalize(FeeRateInput {
            sats_per_vbyte: Some(10.0),
            sats_per_kvb: None,
        })
        .unwrap();
        assert_eq!(rate.sats_per_vbyte, 10);
        assert_eq!(rate.sats_per_kvb, 10_000);
    }

    #[test]
    fn kvb_input_rounds_and_floors_at_one() {
        let rate = FeeRate::normalize(FeeRateInput {
            sats_per_vbyte: None,
            sats_per_kvb: Some(400.0),
        })
        .unwrap();
        assert_eq!(rate.sats_per_vbyte, 1);
        assert_eq!(rate.sats_per_kvb, 1000);
    }

    #[test]
    fn fractional_vbyte_rate_rounds_half_up() {
        let rate = FeeRate::normalize(FeeRateInput {
            sats_per_vbyte: Some(10.5),
            sats_per_kvb: None,
        })
        .unwrap();
        assert_eq!(rate.sats_per_vbyte, 11);
        assert_eq!(rate.sats_per_kvb, 11_000);
    }

    #[test]
    fn rejects_missing_both_and_supplying_both() {
        assert!(FeeRate::normalize(FeeRateInput::default()).is_err());
        assert!(FeeRate::normalize(FeeRateInput {
            sats_per_vbyte: Some(5.0),
            sats_per_kvb: Some(5000.0),
        })
        .is_err());
    }

    #[test]
    fn rejects_non_positive_and_non_finite() {
        for bad in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            let err = FeeRate::normalize(FeeRateInput {
                sats_per_vbyte: Some(bad),
                sats_per_kvb: None,
            });
            assert!(err.is_err(), "expected rejection for {bad}");
        }
    }

    #[test]
    fn fee_for_vsize_is_exact_product() {
        let rate = FeeRate {
            sats_per_vbyte: 10,
            sats_per_kvb: 10_000,
        };
        assert_eq!(rate.fee_for_vsize(150), 1500);
    }

    proptest! {
        #[test]
        fn round_trip_vbyte_to_kvb(v in 1u64..100_000) {
            let rate = FeeRate::normalize(FeeRateInput {
                sats_per_vbyte: Some(v as f64),
                sats_per_kvb: None,
            }).unwrap();
            prop_assert_eq!(rate.sats_per_kvb, v * 1000);
        }

        #[test]
        fn round_trip_kvb_to_vbyte(v in 1u64..100_000) {
            let rate = FeeRate::normalize(FeeRateInput {
                sats_per_vbyte: None,
                sats_per_kvb: Some((v * 1000) as f64),
            }).unwrap();
            prop_assert_eq!(rate.sats_per_vbyte, v);
        }

        #[test]
        fn invariant_holds_for_any_accepted_input(v in 0.001f64..1_000_000.0) {
            if let Ok(rate) = FeeRate::normalize(FeeRateInput {
                sats_per_vbyte: Some(v),
                sats_per_kvb: None,
            }) {
                prop_assert_eq!(rate.sats_per_kvb, rate.sats_per_vbyte * 1000);
                prop_assert!(rate.sats_per_vbyte >= 1);
            }
        }
    }
}
