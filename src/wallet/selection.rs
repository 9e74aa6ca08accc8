//! Coin Selection
//!
//! Confirmed outputs are tried before unconfirmed ones, each group in random
//! order so repeated spends do not fingerprint the wallet. The required
//! amount grows by one input's fee with every output added; selection stops
//! as soon as the running total strictly exceeds it.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::FeeSchedule;

use super::utxo::{total_value, Utxo};

/// What a selection has to pay for besides the inputs themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTarget {
    /// Value to cover; may be negative when existing inputs already exceed outputs
    pub amount: i64,
    pub fee_rate: u64,
    /// Outputs the finished transaction will carry
    pub outputs: usize,
    /// Bytes beyond the schedule's templates (data carriers, P2SH unlocks)
    pub extra_bytes: u64,
}

impl SelectionTarget {
    pub fn new(amount: i64, fee_rate: u64) -> Self {
        Self {
            amount,
            fee_rate,
            outputs: 2,
            extra_bytes: 0,
        }
    }

    pub fn outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn extra_bytes(mut self, bytes: u64) -> Self {
        self.extra_bytes = bytes;
        self
    }
}

/// Chosen inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub chosen: Vec<Utxo>,
    /// Fee budgeted for the final input count
    pub fee: u64,
    pub total_value: u64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.chosen.is_empty()
    }
}

/// Fee-aware coin selector for one chain
#[derive(Debug, Clone, Copy)]
pub struct UtxoSelector {
    schedule: FeeSchedule,
}

impl UtxoSelector {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Fee part of the requirement once `inputs` outputs are being spent
    pub fn fee_for(&self, target: &SelectionTarget, inputs: usize) -> u64 {
        self.schedule.margin
            + self
                .schedule
                .estimate_fee(inputs, target.outputs, target.extra_bytes, target.fee_rate)
    }

    /// Amount the inputs must strictly exceed
    pub fn required_for(&self, target: &SelectionTarget, inputs: usize) -> i64 {
        target.amount + self.fee_for(target, inputs) as i64
    }

    pub fn select(&self, utxos: &[Utxo], target: &SelectionTarget) -> EngineResult<Selection> {
        self.select_with_rng(utxos, target, &mut rand::thread_rng())
    }

    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        utxos: &[Utxo],
        target: &SelectionTarget,
        rng: &mut R,
    ) -> EngineResult<Selection> {
        if self.required_for(target, 0) <= 0 {
            return Ok(Selection::default());
        }

        let (mut confirmed, mut unconfirmed): (Vec<Utxo>, Vec<Utxo>) =
            utxos.iter().cloned().partition(|u| u.confirmed);
        confirmed.shuffle(rng);
        unconfirmed.shuffle(rng);

        let mut chosen = Vec::new();
        let mut total: u64 = 0;

        for utxo in confirmed.into_iter().chain(unconfirmed) {
            total += utxo.value;
            chosen.push(utxo);
            let required = self.required_for(target, chosen.len());
            if total as i64 > required {
                return Ok(Selection {
                    fee: self.fee_for(target, chosen.len()),
                    total_value: total,
                    chosen,
                });
            }
        }

        let required = self.required_for(target, chosen.len().max(1));
        Err(EngineError::insufficient_balance(format!(
            "Insufficient balance: need more than {} sats, have {} sats",
            required,
            total_value(utxos)
        )))
    }

    /// Largest-first until `total` is covered; no per-input fee growth
    pub fn cover_largest_first(&self, utxos: &[Utxo], total: u64) -> EngineResult<Selection> {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by(|a, b| b.value.cmp(&a.value));

        let mut chosen = Vec::new();
        let mut sum = 0u64;
        for utxo in sorted {
            if sum >= total {
                break;
            }
            sum += utxo.value;
            chosen.push(utxo);
        }

        if sum < total {
            return Err(EngineError::insufficient_balance(format!(
                "Insufficient balance: need {} sats, have {} sats",
                total, sum
            )));
        }
        Ok(Selection {
            chosen,
            fee: 0,
            total_value: sum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn utxo(id: u8, value: u64, confirmed: bool) -> Utxo {
        let mut u = Utxo::new(hex::encode([id; 32]), 0, value, "addr");
        if !confirmed {
            u.confirmed = false;
            u.height = -1;
        }
        u
    }

    #[test]
    fn test_non_positive_target_needs_nothing() {
        let selector = UtxoSelector::new(FeeSchedule::mvc());
        let sel = selector
            .select(&[utxo(1, 5000, true)], &SelectionTarget::new(-10_000, 1))
            .unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn test_confirmed_before_unconfirmed() {
        let selector = UtxoSelector::new(FeeSchedule::mvc());
        let utxos = vec![utxo(1, 500, true), utxo(2, 2000, true), utxo(3, 10_000, false)];

        for seed in 0..16 {
            let mut rng = StdRng::seed_from_u64(seed);
            let sel = selector
                .select_with_rng(&utxos, &SelectionTarget::new(1000, 1), &mut rng)
                .unwrap();
            assert!(sel.chosen.iter().all(|u| u.confirmed));
        }

        // Confirmed alone cannot cover 2500 + fees: the unconfirmed one comes last
        let sel = selector.select(&utxos, &SelectionTarget::new(2500, 1)).unwrap();
        assert_eq!(sel.chosen.len(), 3);
        assert!(!sel.chosen[2].confirmed);
    }

    #[test]
    fn test_required_grows_per_input() {
        let selector = UtxoSelector::new(FeeSchedule::mvc());
        let target = SelectionTarget::new(1000, 1);
        // 1000 + 100 margin + 68 for two outputs + 108 per input
        assert_eq!(selector.required_for(&target, 0), 1168);
        assert_eq!(selector.required_for(&target, 1), 1276);
        assert_eq!(selector.required_for(&target, 2), 1384);
    }

    #[test]
    fn test_insufficient() {
        let selector = UtxoSelector::new(FeeSchedule::doge());
        let err = selector
            .select(&[utxo(1, 1_000_000, true)], &SelectionTarget::new(1_000_000, 1_000_000))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InsufficientBalance);
    }

    #[test]
    fn test_cover_largest_first() {
        let selector = UtxoSelector::new(FeeSchedule::mvc());
        let utxos = vec![utxo(1, 100, true), utxo(2, 5000, true), utxo(3, 700, false)];
        let sel = selector.cover_largest_first(&utxos, 5500).unwrap();
        assert_eq!(sel.chosen.iter().map(|u| u.value).collect::<Vec<_>>(), vec![5000, 700]);
        assert!(selector.cover_largest_first(&utxos, 6000).is_err());
    }
}
