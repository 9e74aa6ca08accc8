//! Co-signed funding for chunked uploads
//!
//! The merge transaction is the only fully signed spend: it moves wallet
//! value into two outputs to ourselves, one per pre-transaction. Each
//! pre-transaction spends one of those outputs with a signature that leaves
//! outputs (and, with ANYONECANPAY, other inputs) open for the upload
//! service to fill in.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::fees::chunked::{
    merge_fee, pre_tx_amount, AMOUNT_TOLERANCE, DIRECT_FUNDING_MIN, DIRECT_OUTPUT_VALUE, MERGE_CHANGE_DUST,
};
use crate::fees::FeeSchedule;
use crate::tx::{
    sign_p2pkh_input, PrevOut, TxDraft, SIGHASH_ALL_FORKID, SIGHASH_NONE_ANYONECANPAY_FORKID, SIGHASH_NONE_FORKID,
    SIGHASH_SINGLE_ANYONECANPAY_FORKID,
};
use crate::types::{Chain, SignedTx};
use crate::wallet::{DerivedKey, KeyRing, Utxo, UtxoReservation, UtxoSelector};
use crate::log_debug;

/// Which data commitment a pre-transaction will carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreTxRole {
    Chunk,
    Index,
}

/// Amounts the merge transaction must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    pub chunk_amount: u64,
    pub index_amount: u64,
    pub merge_fee: u64,
}

impl MergePlan {
    /// Derive the plan from the service's per-pre-tx quotes
    pub fn from_quotes(chunk_pre_tx_fee: u64, index_pre_tx_fee: u64, fee_rate: u64) -> Self {
        Self {
            chunk_amount: pre_tx_amount(chunk_pre_tx_fee, fee_rate),
            index_amount: pre_tx_amount(index_pre_tx_fee, fee_rate),
            merge_fee: merge_fee(fee_rate),
        }
    }

    pub fn total(&self) -> u64 {
        self.chunk_amount + self.index_amount + self.merge_fee
    }

    pub fn amount(&self, role: PreTxRole) -> u64 {
        match role {
            PreTxRole::Chunk => self.chunk_amount,
            PreTxRole::Index => self.index_amount,
        }
    }
}

/// Output positions of the two pre-tx fundings inside the merge transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutputs {
    pub chunk_vout: u32,
    pub index_vout: u32,
    pub chunk_value: u64,
    pub index_value: u64,
}

impl MergeOutputs {
    /// `(vout, value)` funding `role`
    pub fn funding(&self, role: PreTxRole) -> (u32, u64) {
        match role {
            PreTxRole::Chunk => (self.chunk_vout, self.chunk_value),
            PreTxRole::Index => (self.index_vout, self.index_value),
        }
    }
}

/// Assign merge outputs to roles by value.
///
/// `candidates` are `(vout, value)` pairs paying our own address. Every
/// assignment with both values inside `tolerance` is scored by total
/// deviation; the lowest wins. A tie between assignments that would fund
/// the roles differently cannot be resolved and is rejected.
pub fn match_merge_outputs(
    candidates: &[(u32, u64)],
    chunk_amount: u64,
    index_amount: u64,
    tolerance: u64,
) -> EngineResult<MergeOutputs> {
    let mut best: Option<(u64, MergeOutputs)> = None;
    let mut tied = false;

    for &(chunk_vout, chunk_value) in candidates {
        let chunk_dev = chunk_value.abs_diff(chunk_amount);
        if chunk_dev > tolerance {
            continue;
        }
        for &(index_vout, index_value) in candidates {
            if index_vout == chunk_vout {
                continue;
            }
            let index_dev = index_value.abs_diff(index_amount);
            if index_dev > tolerance {
                continue;
            }
            let candidate = MergeOutputs {
                chunk_vout,
                index_vout,
                chunk_value,
                index_value,
            };
            let score = chunk_dev + index_dev;
            match &best {
                Some((best_score, _)) if score > *best_score => {}
                Some((best_score, current)) if score == *best_score => {
                    // With equal targets the roles are interchangeable; keep the first
                    if chunk_amount != index_amount
                        && (current.chunk_value, current.index_value) != (chunk_value, index_value)
                    {
                        tied = true;
                    }
                }
                _ => {
                    best = Some((score, candidate));
                    tied = false;
                }
            }
        }
    }

    match best {
        Some((_, outputs)) if !tied => Ok(outputs),
        Some(_) => Err(EngineError::amount_match_ambiguous(format!(
            "Merge outputs match chunk {} and index {} equally well in more than one way",
            chunk_amount, index_amount
        ))),
        None => Err(EngineError::amount_match_ambiguous(format!(
            "No pair of merge outputs lies within {} of chunk {} and index {}",
            tolerance, chunk_amount, index_amount
        ))),
    }
}

/// Fully prepared funding for one upload task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoSignedUpload {
    pub merge_tx: SignedTx,
    pub chunk_pre_tx: SignedTx,
    pub index_pre_tx: SignedTx,
    pub outputs: MergeOutputs,
    /// Wallet outputs the merge transaction spends
    pub spent: Vec<Utxo>,
}

impl CoSignedUpload {
    pub fn reservation(&self) -> UtxoReservation {
        UtxoReservation::new(&self.spent)
    }
}

/// Funding for a single-shot upload: the service appends the data output
/// and any further inputs it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPreTx {
    pub pre_tx: SignedTx,
    pub funding: Utxo,
}

impl DirectPreTx {
    pub fn reservation(&self) -> UtxoReservation {
        UtxoReservation::new(std::slice::from_ref(&self.funding))
    }
}

pub struct CoSigner<'a> {
    ring: &'a KeyRing,
    fee_rate: u64,
    pre_tx_sighash: u32,
}

impl<'a> CoSigner<'a> {
    pub fn new(ring: &'a KeyRing, fee_rate: u64) -> Self {
        Self {
            ring,
            fee_rate: fee_rate.max(1),
            pre_tx_sighash: SIGHASH_NONE_ANYONECANPAY_FORKID,
        }
    }

    /// Select the pre-tx sighash; only NONE|ANYONECANPAY|FORKID and
    /// NONE|FORKID leave the outputs open
    pub fn with_pre_tx_sighash(mut self, sighash: u32) -> EngineResult<Self> {
        if sighash != SIGHASH_NONE_ANYONECANPAY_FORKID && sighash != SIGHASH_NONE_FORKID {
            return Err(EngineError::invalid_input(format!(
                "Pre-transaction sighash {:#04x} is not supported",
                sighash
            )));
        }
        self.pre_tx_sighash = sighash;
        Ok(self)
    }

    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    /// Merge transaction: largest inputs first, two outputs to self, change
    pub fn build_merge_tx(&self, utxos: &[Utxo], plan: &MergePlan) -> EngineResult<(TxDraft, Vec<Utxo>)> {
        let wallet = self.ring.primary(Chain::Mvc);
        let selection = UtxoSelector::new(FeeSchedule::mvc()).cover_largest_first(utxos, plan.total())?;

        let mut draft = TxDraft::new(Chain::Mvc, self.ring.network());
        for utxo in &selection.chosen {
            draft.add_utxo_input(utxo)?;
        }
        draft.add_address_output(&wallet.address, plan.chunk_amount)?;
        draft.add_address_output(&wallet.address, plan.index_amount)?;
        let change = selection.total_value - plan.total();
        if change > MERGE_CHANGE_DUST {
            draft.add_address_output(&wallet.address, change)?;
        }

        for input in 0..draft.input_count() {
            sign_p2pkh_input(self.ring.secp(), &mut draft, input, &wallet, SIGHASH_ALL_FORKID)?;
        }
        Ok((draft, selection.chosen))
    }

    /// Pre-transaction: one input spending `vout` of the merge, no outputs
    pub fn build_pre_tx(&self, merge_txid: &str, vout: u32, value: u64, key: &DerivedKey) -> EngineResult<SignedTx> {
        let mut draft = TxDraft::new(Chain::Mvc, self.ring.network());
        draft.add_input(
            merge_txid,
            vout,
            PrevOut {
                value,
                script_pubkey: key.script_pubkey(),
            },
        )?;
        sign_p2pkh_input(self.ring.secp(), &mut draft, 0, key, self.pre_tx_sighash)?;
        Ok(SignedTx {
            txid: draft.txid(),
            raw_hex: draft.raw_hex(),
            cost: 0,
        })
    }

    /// Direct-upload pre-transaction: the largest wallet output, one output
    /// back to the wallet at index 0, signed SINGLE|ANYONECANPAY|FORKID
    pub fn build_direct_pre_tx(&self, utxos: &[Utxo]) -> EngineResult<DirectPreTx> {
        let wallet = self.ring.primary(Chain::Mvc);
        let funding = utxos
            .iter()
            .filter(|u| u.value >= DIRECT_FUNDING_MIN)
            .max_by_key(|u| u.value)
            .cloned()
            .ok_or_else(|| {
                EngineError::insufficient_balance(format!(
                    "Direct upload needs an output of at least {} satoshis",
                    DIRECT_FUNDING_MIN
                ))
            })?;

        let mut draft = TxDraft::new(Chain::Mvc, self.ring.network());
        draft.add_utxo_input(&funding)?;
        draft.add_address_output(&wallet.address, DIRECT_OUTPUT_VALUE)?;
        sign_p2pkh_input(self.ring.secp(), &mut draft, 0, &wallet, SIGHASH_SINGLE_ANYONECANPAY_FORKID)?;

        log_debug!(
            "chunked",
            "Direct upload funding signed",
            funding_txid = funding.txid,
            funding_value = funding.value
        );

        Ok(DirectPreTx {
            pre_tx: SignedTx {
                txid: draft.txid(),
                raw_hex: draft.raw_hex(),
                cost: 0,
            },
            funding,
        })
    }

    /// Pre-transaction for `role`, spending its matched merge output
    pub fn pre_tx_for(&self, role: PreTxRole, merge_txid: &str, outputs: &MergeOutputs) -> EngineResult<SignedTx> {
        let (vout, value) = outputs.funding(role);
        self.build_pre_tx(merge_txid, vout, value, &self.ring.primary(Chain::Mvc))
    }

    /// Outputs of `merge` paying `key`, as `(vout, value)`
    fn own_outputs(merge: &TxDraft, key: &DerivedKey) -> Vec<(u32, u64)> {
        let script = key.script_pubkey();
        (0..merge.output_count())
            .filter(|&i| merge.output_script(i) == Some(&script))
            .filter_map(|i| merge.output_value(i).map(|v| (i as u32, v)))
            .collect()
    }

    /// Merge plus both pre-transactions
    pub fn cosign(&self, utxos: &[Utxo], plan: &MergePlan) -> EngineResult<CoSignedUpload> {
        let wallet = self.ring.primary(Chain::Mvc);
        let (merge, spent) = self.build_merge_tx(utxos, plan)?;
        let merge_txid = merge.txid();

        let outputs = match_merge_outputs(
            &Self::own_outputs(&merge, &wallet),
            plan.chunk_amount,
            plan.index_amount,
            AMOUNT_TOLERANCE,
        )?;
        let chunk_pre_tx = self.pre_tx_for(PreTxRole::Chunk, &merge_txid, &outputs)?;
        let index_pre_tx = self.pre_tx_for(PreTxRole::Index, &merge_txid, &outputs)?;

        log_debug!(
            "chunked",
            "Upload funding co-signed",
            merge_txid = merge_txid,
            chunk_vout = outputs.chunk_vout,
            index_vout = outputs.index_vout,
            sighash = format!("{:#04x}", self.pre_tx_sighash)
        );

        Ok(CoSignedUpload {
            merge_tx: SignedTx {
                txid: merge_txid,
                raw_hex: merge.raw_hex(),
                cost: plan.total(),
            },
            chunk_pre_tx,
            index_pre_tx,
            outputs,
            spent,
        })
    }
}
