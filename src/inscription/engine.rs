//! DOGE commit/reveal builder
//!
//! Commit: wallet inputs fund a P2SH output locked to a one-time key.
//! Reveal: spends that output with the inscription in the unlock script,
//! pays the destination and tops up the fee from wallet inputs.

use bitcoin::secp256k1::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{EngineError, EngineResult};
use crate::fees::{p2sh_input_size, FeeSchedule};
use crate::pin::MetaidRecord;
use crate::tx::{input_signature, sign_p2pkh_input, PrevOut, TxDraft, SIGHASH_ALL};
use crate::types::{Chain, Receiver, SignedTx};
use crate::wallet::{KeyRing, SelectionTarget, Utxo, UtxoPool, UtxoSelector};
use crate::log_debug;

use super::script::RevealScripts;

/// Value locked by the commit output
pub const COMMIT_OUTPUT_VALUE: u64 = 1_000_000;
/// Reveal payment when the caller does not choose one
pub const DEFAULT_REVEAL_VALUE: u64 = 1_000_000;

/// One-time key authorizing a single reveal
pub struct EphemeralKey {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl EphemeralKey {
    pub fn generate(ring: &KeyRing) -> EngineResult<Self> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        for _ in 0..8 {
            OsRng.fill_bytes(bytes.as_mut());
            if let Ok(secret) = SecretKey::from_slice(bytes.as_ref()) {
                return Ok(Self {
                    public: secret.public_key(ring.secp()),
                    secret,
                });
            }
        }
        Err(EngineError::crypto_error("Failed to generate an ephemeral key"))
    }

    pub fn pubkey_bytes(&self) -> [u8; 33] {
        self.public.serialize()
    }
}

/// Signed commit and reveal for one record
#[derive(Debug, Clone)]
pub struct InscriptionPair {
    pub commit: SignedTx,
    pub reveal: SignedTx,
    pub commit_fee: u64,
    pub reveal_fee: u64,
    /// Pool entries consumed by the pair, including earlier in-batch change
    pub spent: Vec<Utxo>,
}

pub struct InscriptionEngine<'a> {
    ring: &'a KeyRing,
    fee_rate: u64,
    selector: UtxoSelector,
}

impl<'a> InscriptionEngine<'a> {
    pub fn new(ring: &'a KeyRing, fee_rate: u64) -> Self {
        Self {
            ring,
            fee_rate: fee_rate.max(1),
            selector: UtxoSelector::new(FeeSchedule::doge()),
        }
    }

    /// Build the pair for `record`, taking inputs from and returning change to `pool`.
    /// `extra` outputs ride on the commit.
    pub fn build(
        &self,
        record: &MetaidRecord,
        pool: &mut UtxoPool,
        reveal_value: u64,
        extra: &[Receiver],
    ) -> EngineResult<InscriptionPair> {
        let ephemeral = EphemeralKey::generate(self.ring)?;
        self.build_with_key(record, pool, reveal_value, extra, &ephemeral)
    }

    pub fn build_with_key(
        &self,
        record: &MetaidRecord,
        pool: &mut UtxoPool,
        reveal_value: u64,
        extra: &[Receiver],
        ephemeral: &EphemeralKey,
    ) -> EngineResult<InscriptionPair> {
        let network = self.ring.network();
        let wallet = self.ring.primary(Chain::Doge);
        let schedule = *self.selector.schedule();
        let scripts = RevealScripts::new(record, &ephemeral.pubkey_bytes())?;
        let destination = record.reveal_address.clone().unwrap_or_else(|| wallet.address.clone());

        // Commit
        let mut commit = TxDraft::new(Chain::Doge, network);
        commit.add_output(scripts.p2sh_script(), COMMIT_OUTPUT_VALUE);
        for receiver in extra {
            commit.add_address_output(&receiver.address, receiver.amount)?;
        }
        let commit_outputs = commit.output_count() + 1;
        let commit_target = commit.output_total() as i64;
        let selection = self.selector.select(
            pool.available(),
            &SelectionTarget::new(commit_target, self.fee_rate).outputs(commit_outputs),
        )?;
        pool.take(&selection.chosen)?;
        for utxo in &selection.chosen {
            commit.add_utxo_input(utxo)?;
        }
        let commit_fee = schedule.estimate_fee(selection.chosen.len(), commit_outputs, 0, self.fee_rate);
        let commit_change = remaining(selection.total_value, commit.output_total(), commit_fee)?;
        let mut spent = selection.chosen;
        if commit_change >= schedule.dust_limit {
            commit.add_address_output(&wallet.address, commit_change)?;
        }
        for input in 0..commit.input_count() {
            sign_p2pkh_input(self.ring.secp(), &mut commit, input, &wallet, SIGHASH_ALL)?;
        }
        let commit_txid = commit.txid();
        if commit_change >= schedule.dust_limit {
            let vout = (commit.output_count() - 1) as u32;
            pool.add_change(Utxo::unconfirmed(commit_txid.clone(), vout, commit_change, wallet.address.clone()));
        }

        // Reveal
        let mut reveal = TxDraft::new(Chain::Doge, network);
        reveal.add_input(
            &commit_txid,
            0,
            PrevOut {
                value: COMMIT_OUTPUT_VALUE,
                script_pubkey: scripts.p2sh_script(),
            },
        )?;
        reveal.add_address_output(&destination, reveal_value)?;

        let extra_bytes = p2sh_input_size(scripts.unlock_size());
        let reveal_target = reveal_value as i64 - COMMIT_OUTPUT_VALUE as i64;
        let selection = self.selector.select(
            pool.available(),
            &SelectionTarget::new(reveal_target, self.fee_rate).extra_bytes(extra_bytes),
        )?;
        pool.take(&selection.chosen)?;
        for utxo in &selection.chosen {
            reveal.add_utxo_input(utxo)?;
        }
        let reveal_fee = schedule.estimate_fee(selection.chosen.len(), 2, extra_bytes, self.fee_rate);
        let reveal_change = remaining(COMMIT_OUTPUT_VALUE + selection.total_value, reveal_value, reveal_fee)?;
        if reveal_change >= schedule.dust_limit {
            reveal.add_address_output(&wallet.address, reveal_change)?;
        }

        for input in 1..reveal.input_count() {
            sign_p2pkh_input(self.ring.secp(), &mut reveal, input, &wallet, SIGHASH_ALL)?;
        }
        let signature = input_signature(
            self.ring.secp(),
            &reveal,
            0,
            &scripts.lock_script(),
            &ephemeral.secret,
            SIGHASH_ALL,
        )?;
        reveal.set_input_script(0, scripts.unlock_script(signature, &ephemeral.pubkey_bytes()))?;

        let reveal_txid = reveal.txid();
        if reveal_change >= schedule.dust_limit {
            let vout = (reveal.output_count() - 1) as u32;
            pool.add_change(Utxo::unconfirmed(reveal_txid.clone(), vout, reveal_change, wallet.address.clone()));
        }

        log_debug!(
            "inscription",
            "Commit/reveal built",
            commit_txid = commit_txid,
            reveal_txid = reveal_txid,
            pushes = scripts.push_count
        );

        spent.extend(selection.chosen);
        Ok(InscriptionPair {
            commit: SignedTx {
                txid: commit_txid,
                raw_hex: commit.raw_hex(),
                cost: commit_fee + extra.iter().map(|r| r.amount).sum::<u64>(),
            },
            reveal: SignedTx {
                txid: reveal_txid,
                raw_hex: reveal.raw_hex(),
                cost: reveal_fee,
            },
            commit_fee,
            reveal_fee,
            spent,
        })
    }
}

fn remaining(input: u64, output: u64, fee: u64) -> EngineResult<u64> {
    input
        .checked_sub(output)
        .and_then(|v| v.checked_sub(fee))
        .ok_or_else(|| {
            EngineError::insufficient_balance(format!(
                "Inputs of {} cannot cover {} plus a fee of {}",
                input, output, fee
            ))
        })
}
