//! Transfer builder
//!
//! One task becomes one signed transaction paying every receiver, with change
//! back to the wallet's primary address as the last output.

use crate::error::{EngineError, EngineResult};
use crate::fees::FeeSchedule;
use crate::tx::{default_sighash, sign_p2pkh_input, TxDraft};
use crate::types::{Chain, Receiver, SignedTx};
use crate::wallet::{is_valid_address, KeyRing, SelectionTarget, Utxo, UtxoSelector};
use crate::log_debug;

/// Smallest DOGE payment the wallet will send
pub const MIN_DOGE_TRANSFER: u64 = 1_000_000;

/// A signed transfer and what it left behind
#[derive(Debug, Clone)]
pub struct BuiltTransfer {
    pub tx: SignedTx,
    /// Change output, spendable by the next task in a chain
    pub change: Option<Utxo>,
    pub spent: Vec<Utxo>,
}

pub struct TransferEngine<'a> {
    ring: &'a KeyRing,
    chain: Chain,
    fee_rate: u64,
    selector: UtxoSelector,
}

impl<'a> TransferEngine<'a> {
    pub fn new(ring: &'a KeyRing, chain: Chain, fee_rate: u64) -> Self {
        Self {
            ring,
            chain,
            fee_rate: fee_rate.max(1),
            selector: UtxoSelector::new(FeeSchedule::for_chain(chain)),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    /// Reject malformed receivers before any network work
    pub fn validate(&self, receivers: &[Receiver]) -> EngineResult<()> {
        if receivers.is_empty() {
            return Err(EngineError::invalid_input("Transfer has no receivers"));
        }
        for receiver in receivers {
            if !is_valid_address(self.chain, self.ring.network(), &receiver.address) {
                return Err(EngineError::invalid_address(format!(
                    "{} is not a {} address",
                    receiver.address, self.chain
                )));
            }
            if receiver.amount == 0 {
                return Err(EngineError::invalid_input("Transfer amount must be positive"));
            }
            if self.chain == Chain::Doge && receiver.amount < MIN_DOGE_TRANSFER {
                return Err(EngineError::amount_below_minimum(format!(
                    "Minimum transfer amount is 0.01 DOGE ({} satoshis), got {}",
                    MIN_DOGE_TRANSFER, receiver.amount
                )));
            }
        }
        Ok(())
    }

    pub fn build(&self, receivers: &[Receiver], utxos: &[Utxo]) -> EngineResult<BuiltTransfer> {
        self.validate(receivers)?;
        let wallet = self.ring.primary(self.chain);
        let schedule = *self.selector.schedule();

        let mut draft = TxDraft::new(self.chain, self.ring.network());
        for receiver in receivers {
            draft.add_address_output(&receiver.address, receiver.amount)?;
        }

        let target = SelectionTarget::new(draft.output_total() as i64, self.fee_rate).outputs(receivers.len() + 1);
        let selection = self.selector.select(utxos, &target)?;
        for utxo in &selection.chosen {
            draft.add_utxo_input(utxo)?;
        }

        let change = draft.append_change(&wallet.address, self.fee_rate, &schedule)?;
        let sighash = default_sighash(self.chain);
        for input in 0..draft.input_count() {
            sign_p2pkh_input(self.ring.secp(), &mut draft, input, &wallet, sighash)?;
        }

        let txid = draft.txid();
        let change = change.map(|value| {
            Utxo::unconfirmed(
                txid.clone(),
                (draft.output_count() - 1) as u32,
                value,
                wallet.address.clone(),
            )
        });
        let cost = draft.input_total().saturating_sub(draft.value_to(&wallet.script_pubkey()));
        log_debug!(
            "transfer",
            "Transfer signed",
            chain = self.chain,
            txid = txid,
            inputs = draft.input_count(),
            cost = cost
        );

        Ok(BuiltTransfer {
            tx: SignedTx {
                txid,
                raw_hex: draft.raw_hex(),
                cost,
            },
            change,
            spent: selection.chosen,
        })
    }
}
