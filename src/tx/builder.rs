//! Transaction Builder
//!
//! `TxDraft` wraps a `bitcoin::Transaction` together with the value and
//! locking script of every input it spends, which both sighash algorithms
//! need. Serialization is always the legacy (non-witness) layout so a draft
//! without inputs still has a stable prospective id.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::fees::{FeeSchedule, P2PKH_OUTPUT_SIZE, P2PKH_UNLOCK_SIZE};
use crate::script::data_carrier_script;
use crate::types::{Chain, Network};
use crate::wallet::{address_script, Utxo};

/// Value and locking script of a spent output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevOut {
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

/// Unsigned or partially signed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDraft {
    chain: Chain,
    network: Network,
    tx: Transaction,
    prevouts: Vec<PrevOut>,
}

pub fn parse_txid(txid: &str) -> EngineResult<Txid> {
    Txid::from_str(txid.trim())
        .map_err(|e| EngineError::invalid_input(format!("Invalid txid '{}': {}", txid, e)))
}

/// version | inputs | outputs | locktime, never with a witness marker
pub fn legacy_bytes(tx: &Transaction) -> Vec<u8> {
    let mut out = serialize(&tx.version);
    out.extend(serialize(&tx.input));
    out.extend(serialize(&tx.output));
    out.extend(serialize(&tx.lock_time));
    out
}

impl TxDraft {
    pub fn new(chain: Chain, network: Network) -> Self {
        Self {
            chain,
            network,
            tx: Transaction {
                version: Version(chain.params(network).tx_version),
                lock_time: LockTime::ZERO,
                input: Vec::new(),
                output: Vec::new(),
            },
            prevouts: Vec::new(),
        }
    }

    /// Rebuild a draft from raw hex; `prevouts` must list every input
    pub fn from_hex(chain: Chain, network: Network, raw_hex: &str, prevouts: Vec<PrevOut>) -> EngineResult<Self> {
        let tx: Transaction = deserialize(&hex::decode(raw_hex.trim())?)?;
        if tx.input.len() != prevouts.len() {
            return Err(EngineError::invalid_transaction(format!(
                "Transaction has {} inputs but {} previous outputs were supplied",
                tx.input.len(),
                prevouts.len()
            )));
        }
        Ok(Self {
            chain,
            network,
            tx,
            prevouts,
        })
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.tx.version = Version(version);
        self
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn prevouts(&self) -> &[PrevOut] {
        &self.prevouts
    }

    pub fn input_count(&self) -> usize {
        self.tx.input.len()
    }

    pub fn output_count(&self) -> usize {
        self.tx.output.len()
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    pub fn add_input(&mut self, txid: &str, vout: u32, prevout: PrevOut) -> EngineResult<usize> {
        let txid = parse_txid(txid)?;
        self.tx.input.push(TxIn {
            previous_output: OutPoint { txid, vout },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        });
        self.prevouts.push(prevout);
        Ok(self.tx.input.len() - 1)
    }

    /// Spend a wallet UTXO; its address determines the locking script
    pub fn add_utxo_input(&mut self, utxo: &Utxo) -> EngineResult<usize> {
        let script_pubkey = address_script(self.chain, self.network, &utxo.address)?;
        self.add_input(
            &utxo.txid,
            utxo.output_index,
            PrevOut {
                value: utxo.value,
                script_pubkey,
            },
        )
    }

    pub fn set_input_script(&mut self, index: usize, script_sig: ScriptBuf) -> EngineResult<()> {
        let input = self
            .tx
            .input
            .get_mut(index)
            .ok_or_else(|| EngineError::internal(format!("No input #{}", index)))?;
        input.script_sig = script_sig;
        Ok(())
    }

    /// Point input `index` at a different transaction
    pub fn set_input_txid(&mut self, index: usize, txid: &str) -> EngineResult<()> {
        let txid = parse_txid(txid)?;
        let input = self
            .tx
            .input
            .get_mut(index)
            .ok_or_else(|| EngineError::internal(format!("No input #{}", index)))?;
        input.previous_output.txid = txid;
        Ok(())
    }

    pub fn input_txid(&self, index: usize) -> Option<String> {
        self.tx.input.get(index).map(|i| i.previous_output.txid.to_string())
    }

    pub fn is_input_signed(&self, index: usize) -> bool {
        self.tx
            .input
            .get(index)
            .map(|i| !i.script_sig.is_empty())
            .unwrap_or(false)
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    pub fn add_output(&mut self, script_pubkey: ScriptBuf, value: u64) -> usize {
        self.tx.output.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        });
        self.tx.output.len() - 1
    }

    pub fn add_address_output(&mut self, address: &str, value: u64) -> EngineResult<usize> {
        let script = address_script(self.chain, self.network, address)?;
        Ok(self.add_output(script, value))
    }

    /// Zero-value `OP_FALSE OP_RETURN` output
    pub fn add_data_carrier(&mut self, fields: &[Vec<u8>]) -> usize {
        self.add_output(data_carrier_script(fields), 0)
    }

    pub fn set_output_script(&mut self, index: usize, script_pubkey: ScriptBuf) -> EngineResult<()> {
        let output = self
            .tx
            .output
            .get_mut(index)
            .ok_or_else(|| EngineError::internal(format!("No output #{}", index)))?;
        output.script_pubkey = script_pubkey;
        Ok(())
    }

    pub fn output_value(&self, index: usize) -> Option<u64> {
        self.tx.output.get(index).map(|o| o.value.to_sat())
    }

    pub fn output_script(&self, index: usize) -> Option<&ScriptBuf> {
        self.tx.output.get(index).map(|o| &o.script_pubkey)
    }

    // =========================================================================
    // Totals and size
    // =========================================================================

    pub fn input_total(&self) -> u64 {
        self.prevouts.iter().map(|p| p.value).sum()
    }

    pub fn output_total(&self) -> u64 {
        self.tx.output.iter().map(|o| o.value.to_sat()).sum()
    }

    /// Value paid to `script_pubkey`
    pub fn value_to(&self, script_pubkey: &ScriptBuf) -> u64 {
        self.tx
            .output
            .iter()
            .filter(|o| &o.script_pubkey == script_pubkey)
            .map(|o| o.value.to_sat())
            .sum()
    }

    /// Implied fee; negative while the draft is underfunded
    pub fn fee(&self) -> i64 {
        self.input_total() as i64 - self.output_total() as i64
    }

    pub fn size(&self) -> u64 {
        legacy_bytes(&self.tx).len() as u64
    }

    /// Size once every still-empty input carries a P2PKH unlock
    pub fn estimated_signed_size(&self) -> u64 {
        let unsigned = self.tx.input.iter().filter(|i| i.script_sig.is_empty()).count() as u64;
        self.size() + unsigned * (P2PKH_UNLOCK_SIZE - 1)
    }

    /// Append change to `address` if it clears the schedule's dust limit.
    /// Returns the change value when an output was added.
    pub fn append_change(&mut self, address: &str, fee_rate: u64, schedule: &FeeSchedule) -> EngineResult<Option<u64>> {
        let size_with_change = self.estimated_signed_size() + P2PKH_OUTPUT_SIZE;
        let fee = schedule.fee_for_size(size_with_change, fee_rate);
        let available = self.fee();
        let change = available - fee as i64;

        if available < 0 {
            return Err(EngineError::insufficient_balance(format!(
                "Inputs fall {} sats short of outputs",
                -available
            )));
        }
        if change < schedule.dust_limit as i64 {
            return Ok(None);
        }
        self.add_address_output(address, change as u64)?;
        Ok(Some(change as u64))
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn txid(&self) -> String {
        self.tx.compute_txid().to_string()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        legacy_bytes(&self.tx)
    }

    pub fn raw_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}
