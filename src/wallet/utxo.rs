//! UTXO Management
//!
//! The spendable-output type shared by every builder, a batch-scoped pool
//! that never hands out the same outpoint twice, and an explicit
//! reservation that is re-checked against the chain before broadcast.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Types
// =============================================================================

/// Spendable output as reported by the wallet API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    #[serde(rename = "outIndex")]
    pub output_index: u32,
    pub value: u64,
    pub address: String,
    pub confirmed: bool,
    /// Block height, `-1` while in the mempool
    pub height: i64,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, output_index: u32, value: u64, address: impl Into<String>) -> Self {
        Self {
            txid: txid.into(),
            output_index,
            value,
            address: address.into(),
            confirmed: true,
            height: 1,
        }
    }

    /// Output of a transaction we just built
    pub fn unconfirmed(txid: impl Into<String>, output_index: u32, value: u64, address: impl Into<String>) -> Self {
        Self {
            confirmed: false,
            height: -1,
            ..Self::new(txid, output_index, value, address)
        }
    }

    /// Outpoint key `txid:vout`
    pub fn key(&self) -> String {
        format!("{}:{}", self.txid, self.output_index)
    }
}

pub fn total_value(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|u| u.value).sum()
}

// =============================================================================
// Pool
// =============================================================================

/// UTXOs available to one batch
///
/// Every builder takes inputs out through `take` and returns change through
/// `add_change`, so a later draft in the batch can never double-spend an
/// earlier one.
#[derive(Debug, Clone, Default)]
pub struct UtxoPool {
    available: Vec<Utxo>,
    spent: HashSet<String>,
}

impl UtxoPool {
    pub fn new(utxos: Vec<Utxo>) -> Self {
        let mut pool = Self::default();
        for utxo in utxos {
            pool.insert(utxo);
        }
        pool
    }

    fn insert(&mut self, utxo: Utxo) {
        let key = utxo.key();
        if self.spent.contains(&key) || self.available.iter().any(|u| u.key() == key) {
            return;
        }
        self.available.push(utxo);
    }

    pub fn available(&self) -> &[Utxo] {
        &self.available
    }

    pub fn total(&self) -> u64 {
        total_value(&self.available)
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    pub fn is_spent(&self, key: &str) -> bool {
        self.spent.contains(key)
    }

    /// Mark outputs as spent and remove them from the pool
    pub fn take(&mut self, chosen: &[Utxo]) -> EngineResult<()> {
        for utxo in chosen {
            let key = utxo.key();
            if self.spent.contains(&key) {
                return Err(EngineError::invalid_transaction(format!(
                    "Outpoint {} already spent in this batch",
                    key
                )));
            }
        }
        for utxo in chosen {
            let key = utxo.key();
            self.available.retain(|u| u.key() != key);
            self.spent.insert(key);
        }
        Ok(())
    }

    /// Offer a freshly created change output to later drafts
    pub fn add_change(&mut self, utxo: Utxo) {
        self.insert(utxo);
    }

    pub fn into_available(self) -> Vec<Utxo> {
        self.available
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// Outpoints an operation intends to spend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoReservation {
    outpoints: Vec<String>,
    value: u64,
}

impl UtxoReservation {
    pub fn new(utxos: &[Utxo]) -> Self {
        Self {
            outpoints: utxos.iter().map(Utxo::key).collect(),
            value: total_value(utxos),
        }
    }

    pub fn outpoints(&self) -> &[String] {
        &self.outpoints
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn len(&self) -> usize {
        self.outpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outpoints.is_empty()
    }

    /// Every reserved outpoint must still appear in a fresh scan
    pub fn verify_still_unspent(&self, fresh: &[Utxo]) -> EngineResult<()> {
        let live: HashSet<String> = fresh.iter().map(Utxo::key).collect();
        let missing: Vec<&String> = self.outpoints.iter().filter(|k| !live.contains(*k)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(EngineError::reservation_lost(format!(
            "{} of {} reserved outputs were spent elsewhere",
            missing.len(),
            self.outpoints.len()
        ))
        .with_details(
            missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(","),
        ))
    }
}
