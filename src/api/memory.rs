//! In-memory chain
//!
//! Keeps a UTXO set per chain and applies every broadcast to it: spent
//! outpoints disappear and P2PKH outputs to any address show up as
//! unconfirmed UTXOs. Used by tests and `--dry-run`.

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{EngineError, EngineResult};
use crate::fees::FeeRateTier;
use crate::script::p2pkh_hash;
use crate::types::{Chain, Network};
use crate::wallet::{p2pkh_address, Utxo};

use super::ChainApi;

#[derive(Debug, Default)]
struct Ledger {
    utxos: HashMap<Chain, Vec<Utxo>>,
    fee_tiers: HashMap<Chain, Vec<FeeRateTier>>,
    balance_overrides: HashMap<String, u64>,
    broadcasts: Vec<(Chain, String)>,
    /// Broadcasts left before every further one is rejected
    accept_remaining: Option<usize>,
}

/// `ChainApi` over a local ledger
#[derive(Debug)]
pub struct InMemoryChainApi {
    network: Network,
    ledger: Mutex<Ledger>,
}

impl InMemoryChainApi {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fund(&self, chain: Chain, utxo: Utxo) {
        self.ledger().utxos.entry(chain).or_default().push(utxo);
    }

    pub fn set_fee_tiers(&self, chain: Chain, tiers: Vec<FeeRateTier>) {
        self.ledger().fee_tiers.insert(chain, tiers);
    }

    /// Make `fetch_balance` disagree with the UTXO scan
    pub fn override_balance(&self, address: &str, balance: u64) {
        self.ledger().balance_overrides.insert(address.to_string(), balance);
    }

    /// Accept `count` more broadcasts, then reject
    pub fn reject_after(&self, count: usize) {
        self.ledger().accept_remaining = Some(count);
    }

    /// Spend an outpoint behind the engine's back
    pub fn spend_externally(&self, chain: Chain, txid: &str, vout: u32) {
        if let Some(list) = self.ledger().utxos.get_mut(&chain) {
            list.retain(|u| !(u.txid == txid && u.output_index == vout));
        }
    }

    /// Raw transactions accepted so far, in order
    pub fn broadcasts(&self) -> Vec<(Chain, String)> {
        self.ledger().broadcasts.clone()
    }

    pub fn utxos(&self, chain: Chain) -> Vec<Utxo> {
        self.ledger().utxos.get(&chain).cloned().unwrap_or_default()
    }
}

impl ChainApi for InMemoryChainApi {
    fn fetch_utxos(&self, chain: Chain, address: &str) -> EngineResult<Vec<Utxo>> {
        Ok(self
            .ledger()
            .utxos
            .get(&chain)
            .map(|list| list.iter().filter(|u| u.address == address).cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_balance(&self, chain: Chain, address: &str) -> EngineResult<u64> {
        if let Some(balance) = self.ledger().balance_overrides.get(address) {
            return Ok(*balance);
        }
        Ok(self.fetch_utxos(chain, address)?.iter().map(|u| u.value).sum())
    }

    fn fetch_fee_rates(&self, chain: Chain) -> EngineResult<Vec<FeeRateTier>> {
        Ok(self.ledger().fee_tiers.get(&chain).cloned().unwrap_or_default())
    }

    fn broadcast(&self, chain: Chain, raw_hex: &str) -> EngineResult<String> {
        let tx: Transaction = deserialize(&hex::decode(raw_hex)?)?;
        let txid = tx.compute_txid().to_string();
        let mut ledger = self.ledger();

        if let Some(input) = tx.input.iter().find(|i| i.script_sig.is_empty()) {
            return Err(EngineError::broadcast_rejected(format!(
                "Input {} is not signed",
                input.previous_output
            )));
        }

        if let Some(remaining) = ledger.accept_remaining {
            if remaining == 0 {
                return Err(EngineError::broadcast_rejected("Node rejected transaction"));
            }
            ledger.accept_remaining = Some(remaining - 1);
        }

        let list = ledger.utxos.entry(chain).or_default();
        for input in &tx.input {
            let spent_txid = input.previous_output.txid.to_string();
            let vout = input.previous_output.vout;
            list.retain(|u| !(u.txid == spent_txid && u.output_index == vout));
        }

        for (vout, output) in tx.output.iter().enumerate() {
            if let Ok(hash) = p2pkh_hash(output.script_pubkey.as_bytes()) {
                let address = p2pkh_address(chain, self.network, &hash);
                list.push(Utxo::unconfirmed(txid.clone(), vout as u32, output.value.to_sat(), address));
            }
        }

        ledger.broadcasts.push((chain, raw_hex.to_string()));
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptBuilder;
    use crate::tx::TxDraft;

    fn addr(chain: Chain) -> String {
        p2pkh_address(chain, Network::Mainnet, &[3u8; 20])
    }

    fn spend(api: &InMemoryChainApi, signed: bool) -> TxDraft {
        let funding = Utxo::new("aa".repeat(32), 0, 5000, addr(Chain::Mvc));
        api.fund(Chain::Mvc, funding.clone());
        let mut draft = TxDraft::new(Chain::Mvc, Network::Mainnet);
        draft.add_utxo_input(&funding).unwrap();
        draft.add_address_output(&addr(Chain::Mvc), 4000).unwrap();
        if signed {
            draft
                .set_input_script(0, ScriptBuilder::new().push(vec![1u8; 71]).into_script())
                .unwrap();
        }
        draft
    }

    #[test]
    fn test_fetch_filters_by_address() {
        let api = InMemoryChainApi::new(Network::Mainnet);
        api.fund(Chain::Mvc, Utxo::new("aa".repeat(32), 0, 1000, addr(Chain::Mvc)));
        api.fund(Chain::Mvc, Utxo::new("bb".repeat(32), 0, 1000, "someone-else"));
        assert_eq!(api.fetch_utxos(Chain::Mvc, &addr(Chain::Mvc)).unwrap().len(), 1);
        assert!(api.fetch_utxos(Chain::Doge, &addr(Chain::Mvc)).unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_moves_outputs() {
        let api = InMemoryChainApi::new(Network::Mainnet);
        let draft = spend(&api, true);

        let txid = api.broadcast(Chain::Mvc, &draft.raw_hex()).unwrap();
        assert_eq!(txid, draft.txid());
        let utxos = api.fetch_utxos(Chain::Mvc, &addr(Chain::Mvc)).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value, 4000);
        assert!(!utxos[0].confirmed);
    }

    #[test]
    fn test_reject_after() {
        let api = InMemoryChainApi::new(Network::Mainnet);
        let unsigned = spend(&api, false);
        assert!(api.broadcast(Chain::Mvc, &unsigned.raw_hex()).is_err());

        api.reject_after(0);
        let draft = spend(&api, true);
        assert!(api.broadcast(Chain::Mvc, &draft.raw_hex()).is_err());
        assert!(api.broadcasts().is_empty());
    }
}
