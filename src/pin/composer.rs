//! MVC pin composer
//!
//! Builds one draft per record (anchor output, data carrier, optional
//! service and extra outputs), records each draft's prospective id, then
//! funds the batch in order. Funding adds inputs and change, which changes
//! ids; before a draft is signed every earlier prospective id it mentions,
//! in its data carrier or its inputs, is rewritten to the final id.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::fees::FeeSchedule;
use crate::script::{data_carrier_script, p2pkh_hash, parse_data_carrier};
use crate::tx::{sign_p2pkh_input, TxDraft, SIGHASH_ALL_FORKID};
use crate::types::{Chain, SignedTx};
use crate::wallet::{p2pkh_address, DerivedKey, KeyRing, SelectionTarget, Utxo, UtxoPool, UtxoReservation, UtxoSelector};
use crate::log_debug;

use super::record::{replace_refs, PinDetail};

/// Value of the output that anchors the pin to the wallet
pub const ANCHOR_VALUE: u64 = 1;

/// Drafts awaiting funding, in dependency order
#[derive(Debug, Clone)]
pub struct ComposedBatch {
    pub drafts: Vec<TxDraft>,
    pub prospective_ids: Vec<String>,
    /// Per draft: whether the body push must be left byte-exact
    binary_body: Vec<bool>,
}

impl ComposedBatch {
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }
}

/// Signed batch plus everything needed to broadcast it safely
#[derive(Debug, Clone)]
pub struct FundedBatch {
    pub txs: Vec<SignedTx>,
    /// Prospective id → final id, in draft order
    pub id_map: Vec<(String, String)>,
    /// Wallet outputs spent by the batch, to re-check before broadcast
    pub reservation: UtxoReservation,
}

impl FundedBatch {
    pub fn total_cost(&self) -> u64 {
        self.txs.iter().map(|t| t.cost).sum()
    }
}

pub struct PinComposer<'a> {
    ring: &'a KeyRing,
    fee_rate: u64,
    selector: UtxoSelector,
}

impl<'a> PinComposer<'a> {
    pub fn new(ring: &'a KeyRing, fee_rate: u64) -> Self {
        Self {
            ring,
            fee_rate: fee_rate.max(1),
            selector: UtxoSelector::new(FeeSchedule::mvc()),
        }
    }

    /// Build unfunded drafts; records are expected to be normalized
    pub fn compose(&self, details: &[PinDetail]) -> EngineResult<ComposedBatch> {
        let network = self.ring.network();
        let address = self.ring.address(Chain::Mvc);
        let mut batch = ComposedBatch {
            drafts: Vec::with_capacity(details.len()),
            prospective_ids: Vec::with_capacity(details.len()),
            binary_body: Vec::with_capacity(details.len()),
        };

        for detail in details {
            let mut record = detail.metaid_data.clone();
            if !record.is_binary() && !detail.options.refs.is_empty() {
                if let Some(ref body) = record.body {
                    record.body = Some(replace_refs(body, &detail.options.refs, &batch.prospective_ids));
                }
            }

            let mut draft = TxDraft::new(Chain::Mvc, network);
            draft.add_address_output(&address, ANCHOR_VALUE)?;
            draft.add_data_carrier(&record.data_carrier_fields()?);
            if let Some(ref service) = detail.options.service {
                draft.add_address_output(&service.address, service.amount)?;
            }
            for output in &detail.options.outputs {
                draft.add_address_output(&output.address, output.amount)?;
            }

            batch.prospective_ids.push(draft.txid());
            batch.binary_body.push(record.is_binary());
            batch.drafts.push(draft);
        }
        Ok(batch)
    }

    /// Fund, sign and finalize every draft in order
    pub fn fund(&self, batch: ComposedBatch, utxos: Vec<Utxo>) -> EngineResult<FundedBatch> {
        let primary = self.ring.primary(Chain::Mvc);
        let schedule = *self.selector.schedule();
        let mut pool = UtxoPool::new(utxos);
        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut id_map = Vec::with_capacity(batch.len());
        let mut reserved: Vec<Utxo> = Vec::new();
        let mut txs = Vec::with_capacity(batch.len());

        for (i, mut draft) in batch.drafts.into_iter().enumerate() {
            let prospective = batch.prospective_ids[i].clone();
            let binary_body = batch.binary_body.get(i).copied().unwrap_or(false);

            rewrite_data_carrier(&mut draft, &renamed, binary_body)?;
            let existing_inputs = draft.input_count();
            for input in 0..existing_inputs {
                if let Some(old) = draft.input_txid(input) {
                    if let Some(new) = renamed.get(&old) {
                        draft.set_input_txid(input, new)?;
                    }
                }
            }

            let difference =
                draft.output_total() as i64 - draft.input_total() as i64 + (self.fee_rate * draft.size()) as i64;
            let selection = self
                .selector
                .select(pool.available(), &SelectionTarget::new(difference, self.fee_rate))?;
            pool.take(&selection.chosen)?;
            for utxo in &selection.chosen {
                draft.add_utxo_input(utxo)?;
            }
            reserved.extend(selection.chosen.iter().cloned());

            let change = draft.append_change(&primary.address, self.fee_rate, &schedule)?;
            let change_index = draft.output_count().saturating_sub(1);

            for input in 0..existing_inputs {
                let key = self.key_for_input(&draft, input)?;
                sign_p2pkh_input(self.ring.secp(), &mut draft, input, &key, SIGHASH_ALL_FORKID)?;
            }
            for input in existing_inputs..draft.input_count() {
                sign_p2pkh_input(self.ring.secp(), &mut draft, input, &primary, SIGHASH_ALL_FORKID)?;
            }

            let txid = draft.txid();
            log_debug!("pin", "Draft funded", index = i, prospective = prospective, txid = txid);
            if let Some(value) = change {
                pool.add_change(Utxo::unconfirmed(txid.clone(), change_index as u32, value, primary.address.clone()));
            }

            let cost = draft.input_total().saturating_sub(draft.value_to(&primary.script_pubkey()));
            renamed.insert(prospective.clone(), txid.clone());
            id_map.push((prospective, txid.clone()));
            txs.push(SignedTx {
                txid,
                raw_hex: draft.raw_hex(),
                cost,
            });
        }

        // Change outputs created inside the batch are not wallet UTXOs yet
        let created: Vec<&str> = txs.iter().map(|t| t.txid.as_str()).collect();
        reserved.retain(|u| !created.contains(&u.txid.as_str()));

        Ok(FundedBatch {
            txs,
            id_map,
            reservation: UtxoReservation::new(&reserved),
        })
    }

    fn key_for_input(&self, draft: &TxDraft, input: usize) -> EngineResult<DerivedKey> {
        let prevout = draft
            .prevouts()
            .get(input)
            .ok_or_else(|| EngineError::internal(format!("No input #{}", input)))?;
        let hash = p2pkh_hash(prevout.script_pubkey.as_bytes())?;
        let address = p2pkh_address(Chain::Mvc, self.ring.network(), &hash);
        self.ring.key_for_address(Chain::Mvc, &address)
    }
}

/// Swap stale ids inside the first data carrier's text pushes
fn rewrite_data_carrier(draft: &mut TxDraft, renamed: &HashMap<String, String>, binary_body: bool) -> EngineResult<()> {
    if renamed.is_empty() {
        return Ok(());
    }
    let found = (0..draft.output_count()).find_map(|i| {
        draft
            .output_script(i)
            .and_then(|s| parse_data_carrier(s.as_bytes()))
            .map(|fields| (i, fields))
    });
    let (index, mut fields) = match found {
        Some(found) => found,
        None => return Ok(()),
    };

    let body_index = fields.len().saturating_sub(1);
    let mut changed = false;
    for (i, field) in fields.iter_mut().enumerate() {
        if binary_body && i == body_index {
            continue;
        }
        let mut text = match String::from_utf8(field.clone()) {
            Ok(text) => text,
            Err(_) => continue,
        };
        for (old, new) in renamed {
            if text.contains(old.as_str()) {
                text = text.replace(old.as_str(), new);
                changed = true;
            }
        }
        *field = text.into_bytes();
    }

    if changed {
        draft.set_output_script(index, data_carrier_script(&fields))?;
    }
    Ok(())
}
