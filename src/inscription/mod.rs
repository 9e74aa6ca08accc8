//! DOGE Inscription Module
//!
//! Each record is written with a commit/reveal pair. A batch threads one
//! UTXO pool through every pair and broadcasts commit_i before reveal_i.

mod engine;
mod script;

pub use engine::*;
pub use script::*;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::pin::MetaidRecord;
use crate::types::{Chain, Receiver, SignedTx};
use crate::wallet::{Utxo, UtxoPool, UtxoReservation};
use crate::log_info;

#[derive(Debug, Clone)]
pub struct InscriptionRequest {
    pub records: Vec<MetaidRecord>,
    pub fee_rate: u64,
    pub reveal_value: Option<u64>,
    /// Paid once, on the first commit
    pub service: Option<Receiver>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InscriptionResult {
    pub commit_tx_ids: Vec<String>,
    pub reveal_tx_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commit_txs_hex: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reveal_txs_hex: Vec<String>,
    pub commit_cost: u64,
    pub reveal_cost: u64,
    pub total_cost: u64,
}

impl InscriptionResult {
    /// Inscription ids of the revealed records
    pub fn pin_ids(&self) -> Vec<String> {
        self.reveal_tx_ids.iter().map(|t| format!("{}i0", t)).collect()
    }
}

/// Built but not yet broadcast
#[derive(Debug, Clone)]
pub struct InscriptionBatch {
    pub pairs: Vec<InscriptionPair>,
    pub reservation: UtxoReservation,
    pub service_fee: u64,
}

impl InscriptionBatch {
    /// commit_0, reveal_0, commit_1, reveal_1, ...
    pub fn broadcast_order(&self) -> Vec<SignedTx> {
        self.pairs
            .iter()
            .flat_map(|p| [p.commit.clone(), p.reveal.clone()])
            .collect()
    }

    pub fn commit_cost(&self) -> u64 {
        self.pairs.iter().map(|p| p.commit_fee).sum()
    }

    pub fn reveal_cost(&self) -> u64 {
        self.pairs.iter().map(|p| p.reveal_fee).sum()
    }

    pub fn total_cost(&self) -> u64 {
        self.commit_cost() + self.reveal_cost() + self.service_fee
    }
}

/// Build every pair of the batch from `utxos` without touching the network
pub fn build_inscriptions(
    engine: &InscriptionEngine<'_>,
    request: &InscriptionRequest,
    utxos: Vec<Utxo>,
) -> EngineResult<InscriptionBatch> {
    if request.records.is_empty() {
        return Err(EngineError::invalid_input("No records to inscribe"));
    }
    let reveal_value = request.reveal_value.unwrap_or(DEFAULT_REVEAL_VALUE);
    let mut pool = UtxoPool::new(utxos);
    let mut pairs = Vec::with_capacity(request.records.len());

    for (i, record) in request.records.iter().enumerate() {
        let extra: Vec<Receiver> = match (&request.service, i) {
            (Some(service), 0) => vec![service.clone()],
            _ => Vec::new(),
        };
        pairs.push(engine.build(record, &mut pool, reveal_value, &extra)?);
    }

    let created: HashSet<&str> = pairs
        .iter()
        .flat_map(|p| [p.commit.txid.as_str(), p.reveal.txid.as_str()])
        .collect();
    let external: Vec<Utxo> = pairs
        .iter()
        .flat_map(|p| p.spent.iter())
        .filter(|u| !created.contains(u.txid.as_str()))
        .cloned()
        .collect();

    Ok(InscriptionBatch {
        reservation: UtxoReservation::new(&external),
        service_fee: request.service.as_ref().map(|s| s.amount).unwrap_or(0),
        pairs,
    })
}

pub fn inscribe_batch(ctx: &OperationContext<'_>, request: &InscriptionRequest) -> EngineResult<InscriptionResult> {
    let address = ctx.ring.address(Chain::Doge);
    let utxos = ctx.api.fetch_utxos(Chain::Doge, &address)?;
    let engine = InscriptionEngine::new(ctx.ring, request.fee_rate);
    let batch = build_inscriptions(&engine, request, utxos)?;

    let mut result = InscriptionResult {
        commit_tx_ids: batch.pairs.iter().map(|p| p.commit.txid.clone()).collect(),
        reveal_tx_ids: batch.pairs.iter().map(|p| p.reveal.txid.clone()).collect(),
        commit_txs_hex: Vec::new(),
        reveal_txs_hex: Vec::new(),
        commit_cost: batch.commit_cost(),
        reveal_cost: batch.reveal_cost(),
        total_cost: batch.total_cost(),
    };

    if ctx.no_broadcast {
        result.commit_txs_hex = batch.pairs.iter().map(|p| p.commit.raw_hex.clone()).collect();
        result.reveal_txs_hex = batch.pairs.iter().map(|p| p.reveal.raw_hex.clone()).collect();
        return Ok(result);
    }

    let accepted = ctx.submit(Chain::Doge, &address, &batch.reservation, &batch.broadcast_order())?;
    for (i, pair) in accepted.chunks(2).enumerate() {
        if let [commit, reveal] = pair {
            result.commit_tx_ids[i] = commit.clone();
            result.reveal_tx_ids[i] = reveal.clone();
        }
    }
    log_info!(
        "inscription",
        "Inscriptions broadcast",
        count = result.reveal_tx_ids.len(),
        total_cost = result.total_cost
    );
    Ok(result)
}
