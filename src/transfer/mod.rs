//! Transfer Module
//!
//! Native payments on MVC and DOGE plus token transfers through a
//! `TokenTransferBackend`. Tasks in one request are chained: the first task
//! is funded from a fresh scan, every later task spends only the change of
//! the task before it, so the whole chain is built without refetching.

mod engine;
mod token;

pub use engine::*;
pub use token::*;

use serde::{Deserialize, Serialize};

use crate::api::resolve_fee_rate;
use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::fees::{DEFAULT_DOGE_TRANSFER_FEE_RATE, DEFAULT_MVC_FEE_RATE};
use crate::types::{Chain, Receiver, SignedTx};
use crate::wallet::{DerivedKey, Utxo, UtxoReservation};
use crate::log_info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub receivers: Vec<Receiver>,
    #[serde(flatten)]
    pub token: Option<TokenRef>,
}

impl TransferTask {
    pub fn native(receivers: Vec<Receiver>) -> Self {
        Self { receivers, token: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub chain: Chain,
    pub tasks: Vec<TransferTask>,
    #[serde(default)]
    pub fee_rate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    /// 1-based task number
    pub id: usize,
    pub txid: String,
    pub tx_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_check_txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_check_tx_hex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub results: Vec<TransferOutcome>,
    /// Broadcast order; a token task contributes its route check first
    pub txids: Vec<String>,
    pub broadcasted: bool,
    pub total_cost: u64,
}

/// Every task built and signed, nothing sent yet
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub outcomes: Vec<TransferOutcome>,
    pub txs: Vec<SignedTx>,
    pub reservation: UtxoReservation,
}

impl TransferPlan {
    pub fn total_cost(&self) -> u64 {
        self.txs.iter().map(|t| t.cost).sum()
    }
}

/// Validate every task up front; nothing is fetched for a request that will fail
pub fn validate_tasks(engine: &TransferEngine<'_>, tasks: &[TransferTask]) -> EngineResult<()> {
    if tasks.is_empty() {
        return Err(EngineError::invalid_input("No transfer tasks"));
    }
    for task in tasks {
        if task.token.is_some() && engine.chain() != Chain::Mvc {
            return Err(EngineError::unsupported_chain(format!(
                "Token transfers are only available on mvc, not {}",
                engine.chain()
            )));
        }
        engine.validate(&task.receivers)?;
    }
    Ok(())
}

/// Build the chained tasks starting from `utxos`
pub fn plan_transfers(
    engine: &TransferEngine<'_>,
    tasks: &[TransferTask],
    utxos: Vec<Utxo>,
    backend: Option<&dyn TokenTransferBackend>,
    sender: &DerivedKey,
) -> EngineResult<TransferPlan> {
    validate_tasks(engine, tasks)?;
    let mut plan = TransferPlan::default();
    let mut reserved: Vec<Utxo> = Vec::new();
    let mut previous_change: Option<Utxo> = None;

    for (i, task) in tasks.iter().enumerate() {
        let funding: Vec<Utxo> = match (i, previous_change.take()) {
            (0, _) => utxos.clone(),
            (_, Some(change)) => vec![change],
            (_, None) => {
                return Err(EngineError::insufficient_balance(format!(
                    "Task {} has no change from task {} to spend",
                    i + 1,
                    i
                )))
            }
        };

        match &task.token {
            None => {
                let built = engine.build(&task.receivers, &funding)?;
                if i == 0 {
                    reserved.extend(built.spent.iter().cloned());
                }
                plan.outcomes.push(TransferOutcome {
                    id: i + 1,
                    txid: built.tx.txid.clone(),
                    tx_hex: built.tx.raw_hex.clone(),
                    route_check_txid: None,
                    route_check_tx_hex: None,
                });
                plan.txs.push(built.tx);
                previous_change = built.change;
            }
            Some(token) => {
                let backend = backend.ok_or_else(|| {
                    EngineError::invalid_input("Token transfer requested but no token backend is configured")
                })?;
                // The first token task lets the backend pick its own inputs
                let funding: &[Utxo] = if i == 0 { &[] } else { &funding };
                let built = backend.build_transfer(token, &task.receivers, sender, funding, engine.fee_rate())?;
                plan.outcomes.push(TransferOutcome {
                    id: i + 1,
                    txid: built.transfer.txid.clone(),
                    tx_hex: built.transfer.raw_hex.clone(),
                    route_check_txid: Some(built.route_check.txid.clone()),
                    route_check_tx_hex: Some(built.route_check.raw_hex.clone()),
                });
                plan.txs.push(built.route_check);
                plan.txs.push(built.transfer);
                previous_change = built.change;
            }
        }
    }

    plan.reservation = UtxoReservation::new(&reserved);
    Ok(plan)
}

pub fn run_transfers(
    ctx: &OperationContext<'_>,
    request: &TransferRequest,
    backend: Option<&dyn TokenTransferBackend>,
) -> EngineResult<TransferResult> {
    let chain = request.chain;
    let fee_rate = request.fee_rate.unwrap_or_else(|| match chain {
        Chain::Mvc => DEFAULT_MVC_FEE_RATE,
        Chain::Doge => resolve_fee_rate(ctx.api, Chain::Doge, Some("Avg"), DEFAULT_DOGE_TRANSFER_FEE_RATE),
    });
    let engine = TransferEngine::new(ctx.ring, chain, fee_rate);
    validate_tasks(&engine, &request.tasks)?;

    let sender = ctx.ring.primary(chain);
    let needs_scan = request.tasks.first().map(|t| t.token.is_none()).unwrap_or(false);
    let utxos = if needs_scan {
        ctx.api.fetch_utxos(chain, &sender.address)?
    } else {
        Vec::new()
    };
    if needs_scan && utxos.is_empty() {
        return Err(EngineError::insufficient_balance("No UTXOs available"));
    }

    let plan = plan_transfers(&engine, &request.tasks, utxos, backend, &sender)?;
    let total_cost = plan.total_cost();

    if ctx.no_broadcast {
        return Ok(TransferResult {
            txids: plan.txs.iter().map(|t| t.txid.clone()).collect(),
            results: plan.outcomes,
            broadcasted: false,
            total_cost,
        });
    }

    let accepted = ctx.submit(chain, &sender.address, &plan.reservation, &plan.txs)?;
    log_info!("transfer", "Transfers broadcast", chain = chain, count = accepted.len(), total_cost = total_cost);
    Ok(TransferResult {
        results: plan.outcomes,
        txids: accepted,
        broadcasted: true,
        total_cost,
    })
}
