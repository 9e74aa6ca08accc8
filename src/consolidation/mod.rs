//! Consolidation Module
//!
//! Sweeps every non-dust MVC output of an address into one output at the
//! main address. The address is locked through the context's registry for
//! the whole attempt, the scanned outputs are reserved, and the reservation
//! is re-checked right before broadcast.

mod registry;

pub use registry::*;

use serde::{Deserialize, Serialize};

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::fees::{FeeSchedule, DEFAULT_MVC_FEE_RATE, MVC_DUST_LIMIT, P2PKH_OUTPUT_SIZE};
use crate::script::p2pkh_hash;
use crate::tx::{sign_p2pkh_input, verify_p2pkh_input, TxDraft, SIGHASH_ALL_FORKID};
use crate::types::{Chain, SignedTx};
use crate::wallet::{is_valid_address, p2pkh_address, total_value, KeyNotFoundPolicy, Utxo, UtxoReservation};
use crate::{log_error, log_info, log_warn};

/// Default allowed drift between scanned and reported balance
pub const DEFAULT_BALANCE_TOLERANCE: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationRequest {
    /// Sweep destination; the wallet's own address when absent
    #[serde(default)]
    pub main_address: Option<String>,
    #[serde(default)]
    pub fee_rate: Option<u64>,
    pub balance_tolerance: f64,
    pub key_policy: KeyNotFoundPolicy,
}

impl Default for ConsolidationRequest {
    fn default() -> Self {
        Self {
            main_address: None,
            fee_rate: None,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            key_policy: KeyNotFoundPolicy::FallbackToPrimary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    pub message: String,
    pub state: ConsolidationState,
    /// Signed sweep, returned instead of broadcasting on a dry run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl ConsolidationResult {
    fn failed(error: &EngineError, state: ConsolidationState) -> Self {
        Self {
            success: false,
            txid: None,
            message: error.message.clone(),
            state,
            tx_hex: None,
            error_code: Some(error.code),
        }
    }
}

/// Outputs worth sweeping
pub fn sweepable(utxos: Vec<Utxo>) -> Vec<Utxo> {
    utxos.into_iter().filter(|u| u.value >= MVC_DUST_LIMIT).collect()
}

/// Fail when `current` drifts from `scanned` by more than `tolerance` (a fraction)
pub fn check_balance_tolerance(scanned: u64, current: u64, tolerance: f64) -> EngineResult<()> {
    if scanned == 0 {
        return Err(EngineError::invalid_input("Scanned balance is zero"));
    }
    let deviation = scanned.abs_diff(current) as f64 / scanned as f64;
    if deviation > tolerance {
        return Err(EngineError::balance_tolerance_exceeded(format!(
            "Balance moved from {} to {} ({:.2}%, limit {:.0}%); aborting to protect funds",
            scanned,
            current,
            deviation * 100.0,
            tolerance * 100.0
        )));
    }
    Ok(())
}

/// Build and sign the sweep of `utxos` to `main_address`
pub fn build_sweep(
    ctx: &OperationContext<'_>,
    utxos: &[Utxo],
    main_address: &str,
    fee_rate: u64,
    policy: KeyNotFoundPolicy,
) -> EngineResult<SignedTx> {
    let schedule = FeeSchedule::mvc();
    let network = ctx.network();
    let mut draft = TxDraft::new(Chain::Mvc, network);
    for utxo in utxos {
        draft.add_utxo_input(utxo)?;
    }

    let total = total_value(utxos);
    let fee = schedule.fee_for_size(draft.estimated_signed_size() + P2PKH_OUTPUT_SIZE, fee_rate);
    let sweep = total.saturating_sub(fee);
    if sweep < MVC_DUST_LIMIT {
        return Err(EngineError::insufficient_balance(format!(
            "Sweeping {} sats would leave {} after a {} sat fee",
            total, sweep, fee
        )));
    }
    draft.add_address_output(main_address, sweep)?;

    for input in 0..draft.input_count() {
        let script = draft
            .prevouts()
            .get(input)
            .map(|p| p.script_pubkey.clone())
            .ok_or_else(|| EngineError::internal(format!("No input #{}", input)))?;
        let address = p2pkh_address(Chain::Mvc, network, &p2pkh_hash(script.as_bytes())?);
        let key = ctx.ring.key_for_address_with_policy(Chain::Mvc, &address, policy)?;
        sign_p2pkh_input(ctx.ring.secp(), &mut draft, input, &key, SIGHASH_ALL_FORKID)?;
    }
    // A fallback key that does not own the output is caught here, not by the node
    for input in 0..draft.input_count() {
        verify_p2pkh_input(ctx.ring.secp(), &draft, input)?;
    }

    Ok(SignedTx {
        txid: draft.txid(),
        raw_hex: draft.raw_hex(),
        cost: fee,
    })
}

/// Run one consolidation. Failures come back as an unsuccessful result.
pub fn consolidate(ctx: &OperationContext<'_>, request: &ConsolidationRequest) -> ConsolidationResult {
    let address = ctx.ring.address(Chain::Mvc);
    let main_address = request.main_address.clone().unwrap_or_else(|| address.clone());
    if !is_valid_address(Chain::Mvc, ctx.network(), &main_address) {
        let err = EngineError::invalid_address(format!("{} is not an mvc address", main_address));
        return ConsolidationResult::failed(&err, ctx.registry.state(&address));
    }

    let guard = match ctx.registry.begin(&address, &main_address) {
        Ok(guard) => guard,
        Err(err) => return ConsolidationResult::failed(&err, ctx.registry.state(&address)),
    };

    match run(ctx, request, &address, &main_address) {
        Ok(Outcome::DryRun(tx)) => {
            guard.abandon();
            ConsolidationResult {
                success: true,
                txid: Some(tx.txid),
                message: "Consolidation signed, not broadcast".into(),
                state: ConsolidationState::Idle,
                tx_hex: Some(tx.raw_hex),
                error_code: None,
            }
        }
        Ok(Outcome::Broadcast(txid)) => {
            guard.pending(&txid);
            log_info!("consolidation", "Sweep broadcast", address = address, txid = txid);
            ConsolidationResult {
                success: true,
                message: format!(
                    "Consolidation broadcast as {}; it completes after one confirmation",
                    txid
                ),
                txid: Some(txid),
                state: ConsolidationState::ConsolidatingPending,
                tx_hex: None,
                error_code: None,
            }
        }
        Err(err) if err.is_clean_failure() => {
            // Nothing reached the network
            guard.abandon();
            log_warn!("consolidation", "Consolidation aborted", address = address, error = err.message);
            ConsolidationResult::failed(&err, ConsolidationState::Idle)
        }
        Err(err) => {
            guard.fail();
            log_error!("consolidation", "Consolidation failed", address = address, error = err.message);
            ConsolidationResult::failed(&err, ConsolidationState::Failed)
        }
    }
}

enum Outcome {
    DryRun(SignedTx),
    Broadcast(String),
}

fn run(
    ctx: &OperationContext<'_>,
    request: &ConsolidationRequest,
    address: &str,
    main_address: &str,
) -> EngineResult<Outcome> {
    let utxos = sweepable(ctx.api.fetch_utxos(Chain::Mvc, address)?);
    if utxos.is_empty() {
        return Err(EngineError::insufficient_balance(
            "No UTXOs to consolidate (all are dust or the balance is zero)",
        ));
    }
    let reservation = UtxoReservation::new(&utxos);
    let scanned = reservation.value();

    let current = ctx.api.fetch_balance(Chain::Mvc, address)?;
    check_balance_tolerance(scanned, current, request.balance_tolerance)?;

    let fee_rate = request.fee_rate.unwrap_or(DEFAULT_MVC_FEE_RATE);
    let signed = build_sweep(ctx, &utxos, main_address, fee_rate, request.key_policy)?;
    if ctx.no_broadcast {
        return Ok(Outcome::DryRun(signed));
    }

    let txids = ctx.submit(Chain::Mvc, address, &reservation, std::slice::from_ref(&signed))?;
    Ok(Outcome::Broadcast(txids.into_iter().next().unwrap_or(signed.txid)))
}
