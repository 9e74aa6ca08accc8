//! Pin Module
//!
//! MetaID records and their MVC encoding. `create_pins` is the batch entry
//! point for both chains: MVC records become data-carrier transactions,
//! DOGE records are inscribed through commit/reveal.

mod composer;
mod record;

pub use composer::*;
pub use record::*;

use serde::{Deserialize, Serialize};

use crate::api::resolve_fee_rate;
use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::fees::{DEFAULT_DOGE_INSCRIPTION_FEE_RATE, DEFAULT_MVC_FEE_RATE};
use crate::inscription::{inscribe_batch, InscriptionRequest, InscriptionResult};
use crate::types::Chain;
use crate::log_info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePinRequest {
    pub chain: Chain,
    pub data_list: Vec<PinDetail>,
    #[serde(default)]
    pub fee_rate: Option<u64>,
    #[serde(default)]
    pub no_broadcast: bool,
    /// DOGE only: value of each reveal output (1,000,000 when absent)
    #[serde(default)]
    pub reveal_value: Option<u64>,
}

/// Outcome of an MVC pin batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinResult {
    pub txids: Vec<String>,
    pub pin_ids: Vec<String>,
    /// Present when the batch was not broadcast
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tx_hex_list: Vec<String>,
    pub total_cost: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreatePinResult {
    Mvc(PinResult),
    Doge(InscriptionResult),
}

impl CreatePinResult {
    pub fn total_cost(&self) -> u64 {
        match self {
            CreatePinResult::Mvc(r) => r.total_cost,
            CreatePinResult::Doge(r) => r.total_cost,
        }
    }
}

/// Normalize every record; fails on the first invalid one
pub fn normalize_details(details: &[PinDetail]) -> EngineResult<Vec<PinDetail>> {
    if details.is_empty() {
        return Err(EngineError::invalid_input("No records to pin"));
    }
    details
        .iter()
        .map(|d| {
            Ok(PinDetail {
                metaid_data: d.metaid_data.normalized()?,
                options: d.options.clone(),
            })
        })
        .collect()
}

pub fn create_pins(ctx: &OperationContext<'_>, request: &CreatePinRequest) -> EngineResult<CreatePinResult> {
    let details = normalize_details(&request.data_list)?;
    match request.chain {
        Chain::Mvc => create_pins_mvc(ctx, &details, request.fee_rate).map(CreatePinResult::Mvc),
        Chain::Doge => {
            let fee_rate = request.fee_rate.unwrap_or_else(|| {
                resolve_fee_rate(ctx.api, Chain::Doge, None, DEFAULT_DOGE_INSCRIPTION_FEE_RATE)
            });
            check_doge_options(&details)?;
            let service = details.iter().find_map(|d| d.options.service.clone());
            let records = details.into_iter().map(|d| d.metaid_data).collect();
            let inscription = InscriptionRequest {
                records,
                fee_rate,
                reveal_value: request.reveal_value,
                service,
            };
            inscribe_batch(ctx, &inscription).map(CreatePinResult::Doge)
        }
    }
}

/// Inscriptions carry no extra outputs and cannot point at each other
fn check_doge_options(details: &[PinDetail]) -> EngineResult<()> {
    for (i, detail) in details.iter().enumerate() {
        if !detail.options.refs.is_empty() {
            return Err(EngineError::invalid_input(format!(
                "Record #{} has refs, which are only resolved on MVC",
                i
            )));
        }
        if !detail.options.outputs.is_empty() {
            return Err(EngineError::invalid_input(format!(
                "Record #{} has extra outputs, which DOGE inscriptions do not carry",
                i
            )));
        }
    }
    Ok(())
}

fn create_pins_mvc(ctx: &OperationContext<'_>, details: &[PinDetail], fee_rate: Option<u64>) -> EngineResult<PinResult> {
    let address = ctx.ring.address(Chain::Mvc);
    let fee_rate = fee_rate.unwrap_or_else(|| resolve_fee_rate(ctx.api, Chain::Mvc, None, DEFAULT_MVC_FEE_RATE));
    let utxos = ctx.api.fetch_utxos(Chain::Mvc, &address)?;

    let composer = PinComposer::new(ctx.ring, fee_rate);
    let batch = composer.compose(details)?;
    let funded = composer.fund(batch, utxos)?;
    let total_cost = funded.total_cost();

    if ctx.no_broadcast {
        return Ok(PinResult {
            pin_ids: funded.txs.iter().map(|t| pin_id(&t.txid)).collect(),
            txids: funded.txs.iter().map(|t| t.txid.clone()).collect(),
            tx_hex_list: funded.txs.into_iter().map(|t| t.raw_hex).collect(),
            total_cost,
        });
    }

    let txids = ctx.submit(Chain::Mvc, &address, &funded.reservation, &funded.txs)?;
    log_info!("pin", "Pins broadcast", count = txids.len(), total_cost = total_cost);
    Ok(PinResult {
        pin_ids: txids.iter().map(|t| pin_id(t)).collect(),
        txids,
        tx_hex_list: Vec::new(),
        total_cost,
    })
}
