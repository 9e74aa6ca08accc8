//! Chunked Upload Module
//!
//! Large files are stored by the metafile uploader and anchored on MVC by
//! the service itself. The wallet contributes a signed merge transaction and
//! two open-output pre-transactions; the service appends its data outputs
//! and broadcasts. Files up to `DIRECT_UPLOAD_MAX_SIZE` go in one request
//! with a single SINGLE|ANYONECANPAY pre-transaction instead.

mod api;
mod cosigner;
mod saga;

pub use api::*;
pub use cosigner::*;
pub use saga::*;

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::log_info;
use crate::types::Chain;
use crate::utils::sha256_hex;

/// Funds a saga from the wallet behind an operation context
pub struct ContextFunder<'c, 'a> {
    ctx: &'c OperationContext<'a>,
}

impl<'c, 'a> ContextFunder<'c, 'a> {
    pub fn new(ctx: &'c OperationContext<'a>) -> Self {
        Self { ctx }
    }
}

impl UploadFunder for ContextFunder<'_, '_> {
    fn cosign(&self, descriptor: &UploadDescriptor, estimate: &ChunkedEstimate) -> EngineResult<CoSignedUpload> {
        let address = self.ctx.ring.address(Chain::Mvc);
        if address != descriptor.address {
            return Err(EngineError::invalid_input(format!(
                "Upload was started for {} but the wallet address is {}",
                descriptor.address, address
            )));
        }
        let plan = MergePlan::from_quotes(estimate.chunk_pre_tx_fee, estimate.index_pre_tx_fee, descriptor.fee_rate);
        let utxos = self.ctx.api.fetch_utxos(Chain::Mvc, &address)?;
        CoSigner::new(self.ctx.ring, descriptor.fee_rate)
            .with_pre_tx_sighash(descriptor.pre_tx_sighash)?
            .cosign(&utxos, &plan)
    }

    fn verify(&self, descriptor: &UploadDescriptor, signed: &CoSignedUpload) -> EngineResult<()> {
        self.ctx
            .verify_reservation(Chain::Mvc, &descriptor.address, &signed.reservation())
    }
}

/// Drive `saga` to submission; `persist` sees every intermediate state
pub fn upload_chunked(
    ctx: &OperationContext<'_>,
    api: &dyn MetafileApi,
    saga: &mut UploadSaga,
    content: &[u8],
    persist: &mut dyn FnMut(&UploadSaga) -> EngineResult<()>,
) -> EngineResult<TaskReceipt> {
    let funder = ContextFunder::new(ctx);
    saga.run(api, content, &funder, persist)
}

/// Build only the co-signed transactions, for callers that submit them elsewhere
pub fn cosign_upload(
    ctx: &OperationContext<'_>,
    estimate: &ChunkedEstimate,
    fee_rate: u64,
    pre_tx_sighash: u32,
) -> EngineResult<CoSignedUpload> {
    let address = ctx.ring.address(Chain::Mvc);
    let plan = MergePlan::from_quotes(estimate.chunk_pre_tx_fee, estimate.index_pre_tx_fee, fee_rate);
    let utxos = ctx.api.fetch_utxos(Chain::Mvc, &address)?;
    CoSigner::new(ctx.ring, fee_rate)
        .with_pre_tx_sighash(pre_tx_sighash)?
        .cosign(&utxos, &plan)
}

/// Upload a small file in one request, funded by the largest wallet output
pub fn upload_direct(
    ctx: &OperationContext<'_>,
    api: &dyn MetafileApi,
    file_name: &str,
    content: &[u8],
    path: &str,
    content_type: &str,
    fee_rate: u64,
) -> EngineResult<DirectUploadReceipt> {
    let size = content.len() as u64;
    if !fits_direct_upload(size) {
        return Err(EngineError::invalid_input(format!(
            "Direct upload takes 1 to {} bytes, got {}",
            DIRECT_UPLOAD_MAX_SIZE, size
        )));
    }
    let address = ctx.ring.address(Chain::Mvc);
    let utxos = ctx.api.fetch_utxos(Chain::Mvc, &address)?;
    let direct = CoSigner::new(ctx.ring, fee_rate).build_direct_pre_tx(&utxos)?;
    ctx.verify_reservation(Chain::Mvc, &address, &direct.reservation())?;

    let request = DirectUploadRequest {
        file_name: file_name.to_string(),
        content: content.to_vec(),
        path: path.to_string(),
        operation: "create".to_string(),
        content_type: content_type.to_string(),
        meta_id: sha256_hex(address.as_bytes()),
        address,
        fee_rate: fee_rate.max(1),
        pre_tx_hex: direct.pre_tx.raw_hex,
        total_input_amount: direct.funding.value,
    };
    let receipt = api.direct_upload(&request)?;
    log_info!(
        "chunked",
        "Direct upload accepted",
        txid = receipt.tx_id,
        pin_id = receipt.pin_id,
        size = size
    );
    Ok(receipt)
}
