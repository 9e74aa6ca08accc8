//! Transaction Broadcaster
//!
//! Submits signed transactions in dependency order. Transport failures are
//! retried; a node rejection is not. Once one transaction of a batch has
//! been accepted, any later failure carries the accepted txids.

use std::thread;
use std::time::Duration;

use crate::api::ChainApi;
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::types::{Chain, SignedTx};
use crate::{log_info, log_warn};

/// Broadcast configuration
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_millis(800),
        }
    }
}

impl BroadcastConfig {
    /// Single attempt, no sleeping
    pub fn immediate() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Broadcast one transaction, retrying transport errors
pub fn broadcast_one(api: &dyn ChainApi, chain: Chain, tx: &SignedTx, config: &BroadcastConfig) -> EngineResult<String> {
    let mut attempt = 0;
    loop {
        match api.broadcast(chain, &tx.raw_hex) {
            Ok(reported) => {
                // Later transactions in a batch spend the locally computed id
                if !reported.eq_ignore_ascii_case(&tx.txid) {
                    log_warn!(
                        "broadcast",
                        "Provider reported a different txid; keeping the local one",
                        txid = tx.txid,
                        reported_txid = reported
                    );
                }
                log_info!("broadcast", "Transaction accepted", chain = chain, txid = tx.txid);
                return Ok(tx.txid.clone());
            }
            Err(e) if e.code == ErrorCode::NetworkError && attempt < config.retries => {
                attempt += 1;
                log_warn!("broadcast", "Broadcast attempt failed, retrying", attempt = attempt, error = e.message);
                thread::sleep(config.retry_delay * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Broadcast `txs` in order, stopping at the first failure
pub fn broadcast_sequence(
    api: &dyn ChainApi,
    chain: Chain,
    txs: &[SignedTx],
    config: &BroadcastConfig,
) -> EngineResult<Vec<String>> {
    let mut accepted = Vec::with_capacity(txs.len());
    for (i, tx) in txs.iter().enumerate() {
        match broadcast_one(api, chain, tx, config) {
            Ok(txid) => accepted.push(txid),
            Err(e) => {
                let failed = EngineError::new(e.code, format!("Transaction {} of {}: {}", i + 1, txs.len(), e.message));
                let failed = match e.details {
                    Some(details) => failed.with_details(details),
                    None => failed,
                };
                return Err(failed.with_broadcasted(accepted));
            }
        }
    }
    Ok(accepted)
}
