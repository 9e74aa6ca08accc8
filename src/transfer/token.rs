//! Fungible-token transfers
//!
//! Token contracts are built by an external backend. The engine only hands
//! it funding outputs and the signing key, then chains and broadcasts what
//! comes back.

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{Receiver, SignedTx};
use crate::wallet::{DerivedKey, Utxo};

/// Identifies a fungible-token contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub genesis: String,
    pub codehash: String,
}

/// What a backend returns for one token transfer
#[derive(Debug, Clone)]
pub struct TokenTransfer {
    /// Route-check transaction, broadcast first
    pub route_check: SignedTx,
    pub transfer: SignedTx,
    /// Native change of the transfer transaction
    pub change: Option<Utxo>,
}

pub trait TokenTransferBackend: Send + Sync {
    /// Build and sign a token transfer. `funding` is empty when the backend
    /// may choose its own native inputs.
    fn build_transfer(
        &self,
        token: &TokenRef,
        receivers: &[Receiver],
        sender: &DerivedKey,
        funding: &[Utxo],
        fee_rate: u64,
    ) -> EngineResult<TokenTransfer>;
}
