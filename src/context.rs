//! Operation context
//!
//! Everything one engine operation needs, passed explicitly: the chain
//! provider, the wallet's key ring, broadcast policy and the consolidation
//! registry that serializes sweeps per address.

use crate::api::ChainApi;
use crate::consolidation::ConsolidationRegistry;
use crate::error::EngineResult;
use crate::tx::{broadcast_sequence, BroadcastConfig};
use crate::types::{Chain, Network, SignedTx};
use crate::wallet::{KeyRing, UtxoReservation};
use crate::log_debug;

pub struct OperationContext<'a> {
    pub api: &'a dyn ChainApi,
    pub ring: &'a KeyRing,
    pub registry: &'a ConsolidationRegistry,
    pub broadcast: BroadcastConfig,
    /// Build and sign only; return raw hex to the caller
    pub no_broadcast: bool,
}

impl<'a> OperationContext<'a> {
    pub fn new(api: &'a dyn ChainApi, ring: &'a KeyRing, registry: &'a ConsolidationRegistry) -> Self {
        Self {
            api,
            ring,
            registry,
            broadcast: BroadcastConfig::default(),
            no_broadcast: false,
        }
    }

    pub fn with_broadcast(mut self, broadcast: BroadcastConfig) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn dry_run(mut self, no_broadcast: bool) -> Self {
        self.no_broadcast = no_broadcast;
        self
    }

    pub fn network(&self) -> Network {
        self.ring.network()
    }

    /// Re-scan `address` and fail if any reserved output has gone
    pub fn verify_reservation(&self, chain: Chain, address: &str, reservation: &UtxoReservation) -> EngineResult<()> {
        if reservation.is_empty() {
            return Ok(());
        }
        let fresh = self.api.fetch_utxos(chain, address)?;
        reservation.verify_still_unspent(&fresh)?;
        log_debug!("context", "Reservation still holds", chain = chain, outputs = reservation.len());
        Ok(())
    }

    /// Verify the reservation, then broadcast in order
    pub fn submit(
        &self,
        chain: Chain,
        address: &str,
        reservation: &UtxoReservation,
        txs: &[SignedTx],
    ) -> EngineResult<Vec<String>> {
        self.verify_reservation(chain, address, reservation)?;
        broadcast_sequence(self.api, chain, txs, &self.broadcast)
    }
}
