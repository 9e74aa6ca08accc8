//! API Module
//!
//! The engine talks to the chains only through `ChainApi`: UTXO scans, fee
//! tiers and raw-transaction broadcast. `MetaletApi` is the production
//! client; `InMemoryChainApi` backs tests and dry runs.

mod memory;
mod metalet;

pub use memory::*;
pub use metalet::*;

use crate::error::EngineResult;
use crate::fees::{pick_fee_rate, FeeRateTier};
use crate::types::Chain;
use crate::wallet::{total_value, Utxo};
use crate::log_warn;

/// Chain data provider
pub trait ChainApi: Send + Sync {
    /// Spendable outputs of `address`, dust already filtered
    fn fetch_utxos(&self, chain: Chain, address: &str) -> EngineResult<Vec<Utxo>>;

    /// Balance as the provider reports it
    fn fetch_balance(&self, chain: Chain, address: &str) -> EngineResult<u64> {
        Ok(total_value(&self.fetch_utxos(chain, address)?))
    }

    fn fetch_fee_rates(&self, chain: Chain) -> EngineResult<Vec<FeeRateTier>>;

    /// Submit a raw transaction, returning the txid the network assigned
    fn broadcast(&self, chain: Chain, raw_hex: &str) -> EngineResult<String>;
}

/// Fee rate from the provider's tiers, or `fallback` when the provider fails
pub fn resolve_fee_rate(api: &dyn ChainApi, chain: Chain, preferred: Option<&str>, fallback: u64) -> u64 {
    match api.fetch_fee_rates(chain) {
        Ok(tiers) => pick_fee_rate(&tiers, preferred, fallback),
        Err(e) => {
            log_warn!("api", "Fee summary unavailable, using default", chain = chain, error = e.message);
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    struct Failing;

    impl ChainApi for Failing {
        fn fetch_utxos(&self, _: Chain, _: &str) -> EngineResult<Vec<Utxo>> {
            Ok(vec![Utxo::new("aa".repeat(32), 0, 700, "x"), Utxo::new("bb".repeat(32), 1, 300, "x")])
        }
        fn fetch_fee_rates(&self, _: Chain) -> EngineResult<Vec<FeeRateTier>> {
            Err(EngineError::network("down"))
        }
        fn broadcast(&self, _: Chain, _: &str) -> EngineResult<String> {
            Err(EngineError::network("down"))
        }
    }

    #[test]
    fn test_default_balance_sums_utxos() {
        assert_eq!(Failing.fetch_balance(Chain::Mvc, "x").unwrap(), 1000);
    }

    #[test]
    fn test_fee_rate_fallback() {
        assert_eq!(resolve_fee_rate(&Failing, Chain::Doge, Some("Avg"), 200_000), 200_000);
    }
}
