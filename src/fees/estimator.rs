//! Fee Estimator
//!
//! MVC charges `feeb` satoshis per byte; DOGE quotes a rate per kilobyte and
//! rounds up. Both are expressed through one `FeeSchedule`.

use serde::{Deserialize, Serialize};

use crate::types::Chain;

// =============================================================================
// Constants
// =============================================================================

/// varint + push(72-byte sig) + push(33-byte pubkey)
pub const P2PKH_UNLOCK_SIZE: u64 = 1 + 1 + 72 + 1 + 33;
pub const P2PKH_OUTPUT_SIZE: u64 = 34;
pub const DOGE_P2PKH_INPUT_SIZE: u64 = 148;
pub const DOGE_TX_OVERHEAD: u64 = 10;

pub const MVC_DUST_LIMIT: u64 = 546;
pub const DOGE_DUST_LIMIT: u64 = 600;

/// Fixed safety margin added to every MVC funding target
pub const MVC_FUNDING_MARGIN: u64 = 100;

pub const DEFAULT_MVC_FEE_RATE: u64 = 1;
pub const DEFAULT_DOGE_INSCRIPTION_FEE_RATE: u64 = 5_000_000;
pub const DEFAULT_DOGE_TRANSFER_FEE_RATE: u64 = 200_000;

/// How a fee rate is quoted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    PerByte,
    PerKilobyte,
}

/// Per-chain size constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub chain: Chain,
    pub base_overhead: u64,
    pub per_input: u64,
    pub per_output: u64,
    pub per_script_byte: u64,
    pub unit: RateUnit,
    /// Flat amount added to funding targets
    pub margin: u64,
    /// Change below this is left to the fee
    pub dust_limit: u64,
}

impl FeeSchedule {
    /// MVC funding: the draft's own size is already in the target, so the
    /// schedule only prices the inputs and two outputs it may add.
    pub const fn mvc() -> Self {
        Self {
            chain: Chain::Mvc,
            base_overhead: 0,
            per_input: P2PKH_UNLOCK_SIZE,
            per_output: P2PKH_OUTPUT_SIZE,
            per_script_byte: 1,
            unit: RateUnit::PerByte,
            margin: MVC_FUNDING_MARGIN,
            dust_limit: MVC_DUST_LIMIT,
        }
    }

    pub const fn doge() -> Self {
        Self {
            chain: Chain::Doge,
            base_overhead: DOGE_TX_OVERHEAD,
            per_input: DOGE_P2PKH_INPUT_SIZE,
            per_output: P2PKH_OUTPUT_SIZE,
            per_script_byte: 1,
            unit: RateUnit::PerKilobyte,
            margin: 0,
            dust_limit: DOGE_DUST_LIMIT,
        }
    }

    pub fn for_chain(chain: Chain) -> Self {
        match chain {
            Chain::Mvc => Self::mvc(),
            Chain::Doge => Self::doge(),
        }
    }

    /// Estimated serialized size
    pub fn estimate_size(&self, inputs: usize, outputs: usize, extra_script_bytes: u64) -> u64 {
        self.base_overhead
            + inputs as u64 * self.per_input
            + outputs as u64 * self.per_output
            + extra_script_bytes * self.per_script_byte
    }

    pub fn fee_for_size(&self, size: u64, fee_rate: u64) -> u64 {
        match self.unit {
            RateUnit::PerByte => size.saturating_mul(fee_rate),
            RateUnit::PerKilobyte => (size.saturating_mul(fee_rate) + 999) / 1000,
        }
    }

    pub fn estimate_fee(&self, inputs: usize, outputs: usize, extra_script_bytes: u64, fee_rate: u64) -> u64 {
        self.fee_for_size(self.estimate_size(inputs, outputs, extra_script_bytes), fee_rate)
    }
}

/// Extra bytes of a P2SH input whose unlock script is `unlock_size` long
pub fn p2sh_input_size(unlock_size: u64) -> u64 {
    32 + 4 + 3 + unlock_size + 4
}

// =============================================================================
// Chunked upload
// =============================================================================

pub mod chunked {
    pub const PRE_TX_BASE: u64 = 200;
    pub const PRE_TX_INPUT: u64 = 150;
    pub const MERGE_TX_BASE: u64 = 200;
    pub const MERGE_TX_INPUT: u64 = 150;
    pub const MERGE_TX_OUTPUT: u64 = 34;
    /// Bytes the co-signer itself adds to each pre-transaction
    pub const PRE_TX_BUILD_RESERVE: u64 = 350;
    /// Window for matching merge outputs back to their role
    pub const AMOUNT_TOLERANCE: u64 = 1000;
    /// Merge change at or below this is left to the fee
    pub const MERGE_CHANGE_DUST: u64 = 600;
    /// Smallest wallet output that may fund a direct upload
    pub const DIRECT_FUNDING_MIN: u64 = 5_000;
    /// Value the direct pre-transaction returns to the wallet as output 0
    pub const DIRECT_OUTPUT_VALUE: u64 = 1;

    /// Merge fee: base + two inputs + two outputs, rounded up
    pub fn merge_fee(fee_rate: u64) -> u64 {
        (MERGE_TX_BASE + 2 * MERGE_TX_INPUT + 2 * MERGE_TX_OUTPUT) * fee_rate
    }

    /// Funding for one pre-transaction: service quote plus our own bytes
    pub fn pre_tx_amount(service_fee: u64, fee_rate: u64) -> u64 {
        service_fee + PRE_TX_BUILD_RESERVE * fee_rate
    }

    /// Lower bound used before the service has quoted
    pub fn min_pre_tx_fee(fee_rate: u64) -> u64 {
        (PRE_TX_BASE + PRE_TX_INPUT) * fee_rate
    }
}

// =============================================================================
// Provider tiers
// =============================================================================

/// One entry of a provider's fee summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRateTier {
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(rename = "feeRate")]
    pub fee_rate: u64,
}

/// Choose a rate: the preferred tier if present, else the first, else `fallback`
pub fn pick_fee_rate(tiers: &[FeeRateTier], preferred: Option<&str>, fallback: u64) -> u64 {
    preferred
        .and_then(|want| tiers.iter().find(|t| t.title.eq_ignore_ascii_case(want)))
        .or_else(|| tiers.first())
        .map(|t| t.fee_rate)
        .filter(|rate| *rate > 0)
        .unwrap_or(fallback)
}
