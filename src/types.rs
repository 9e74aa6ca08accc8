//! Shared types for the MetaID engine
//!
//! Data structures that cross module boundaries are defined here
//! for consistent serialization.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Chain Types
// =============================================================================

/// Supported UTXO chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// OP_RETURN metadata chain, FORKID signatures
    Mvc,
    /// Legacy-script chain, commit/reveal inscriptions
    Doge,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Mvc, Chain::Doge];

    pub fn symbol(&self) -> &'static str {
        match self {
            Chain::Mvc => "SPACE",
            Chain::Doge => "DOGE",
        }
    }

    pub fn decimals(&self) -> u8 {
        8
    }

    /// Network identifier used by the wallet API
    pub fn api_name(&self) -> &'static str {
        match self {
            Chain::Mvc => "mvc",
            Chain::Doge => "doge",
        }
    }

    pub fn params(&self, network: Network) -> ChainParams {
        match (self, network) {
            (Chain::Mvc, Network::Mainnet) => ChainParams {
                p2pkh_prefix: 0x00,
                p2sh_prefix: 0x05,
                wif_prefix: 0x80,
                tx_version: 10,
            },
            (Chain::Mvc, Network::Testnet) => ChainParams {
                p2pkh_prefix: 0x6f,
                p2sh_prefix: 0xc4,
                wif_prefix: 0xef,
                tx_version: 10,
            },
            (Chain::Doge, Network::Mainnet) => ChainParams {
                p2pkh_prefix: 30,
                p2sh_prefix: 22,
                wif_prefix: 158,
                tx_version: 2,
            },
            (Chain::Doge, Network::Testnet) => ChainParams {
                p2pkh_prefix: 113,
                p2sh_prefix: 196,
                wif_prefix: 241,
                tx_version: 2,
            },
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for Chain {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mvc" | "space" => Ok(Chain::Mvc),
            "doge" | "dogecoin" => Ok(Chain::Doge),
            other => Err(EngineError::unsupported_chain(format!(
                "Chain '{}' is not supported (expected mvc or doge)",
                other
            ))),
        }
    }
}

/// Network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn api_name(&self) -> &'static str {
        match self {
            Network::Mainnet => "livenet",
            Network::Testnet => "testnet",
        }
    }
}

impl FromStr for Network {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "livenet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(EngineError::config(format!("Unknown network '{}'", other))),
        }
    }
}

/// Per-chain encoding constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
    pub wif_prefix: u8,
    pub tx_version: i32,
}

// =============================================================================
// Value Movement
// =============================================================================

/// One payee of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub address: String,
    pub amount: u64,
}

impl Receiver {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Signed transaction ready for (or already submitted to) the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub txid: String,
    pub raw_hex: String,
    /// Value consumed from the wallet: inputs minus outputs that come back to it
    pub cost: u64,
}
