//! MetaID Engine
//!
//! Builds, funds, signs and broadcasts MetaID transactions for an agent
//! identity on two UTXO chains from one BIP39 mnemonic.
//!
//! # Architecture
//!
//! - **wallet**: key derivation, address codec, UTXO selection and pools
//! - **script**: typed script builder and decoder
//! - **tx**: transaction drafts, sighash, signing, broadcasting
//! - **fees**: per-chain size and fee schedules
//! - **pin**: MetaID records and MVC data-carrier batches
//! - **inscription**: DOGE commit/reveal inscriptions
//! - **transfer**: native and token transfers
//! - **chunked**: co-signed funding for large file uploads
//! - **consolidation**: per-address UTXO sweeps
//! - **agent**: the facade tying one identity to the above
//!
//! # Security
//!
//! Seeds, derived secrets and ephemeral keys live in zeroizing buffers and
//! the mnemonic in a secret string. Log fields named like keys are redacted.
//!
//! # Example
//!
//! ```rust,ignore
//! use metaid_engine::{EngineConfig, KeyMaterial, MetaidAgent, Chain};
//!
//! let agent = MetaidAgent::from_config(KeyMaterial::from_mnemonic(phrase)?, EngineConfig::default())?;
//! println!("MVC address: {}", agent.address(Chain::Mvc)?);
//! ```

pub mod error;
pub mod types;
pub mod utils;
pub mod wallet;
pub mod script;
pub mod tx;
pub mod fees;
pub mod api;
pub mod config;
pub mod context;
pub mod pin;
pub mod inscription;
pub mod transfer;
pub mod chunked;
pub mod consolidation;
pub mod agent;

pub use agent::MetaidAgent;
pub use config::EngineConfig;
pub use context::OperationContext;
pub use error::{EngineError, EngineResult, ErrorCode};
pub use types::*;
pub use wallet::{KeyMaterial, KeyRing};
