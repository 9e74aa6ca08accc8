//! Wallet Module
//!
//! Mnemonic handling, deterministic key derivation, address encoding,
//! UTXO bookkeeping and coin selection.

mod address;
mod derivation;
mod derivation_path;
mod keygen;
mod selection;
pub mod utxo;

pub use address::*;
pub use derivation::*;
pub use derivation_path::*;
pub use keygen::*;
pub use selection::*;
pub use utxo::{total_value, Utxo, UtxoPool, UtxoReservation};
