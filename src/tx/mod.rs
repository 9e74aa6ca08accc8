//! Transaction Module
//!
//! Draft construction, per-chain signature hashing, signing and broadcast.

mod broadcaster;
mod builder;
mod sighash;
mod signer;

pub use broadcaster::*;
pub use builder::*;
pub use sighash::*;
pub use signer::*;
