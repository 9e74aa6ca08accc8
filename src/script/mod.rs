//! Script Assembly
//!
//! Scripts are modelled as a typed instruction list and serialized in one
//! pass, so a push can never carry a length prefix that disagrees with its
//! payload. The same encoder serves the MVC data carrier, P2PKH/P2SH
//! templates and the DOGE inscription/lock scripts.

mod builder;
pub mod opcodes;

pub use builder::*;

use thiserror::Error;

use crate::error::{EngineError, ErrorCode};

/// Script decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("push at offset {offset} declares {declared} bytes but only {available} remain")]
    TruncatedPush {
        offset: usize,
        declared: usize,
        available: usize,
    },
    #[error("length prefix missing for {opcode:#04x} at offset {offset}")]
    MissingLength { opcode: u8, offset: usize },
    #[error("not a {0} script")]
    UnexpectedTemplate(&'static str),
}

impl From<ScriptError> for EngineError {
    fn from(e: ScriptError) -> Self {
        EngineError::new(ErrorCode::InvalidScript, e.to_string())
    }
}
