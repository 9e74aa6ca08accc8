//! Unified error types for the MetaID engine
//!
//! All errors flow through this module so callers (CLI, bots, tests) see one
//! serializable shape. Module-local `thiserror` enums convert into it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for all engine operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    /// Transactions that were already accepted by the network before this
    /// error aborted the batch. Non-empty only for `PartialBroadcast`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub broadcast_txids: Vec<String>,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            broadcast_txids: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the txids that were committed before the failure.
    ///
    /// A rejection after at least one accepted broadcast is upgraded to
    /// `PartialBroadcast` so callers never mistake it for a clean failure.
    pub fn with_broadcasted(mut self, txids: Vec<String>) -> Self {
        if !txids.is_empty() {
            self.code = ErrorCode::PartialBroadcast;
        }
        self.broadcast_txids = txids;
        self
    }

    // Convenience constructors
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAddress, msg)
    }

    pub fn invalid_operation_path(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOperationPath, msg)
    }

    pub fn unsupported_chain(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedChain, msg)
    }

    pub fn insufficient_balance(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientBalance, msg)
    }

    pub fn key_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyNotFound, msg)
    }

    pub fn amount_below_minimum(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AmountBelowMinimum, msg)
    }

    pub fn amount_match_ambiguous(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AmountMatchAmbiguous, msg)
    }

    pub fn balance_tolerance_exceeded(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BalanceToleranceExceeded, msg)
    }

    pub fn consolidation_in_progress(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConsolidationInProgress, msg)
    }

    pub fn reservation_lost(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReservationLost, msg)
    }

    pub fn broadcast_rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BroadcastRejected, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, msg)
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderError, msg)
    }

    pub fn crypto_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::CryptoError, msg)
    }

    pub fn signing_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SigningFailed, msg)
    }

    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTransaction, msg)
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// True when nothing has reached the network yet.
    pub fn is_clean_failure(&self) -> bool {
        self.broadcast_txids.is_empty()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if !self.broadcast_txids.is_empty() {
            write!(f, " [already broadcast: {}]", self.broadcast_txids.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Input errors
    InvalidInput,
    InvalidAddress,
    InvalidMnemonic,
    InvalidPrivateKey,
    InvalidTransaction,
    InvalidScript,
    InvalidOperationPath,
    UnsupportedChain,
    AmountBelowMinimum,

    // Wallet errors
    InsufficientBalance,
    KeyNotFound,

    // Safety aborts
    AmountMatchAmbiguous,
    BalanceToleranceExceeded,
    ConsolidationInProgress,
    ReservationLost,

    // Network errors
    NetworkError,
    ProviderError,
    Timeout,

    // Broadcast errors
    BroadcastRejected,
    PartialBroadcast,

    // Crypto errors
    CryptoError,
    SigningFailed,
    VerificationFailed,

    // Parse errors
    ParseError,
    JsonError,
    HexError,

    // Internal
    ConfigError,
    Internal,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

// Conversions from common error types

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::new(ErrorCode::JsonError, e.to_string())
    }
}

impl From<hex::FromHexError> for EngineError {
    fn from(e: hex::FromHexError) -> Self {
        EngineError::new(ErrorCode::HexError, e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::new(ErrorCode::Internal, e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::new(ErrorCode::Timeout, "Request timed out")
        } else if e.is_connect() {
            EngineError::new(ErrorCode::NetworkError, "Connection failed")
        } else {
            EngineError::new(ErrorCode::NetworkError, e.to_string())
        }
    }
}

impl From<bitcoin::bip32::Error> for EngineError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        EngineError::new(ErrorCode::CryptoError, format!("BIP32 error: {}", e))
    }
}

impl From<bitcoin::secp256k1::Error> for EngineError {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        EngineError::new(ErrorCode::CryptoError, format!("Secp256k1 error: {}", e))
    }
}

impl From<bip39::Error> for EngineError {
    fn from(e: bip39::Error) -> Self {
        EngineError::new(ErrorCode::InvalidMnemonic, format!("BIP39 error: {}", e))
    }
}

impl From<bitcoin::consensus::encode::Error> for EngineError {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        EngineError::new(ErrorCode::InvalidTransaction, format!("Decode error: {}", e))
    }
}
