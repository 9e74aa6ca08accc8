//! Key Material
//!
//! Parses or creates the BIP39 mnemonic that owns every derived key.
//!
//! SECURITY: the phrase is held in a `SecretString` and the seed in a
//! zeroizing buffer; neither is ever serialized or logged.

use bip39::Mnemonic;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{EngineError, EngineResult, ErrorCode};

/// Mnemonic phrase plus its 64-byte BIP39 seed
pub struct KeyMaterial {
    phrase: SecretString,
    seed: Zeroizing<[u8; 64]>,
}

impl KeyMaterial {
    /// Parse an English mnemonic (empty BIP39 passphrase)
    pub fn from_mnemonic(phrase: &str) -> EngineResult<Self> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        let mnemonic = Mnemonic::parse(normalized.as_str()).map_err(|e| {
            EngineError::new(ErrorCode::InvalidMnemonic, format!("Invalid mnemonic: {}", e))
        })?;
        Ok(Self::from_parsed(&mnemonic, normalized))
    }

    /// Create a fresh 12-word mnemonic from OS entropy
    pub fn generate() -> EngineResult<Self> {
        let mut entropy = Zeroizing::new([0u8; 16]);
        OsRng.fill_bytes(entropy.as_mut());

        let mnemonic = Mnemonic::from_entropy(entropy.as_ref())
            .map_err(|e| EngineError::crypto_error(format!("Failed to create mnemonic: {}", e)))?;
        let phrase = mnemonic.to_string();
        Ok(Self::from_parsed(&mnemonic, phrase))
    }

    fn from_parsed(mnemonic: &Mnemonic, phrase: String) -> Self {
        Self {
            phrase: SecretString::from(phrase),
            seed: Zeroizing::new(mnemonic.to_seed("")),
        }
    }

    pub fn seed(&self) -> &[u8] {
        self.seed.as_ref()
    }

    /// The phrase, for display to its owner only
    pub fn phrase(&self) -> &str {
        self.phrase.expose_secret()
    }

    pub fn word_count(&self) -> usize {
        self.phrase().split_whitespace().count()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED {} words])", self.word_count())
    }
}
