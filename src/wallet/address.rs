//! Address Codec
//!
//! Base58check P2PKH/P2SH addresses and WIF for both chains. The version
//! bytes come from `Chain::params`, so the same 20-byte hash renders as a
//! `1...` address on MVC and a `D...` address on DOGE.

use bitcoin::base58;
use bitcoin::secp256k1::SecretKey;
use bitcoin::ScriptBuf;
use thiserror::Error;

use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::script::{p2pkh_script, p2sh_script};
use crate::types::{Chain, Network};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid base58check encoding: {0}")]
    Base58(String),
    #[error("decoded address has {0} bytes, expected 21")]
    BadLength(usize),
    #[error("version byte {found:#04x} is not a {chain} {network:?} address")]
    WrongVersion { chain: Chain, network: Network, found: u8 },
}

impl From<AddressError> for EngineError {
    fn from(e: AddressError) -> Self {
        EngineError::new(ErrorCode::InvalidAddress, e.to_string())
    }
}

/// Output template an address pays to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2sh,
}

/// A decoded address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAddress {
    pub kind: AddressKind,
    pub hash: [u8; 20],
}

impl DecodedAddress {
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.kind {
            AddressKind::P2pkh => p2pkh_script(&self.hash),
            AddressKind::P2sh => p2sh_script(&self.hash),
        }
    }
}

fn encode_versioned(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(version);
    data.extend_from_slice(payload);
    base58::encode_check(&data)
}

pub fn p2pkh_address(chain: Chain, network: Network, pubkey_hash: &[u8; 20]) -> String {
    encode_versioned(chain.params(network).p2pkh_prefix, pubkey_hash)
}

pub fn p2sh_address(chain: Chain, network: Network, script_hash: &[u8; 20]) -> String {
    encode_versioned(chain.params(network).p2sh_prefix, script_hash)
}

/// Compressed WIF
pub fn encode_wif(chain: Chain, network: Network, secret: &SecretKey) -> String {
    let mut payload = secret.secret_bytes().to_vec();
    payload.push(0x01);
    encode_versioned(chain.params(network).wif_prefix, &payload)
}

pub fn decode_address(chain: Chain, network: Network, address: &str) -> Result<DecodedAddress, AddressError> {
    let data = base58::decode_check(address.trim()).map_err(|e| AddressError::Base58(e.to_string()))?;
    if data.len() != 21 {
        return Err(AddressError::BadLength(data.len()));
    }

    let params = chain.params(network);
    let kind = match data[0] {
        v if v == params.p2pkh_prefix => AddressKind::P2pkh,
        v if v == params.p2sh_prefix => AddressKind::P2sh,
        found => return Err(AddressError::WrongVersion { chain, network, found }),
    };

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&data[1..]);
    Ok(DecodedAddress { kind, hash })
}

/// Locking script for any supported address
pub fn address_script(chain: Chain, network: Network, address: &str) -> EngineResult<ScriptBuf> {
    Ok(decode_address(chain, network, address)?.script_pubkey())
}

pub fn is_valid_address(chain: Chain, network: Network, address: &str) -> bool {
    decode_address(chain, network, address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_hash_two_chains() {
        let hash = [0x11u8; 20];
        let mvc = p2pkh_address(Chain::Mvc, Network::Mainnet, &hash);
        let doge = p2pkh_address(Chain::Doge, Network::Mainnet, &hash);
        assert!(mvc.starts_with('1'));
        assert!(doge.starts_with('D'));

        assert_eq!(decode_address(Chain::Mvc, Network::Mainnet, &mvc).unwrap().hash, hash);
        assert_eq!(decode_address(Chain::Doge, Network::Mainnet, &doge).unwrap().hash, hash);
    }

    #[test]
    fn test_cross_chain_rejected() {
        let doge = p2pkh_address(Chain::Doge, Network::Mainnet, &[0x22; 20]);
        let err = decode_address(Chain::Mvc, Network::Mainnet, &doge).unwrap_err();
        assert!(matches!(err, AddressError::WrongVersion { found: 30, .. }));
    }

    #[test]
    fn test_p2sh_roundtrip() {
        let addr = p2sh_address(Chain::Doge, Network::Mainnet, &[0x33; 20]);
        assert!(addr.starts_with('9') || addr.starts_with('A'));
        let decoded = decode_address(Chain::Doge, Network::Mainnet, &addr).unwrap();
        assert_eq!(decoded.kind, AddressKind::P2sh);
        assert_eq!(decoded.script_pubkey(), p2sh_script(&[0x33; 20]));
    }

    #[test]
    fn test_bad_checksum() {
        let mut addr = p2pkh_address(Chain::Mvc, Network::Mainnet, &[0x44; 20]);
        let last = addr.pop().unwrap();
        addr.push(if last == '1' { '2' } else { '1' });
        assert!(!is_valid_address(Chain::Mvc, Network::Mainnet, &addr));
    }

    #[test]
    fn test_wif_prefix() {
        let secret = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let wif = encode_wif(Chain::Mvc, Network::Mainnet, &secret);
        assert!(wif.starts_with('K') || wif.starts_with('L'));
        let doge_wif = encode_wif(Chain::Doge, Network::Mainnet, &secret);
        assert!(doge_wif.starts_with('Q'));
    }
}
