//! Hash helpers shared by address encoding, script building and the uploader.

use bitcoin::hashes::{hash160, sha256d, Hash};
use sha2::{Digest, Sha256};

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// SHA256(SHA256(data)) in internal byte order
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// Lowercase hex SHA256, used for the uploader's `metaId`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
