//! Signature Hashes
//!
//! MVC signs with the BIP143-style FORKID digest; DOGE with the legacy
//! pre-segwit digest. The sighash type byte is appended to every signature
//! and must match what the digest committed to.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::{Script, ScriptBuf, Transaction};

use crate::error::{EngineError, EngineResult};
use crate::types::Chain;
use crate::utils::sha256d;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Full-commitment MVC signature
pub const SIGHASH_ALL_FORKID: u32 = SIGHASH_ALL | SIGHASH_FORKID;
/// Commits to this input only; outputs and other inputs stay open
pub const SIGHASH_NONE_ANYONECANPAY_FORKID: u32 = SIGHASH_NONE | SIGHASH_ANYONECANPAY | SIGHASH_FORKID;
/// Commits to all inputs but no outputs
pub const SIGHASH_NONE_FORKID: u32 = SIGHASH_NONE | SIGHASH_FORKID;
/// Commits to this input and the output at the same index only
pub const SIGHASH_SINGLE_ANYONECANPAY_FORKID: u32 = SIGHASH_SINGLE | SIGHASH_ANYONECANPAY | SIGHASH_FORKID;

const BASE_TYPE_MASK: u32 = 0x1f;

/// Default sighash type for ordinary spends on `chain`
pub fn default_sighash(chain: Chain) -> u32 {
    match chain {
        Chain::Mvc => SIGHASH_ALL_FORKID,
        Chain::Doge => SIGHASH_ALL,
    }
}

/// Digest for input `index` under `sighash_type`, using the chain's algorithm
pub fn signature_hash(
    chain: Chain,
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: u32,
) -> EngineResult<[u8; 32]> {
    match chain {
        Chain::Mvc => forkid_sighash(tx, index, script_code, value, sighash_type),
        Chain::Doge => legacy_sighash(tx, index, script_code, sighash_type),
    }
}

/// Legacy digest (signature covers a modified copy of the transaction)
pub fn legacy_sighash(tx: &Transaction, index: usize, script_code: &Script, sighash_type: u32) -> EngineResult<[u8; 32]> {
    if sighash_type & SIGHASH_FORKID != 0 {
        return Err(EngineError::signing_failed("FORKID sighash is not valid on a legacy chain"));
    }
    let cache = SighashCache::new(tx);
    let hash = cache
        .legacy_signature_hash(index, script_code, sighash_type)
        .map_err(|e| EngineError::signing_failed(format!("Legacy sighash failed: {}", e)))?;
    Ok(hash.to_byte_array())
}

/// BIP143-style digest with the FORKID flag
pub fn forkid_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: u32,
) -> EngineResult<[u8; 32]> {
    if sighash_type & SIGHASH_FORKID == 0 {
        return Err(EngineError::signing_failed("MVC signatures require the FORKID flag"));
    }
    let input = tx
        .input
        .get(index)
        .ok_or_else(|| EngineError::signing_failed(format!("No input #{} to sign", index)))?;

    let base = sighash_type & BASE_TYPE_MASK;
    let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;
    let open_outputs = base == SIGHASH_NONE || base == SIGHASH_SINGLE;

    let hash_prevouts = if anyone_can_pay {
        [0u8; 32]
    } else {
        let mut buf = Vec::with_capacity(tx.input.len() * 36);
        for txin in &tx.input {
            buf.extend(serialize(&txin.previous_output));
        }
        sha256d(&buf)
    };

    let hash_sequence = if anyone_can_pay || open_outputs {
        [0u8; 32]
    } else {
        let mut buf = Vec::with_capacity(tx.input.len() * 4);
        for txin in &tx.input {
            buf.extend_from_slice(&txin.sequence.0.to_le_bytes());
        }
        sha256d(&buf)
    };

    let hash_outputs = if !open_outputs {
        let mut buf = Vec::new();
        for txout in &tx.output {
            buf.extend(serialize(txout));
        }
        sha256d(&buf)
    } else if base == SIGHASH_SINGLE && index < tx.output.len() {
        sha256d(&serialize(&tx.output[index]))
    } else {
        [0u8; 32]
    };

    let mut preimage = Vec::with_capacity(160 + script_code.len());
    preimage.extend_from_slice(&tx.version.0.to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend(serialize(&input.previous_output));
    preimage.extend(serialize(&ScriptBuf::from_bytes(script_code.to_bytes())));
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.0.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());

    Ok(sha256d(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, TxOut, Witness};

    fn sample_tx(outputs: usize) -> Transaction {
        Transaction {
            version: Version(10),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: (0..outputs)
                .map(|i| TxOut {
                    value: Amount::from_sat(1000 + i as u64),
                    script_pubkey: ScriptBuf::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_constants() {
        assert_eq!(SIGHASH_ALL_FORKID, 0x41);
        assert_eq!(SIGHASH_NONE_FORKID, 0x42);
        assert_eq!(SIGHASH_NONE_ANYONECANPAY_FORKID, 0xc2);
    }

    #[test]
    fn test_none_ignores_outputs() {
        let script = ScriptBuf::new();
        let a = forkid_sighash(&sample_tx(0), 0, &script, 5000, SIGHASH_NONE_ANYONECANPAY_FORKID).unwrap();
        let b = forkid_sighash(&sample_tx(3), 0, &script, 5000, SIGHASH_NONE_ANYONECANPAY_FORKID).unwrap();
        assert_eq!(a, b);

        let c = forkid_sighash(&sample_tx(0), 0, &script, 5000, SIGHASH_ALL_FORKID).unwrap();
        let d = forkid_sighash(&sample_tx(3), 0, &script, 5000, SIGHASH_ALL_FORKID).unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn test_value_is_committed() {
        let script = ScriptBuf::new();
        let a = forkid_sighash(&sample_tx(1), 0, &script, 5000, SIGHASH_ALL_FORKID).unwrap();
        let b = forkid_sighash(&sample_tx(1), 0, &script, 5001, SIGHASH_ALL_FORKID).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_flag_discipline() {
        let script = ScriptBuf::new();
        assert!(forkid_sighash(&sample_tx(1), 0, &script, 1, SIGHASH_ALL).is_err());
        assert!(legacy_sighash(&sample_tx(1), 0, &script, SIGHASH_ALL_FORKID).is_err());
        assert!(forkid_sighash(&sample_tx(1), 3, &script, 1, SIGHASH_ALL_FORKID).is_err());
        assert!(legacy_sighash(&sample_tx(1), 0, &script, SIGHASH_ALL).is_ok());
    }
}
