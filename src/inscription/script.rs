//! Inscription scripts
//!
//! The inscription is a push-only script carrying the record header and the
//! body in chunks of at most 240 bytes. The lock script checks the ephemeral
//! key's signature and then drops exactly one item per inscription push, so
//! the revealed data is carried but never executed.

use bitcoin::ScriptBuf;

use crate::error::EngineResult;
use crate::pin::MetaidRecord;
use crate::script::opcodes::{OP_CHECKSIGVERIFY, OP_DROP, OP_TRUE};
use crate::script::{decode, p2sh_script, ScriptBuilder};
use crate::utils::hash160;

pub const MAX_CHUNK_LEN: usize = 240;

/// Split `body` into pushes; an empty body still yields one empty chunk
pub fn chunk_body(body: &[u8]) -> Vec<&[u8]> {
    if body.is_empty() {
        return vec![body];
    }
    body.chunks(MAX_CHUNK_LEN).collect()
}

pub fn inscription_script(record: &MetaidRecord) -> EngineResult<ScriptBuilder> {
    let body = record.body_bytes()?;
    let header = record
        .inscription_header()
        .into_iter()
        .fold(ScriptBuilder::new(), |b, field| b.push(field));
    Ok(chunk_body(&body).into_iter().fold(header, |b, chunk| b.push(chunk.to_vec())))
}

/// `<pubkey> OP_CHECKSIGVERIFY OP_DROP×drops OP_TRUE`
pub fn lock_script(pubkey: &[u8; 33], drops: usize) -> ScriptBuilder {
    ScriptBuilder::new()
        .push(pubkey.to_vec())
        .op(OP_CHECKSIGVERIFY)
        .op_n(OP_DROP, drops)
        .op(OP_TRUE)
}

/// Data pushes in a serialized script
pub fn count_pushes(script: &[u8]) -> EngineResult<usize> {
    Ok(decode(script)?.iter().filter(|i| i.is_push()).count())
}

/// Everything the commit and reveal need for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealScripts {
    pub inscription: Vec<u8>,
    pub lock: Vec<u8>,
    pub push_count: usize,
}

impl RevealScripts {
    pub fn new(record: &MetaidRecord, pubkey: &[u8; 33]) -> EngineResult<Self> {
        let inscription = inscription_script(record)?;
        let push_count = inscription.push_count();
        Ok(Self {
            inscription: inscription.to_bytes(),
            lock: lock_script(pubkey, push_count).to_bytes(),
            push_count,
        })
    }

    pub fn lock_script(&self) -> ScriptBuf {
        ScriptBuf::from_bytes(self.lock.clone())
    }

    /// Commit output paying to the lock script's hash
    pub fn p2sh_script(&self) -> ScriptBuf {
        p2sh_script(&hash160(&self.lock))
    }

    /// Size budget for the reveal's unlock script
    pub fn unlock_size(&self) -> u64 {
        (self.inscription.len() + 72 + self.lock.len() + 10) as u64
    }

    /// `<sig> <pubkey> <inscription> <lock>`
    pub fn unlock_script(&self, signature: Vec<u8>, pubkey: &[u8; 33]) -> ScriptBuf {
        ScriptBuilder::new()
            .push(signature)
            .push(pubkey.to_vec())
            .push(self.inscription.clone())
            .push(self.lock.clone())
            .into_script()
    }
}
