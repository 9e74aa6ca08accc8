//! Transaction Signer
//!
//! ECDSA signing of P2PKH (and caller-supplied script) inputs on a `TxDraft`,
//! plus verification used to self-check co-signed transactions.

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::Script;

use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::script::{decode, p2pkh_hash, Instruction, ScriptBuilder};
use crate::utils::hash160;
use crate::wallet::DerivedKey;

use super::builder::TxDraft;
use super::sighash::signature_hash;

/// DER signature followed by the sighash type byte
pub fn sign_digest(secp: &Secp256k1<All>, digest: [u8; 32], secret: &SecretKey, sighash_type: u32) -> Vec<u8> {
    let message = Message::from_digest(digest);
    let signature = secp.sign_ecdsa(&message, secret);
    let mut out = signature.serialize_der().to_vec();
    out.push(sighash_type as u8);
    out
}

/// Signature over input `index` with an explicit script code
pub fn input_signature(
    secp: &Secp256k1<All>,
    draft: &TxDraft,
    index: usize,
    script_code: &Script,
    secret: &SecretKey,
    sighash_type: u32,
) -> EngineResult<Vec<u8>> {
    let prevout = draft
        .prevouts()
        .get(index)
        .ok_or_else(|| EngineError::signing_failed(format!("No input #{} to sign", index)))?;
    let digest = signature_hash(
        draft.chain(),
        draft.tx(),
        index,
        script_code,
        prevout.value,
        sighash_type,
    )?;
    Ok(sign_digest(secp, digest, secret, sighash_type))
}

/// Sign a P2PKH input: `<sig> <pubkey>`
pub fn sign_p2pkh_input(
    secp: &Secp256k1<All>,
    draft: &mut TxDraft,
    index: usize,
    key: &DerivedKey,
    sighash_type: u32,
) -> EngineResult<()> {
    let script_code = draft
        .prevouts()
        .get(index)
        .map(|p| p.script_pubkey.clone())
        .ok_or_else(|| EngineError::signing_failed(format!("No input #{} to sign", index)))?;

    let expected = p2pkh_hash(script_code.as_bytes())?;
    if expected != key.pubkey_hash() {
        return Err(EngineError::signing_failed(format!(
            "Key {} does not control input #{}",
            key.address, index
        )));
    }

    let sig = input_signature(secp, draft, index, &script_code, &key.secret, sighash_type)?;
    let unlock = ScriptBuilder::new()
        .push(sig)
        .push(key.pubkey_bytes().to_vec())
        .into_script();
    draft.set_input_script(index, unlock)
}

/// Check a `<sig> <pubkey>` unlock against input `index`
pub fn verify_p2pkh_input(secp: &Secp256k1<All>, draft: &TxDraft, index: usize) -> EngineResult<()> {
    let input = draft
        .tx()
        .input
        .get(index)
        .ok_or_else(|| EngineError::invalid_transaction(format!("No input #{}", index)))?;
    let prevout = draft
        .prevouts()
        .get(index)
        .ok_or_else(|| EngineError::invalid_transaction(format!("No previous output for input #{}", index)))?;

    let (sig, pubkey) = match decode(input.script_sig.as_bytes())?.as_slice() {
        [Instruction::Push(sig), Instruction::Push(pubkey)] if !sig.is_empty() => (sig.clone(), pubkey.clone()),
        _ => {
            return Err(EngineError::new(
                ErrorCode::VerificationFailed,
                format!("Input #{} is not a P2PKH unlock", index),
            ))
        }
    };

    if hash160(&pubkey) != p2pkh_hash(prevout.script_pubkey.as_bytes())? {
        return Err(EngineError::new(
            ErrorCode::VerificationFailed,
            format!("Public key does not match input #{}", index),
        ));
    }

    verify_signature(secp, draft, index, &prevout.script_pubkey, &sig, &pubkey)
}

/// Verify one `DER || sighash byte` signature against a script code
pub fn verify_signature(
    secp: &Secp256k1<All>,
    draft: &TxDraft,
    index: usize,
    script_code: &Script,
    sig_with_type: &[u8],
    pubkey: &[u8],
) -> EngineResult<()> {
    let (type_byte, der) = sig_with_type
        .split_last()
        .ok_or_else(|| EngineError::new(ErrorCode::VerificationFailed, "Empty signature"))?;
    let value = draft
        .prevouts()
        .get(index)
        .map(|p| p.value)
        .ok_or_else(|| EngineError::invalid_transaction(format!("No previous output for input #{}", index)))?;
    let digest = signature_hash(draft.chain(), draft.tx(), index, script_code, value, *type_byte as u32)?;

    let signature = Signature::from_der(der)
        .map_err(|e| EngineError::new(ErrorCode::VerificationFailed, format!("Bad DER: {}", e)))?;
    let public_key = PublicKey::from_slice(pubkey)?;

    secp.verify_ecdsa(&Message::from_digest(digest), &signature, &public_key)
        .map_err(|_| {
            EngineError::new(
                ErrorCode::VerificationFailed,
                format!("Signature on input #{} does not verify", index),
            )
        })
}
