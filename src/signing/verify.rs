//! Full transaction verification
//!
//! Checks every input of a signed transaction against the coin it spends.
//! Only the standard templates a wallet produces are evaluated: P2PK,
//! P2PKH and bare multisig, optionally behind P2SH, P2WSH or P2SH-P2WSH,
//! plus P2WPKH. Digests come from `bitcoin`'s sighash cache and signatures
//! are parsed as `bitcoin::ecdsa::Signature`.

use bitcoin::ecdsa;
use secp256k1::{Message, PublicKey, Secp256k1};

use super::SigningError;
use crate::core::script::p2pkh;
use crate::core::{
    signature_hash, Coin, CoinView, Script, ScriptBuf, ScriptTemplates, SigVersion, Transaction,
};
use crate::crypto::{hash160, sha256};

fn fail(index: usize, reason: &'static str) -> SigningError {
    SigningError::Verification { index, reason }
}

/// Verify that every input is fully and correctly signed
pub fn verify_transaction(tx: &Transaction, view: &CoinView) -> Result<(), SigningError> {
    for index in 0..tx.input.len() {
        let coin = view
            .coin_for(tx, index)
            .ok_or(SigningError::MissingCoin(index))?;
        verify_input(tx, index, coin)?;
    }
    Ok(())
}

fn verify_input(tx: &Transaction, index: usize, coin: &Coin) -> Result<(), SigningError> {
    let input = &tx.input[index];
    let mut stack = input
        .script_sig
        .push_items()
        .ok_or_else(|| fail(index, "scriptSig is not push-only"))?;
    let mut prev = coin.script.clone();
    let mut nested = false;

    if let Some(hash) = prev.as_p2sh() {
        let redeem = ScriptBuf::from_bytes(
            stack
                .pop()
                .ok_or_else(|| fail(index, "missing redeem script"))?,
        );
        if hash160(redeem.as_bytes()) != hash {
            return Err(fail(index, "redeem script hash mismatch"));
        }
        nested = redeem.is_witness_program();
        prev = redeem;
    }

    if prev.is_witness_program() {
        if !stack.is_empty() {
            return Err(fail(index, "unexpected scriptSig for witness spend"));
        }
        return verify_witness(tx, index, coin, &prev, nested);
    }

    if !input.witness.is_empty() {
        return Err(fail(index, "unexpected witness"));
    }
    eval_template(tx, index, coin.value, &prev, &stack, SigVersion::Base)
}

fn verify_witness(
    tx: &Transaction,
    index: usize,
    coin: &Coin,
    program: &Script,
    nested: bool,
) -> Result<(), SigningError> {
    let input = &tx.input[index];
    if !nested && !input.script_sig.is_empty() {
        return Err(fail(index, "unexpected scriptSig for native witness spend"));
    }
    let mut stack = input.witness.to_vec();

    if let Some(hash) = program.as_p2wpkh() {
        if stack.len() != 2 || hash160(&stack[1]) != hash {
            return Err(fail(index, "witness key hash mismatch"));
        }
        return eval_template(
            tx,
            index,
            coin.value,
            &p2pkh(&hash),
            &stack,
            SigVersion::WitnessV0,
        );
    }

    if let Some(hash) = program.as_p2wsh() {
        let script = ScriptBuf::from_bytes(
            stack
                .pop()
                .ok_or_else(|| fail(index, "missing witness script"))?,
        );
        if sha256(script.as_bytes()) != hash {
            return Err(fail(index, "witness script hash mismatch"));
        }
        return eval_template(tx, index, coin.value, &script, &stack, SigVersion::WitnessV0);
    }

    Err(fail(index, "unknown witness program"))
}

fn check_sig(
    tx: &Transaction,
    index: usize,
    value: u64,
    script: &Script,
    version: SigVersion,
    signature: &[u8],
    key: &PublicKey,
) -> Result<bool, SigningError> {
    // DER body plus a standard sighash byte
    let Ok(parsed) = ecdsa::Signature::from_slice(signature) else {
        return Ok(false);
    };
    let digest = signature_hash(tx, index, script, value, parsed.sighash_type, version)?;

    let mut inner = parsed.signature;
    inner.normalize_s();
    let secp = Secp256k1::verification_only();
    Ok(secp
        .verify_ecdsa(&Message::from_digest(digest), &inner, key)
        .is_ok())
}

fn eval_template(
    tx: &Transaction,
    index: usize,
    value: u64,
    script: &Script,
    stack: &[Vec<u8>],
    version: SigVersion,
) -> Result<(), SigningError> {
    if let Some(key) = script.as_p2pk() {
        if stack.len() != 1 || !check_sig(tx, index, value, script, version, &stack[0], &key)? {
            return Err(fail(index, "invalid pubkey signature"));
        }
        return Ok(());
    }

    if let Some(hash) = script.as_p2pkh() {
        if stack.len() != 2 || hash160(&stack[1]) != hash {
            return Err(fail(index, "pubkey hash mismatch"));
        }
        let key =
            PublicKey::from_slice(&stack[1]).map_err(|_| fail(index, "invalid public key"))?;
        if !check_sig(tx, index, value, script, version, &stack[0], &key)? {
            return Err(fail(index, "invalid pubkeyhash signature"));
        }
        return Ok(());
    }

    if let Some((m, keys)) = script.as_multisig() {
        // Leading dummy element consumed by CHECKMULTISIG
        if stack.len() != m + 1 || !stack[0].is_empty() {
            return Err(fail(index, "wrong multisig stack size"));
        }

        let mut key_index = 0;
        for signature in &stack[1..] {
            loop {
                if key_index == keys.len() {
                    return Err(fail(index, "invalid multisig signature"));
                }
                let key = &keys[key_index];
                key_index += 1;
                if check_sig(tx, index, value, script, version, signature, key)? {
                    break;
                }
            }
        }
        return Ok(());
    }

    Err(fail(index, "unsupported script template"))
}
