//! Transaction signature engine
//!
//! Computes, verifies and places per-input signatures for every output
//! shape a multisig wallet uses: bare scripts, P2SH redeem scripts, native
//! witness programs and witness programs nested in P2SH.

use bitcoin::{EcdsaSighashType, Witness};
use secp256k1::SecretKey;

use super::keyring::KeyRing;
use super::SigningError;
use crate::core::script::{from_pushes, p2pkh};
use crate::core::{
    signature_hash, Coin, CoinView, Script, ScriptBuf, ScriptTemplates, SigVersion, Transaction,
    TransactionExt,
};
use crate::crypto::{sign_digest, verify_digest};

/// Where an input's signatures live once placed
struct Placement {
    /// Script the signatures satisfy
    prev: ScriptBuf,
    /// Redeem script pushed last in the scriptSig (legacy P2SH)
    redeem: Option<ScriptBuf>,
    /// Witness program pushed alone in the scriptSig (nested segwit)
    program: Option<ScriptBuf>,
    /// Witness script appended to the witness (P2WSH)
    witness_script: Option<ScriptBuf>,
    witness: bool,
}

fn unsupported(script: &Script) -> SigningError {
    SigningError::UnsupportedScript(hex::encode(script.as_bytes()))
}

fn redeem_for(ring: &KeyRing, hash: &[u8]) -> Result<ScriptBuf, SigningError> {
    ring.get_redeem(hash).ok_or_else(|| {
        log::error!("Keyring has no script for hash {}", hex::encode(hash));
        SigningError::MissingRedeem(hex::encode(hash))
    })
}

/// Select the signature hash algorithm for spending `coin`
///
/// Witness programs, bare or wrapped in P2SH, use BIP143. Everything else
/// uses the original algorithm.
pub fn classify_coin(coin: &Coin, ring: &KeyRing) -> Result<SigVersion, SigningError> {
    let mut prev = coin.script.clone();
    if let Some(hash) = prev.as_p2sh() {
        prev = redeem_for(ring, &hash)?;
    }
    Ok(if prev.is_witness_program() {
        SigVersion::WitnessV0
    } else {
        SigVersion::Base
    })
}

fn resolve(coin: &Coin, ring: &KeyRing) -> Result<(ScriptBuf, SigVersion), SigningError> {
    let mut prev = coin.script.clone();
    if let Some(hash) = prev.as_p2sh() {
        prev = redeem_for(ring, &hash)?;
    }

    if let Some(hash) = prev.as_p2wsh() {
        return Ok((redeem_for(ring, &hash)?, SigVersion::WitnessV0));
    }
    if let Some(hash) = prev.as_p2wpkh() {
        return Ok((p2pkh(&hash), SigVersion::WitnessV0));
    }
    if prev.is_witness_program() {
        return Err(unsupported(&prev));
    }
    Ok((prev, SigVersion::Base))
}

/// The script substituted into the signature hash for `coin`
pub fn resolve_preimage_script(coin: &Coin, ring: &KeyRing) -> Result<ScriptBuf, SigningError> {
    Ok(resolve(coin, ring)?.0)
}

/// Sign input `index` with `private_key`
///
/// Returns a DER signature followed by the sighash type byte.
pub fn compute_signature(
    tx: &Transaction,
    index: usize,
    coin: &Coin,
    ring: &KeyRing,
    private_key: &SecretKey,
    sighash_type: EcdsaSighashType,
) -> Result<Vec<u8>, SigningError> {
    let (script, version) = resolve(coin, ring)?;
    let digest = signature_hash(tx, index, &script, coin.value, sighash_type, version)?;
    let mut signature = sign_digest(private_key, &digest)?;
    signature.push(sighash_type.to_u32() as u8);
    Ok(signature)
}

/// Check a signature for input `index` against `ring.public_key`
pub fn verify_signature(
    tx: &Transaction,
    index: usize,
    coin: &Coin,
    ring: &KeyRing,
    signature: &[u8],
) -> Result<bool, SigningError> {
    let Some((&type_byte, der)) = signature.split_last() else {
        return Ok(false);
    };
    let Ok(sighash_type) = EcdsaSighashType::from_standard(u32::from(type_byte)) else {
        return Ok(false);
    };

    let (script, version) = resolve(coin, ring)?;
    let digest = signature_hash(tx, index, &script, coin.value, sighash_type, version)?;
    Ok(verify_digest(&ring.public_key, &digest, der)?)
}

fn placement(coin: &Coin, ring: &KeyRing) -> Result<Placement, SigningError> {
    let mut prev = coin.script.clone();
    let mut redeem = None;
    let mut program = None;
    let mut witness_script = None;
    let mut witness = false;

    if let Some(hash) = prev.as_p2sh() {
        let script = redeem_for(ring, &hash)?;
        if script.is_witness_program() {
            program = Some(script.clone());
        } else {
            redeem = Some(script.clone());
        }
        prev = script;
    }

    if let Some(hash) = prev.as_p2wsh() {
        let script = redeem_for(ring, &hash)?;
        witness_script = Some(script.clone());
        prev = script;
        witness = true;
    } else if let Some(hash) = prev.as_p2wpkh() {
        prev = p2pkh(&hash);
        witness = true;
    } else if prev.is_witness_program() {
        return Err(unsupported(&prev));
    }

    Ok(Placement {
        prev,
        redeem,
        program,
        witness_script,
        witness,
    })
}

/// Empty stack for a script, with a slot for every signature it takes
fn template(prev: &Script, ring: &KeyRing) -> Result<Vec<Vec<u8>>, SigningError> {
    if prev.as_p2pk().is_some() {
        return Ok(vec![Vec::new()]);
    }
    if prev.as_p2pkh().is_some() {
        return Ok(vec![Vec::new(), ring.public_key.serialize().to_vec()]);
    }
    if let Some((_, keys)) = prev.as_multisig() {
        return Ok(vec![Vec::new(); keys.len() + 1]);
    }
    Err(unsupported(prev))
}

/// Put `signature` into its slot; false if there is no free slot for this key
fn sign_vector(
    prev: &Script,
    vector: &mut Vec<Vec<u8>>,
    signature: &[u8],
    ring: &KeyRing,
) -> bool {
    if let Some(key) = prev.as_p2pk() {
        if key != ring.public_key || vector.len() != 1 || !vector[0].is_empty() {
            return false;
        }
        vector[0] = signature.to_vec();
        return true;
    }

    if let Some(hash) = prev.as_p2pkh() {
        if hash != ring.key_hash() || vector.len() != 2 || !vector[0].is_empty() {
            return false;
        }
        vector[0] = signature.to_vec();
        return true;
    }

    let Some((m, keys)) = prev.as_multisig() else {
        return false;
    };
    if vector.is_empty() || !vector[0].is_empty() {
        return false;
    }

    let mut total = vector[1..].iter().filter(|item| !item.is_empty()).count();
    if total >= m || vector.len() != keys.len() + 1 {
        return false;
    }

    let Some(key_index) = keys.iter().position(|key| *key == ring.public_key) else {
        return false;
    };
    if !vector[key_index + 1].is_empty() {
        return false;
    }
    vector[key_index + 1] = signature.to_vec();
    total += 1;

    if total >= m {
        let dummy = vector.remove(0);
        vector.retain(|item| !item.is_empty());
        vector.insert(0, dummy);
    }
    true
}

/// Place a signature in input `index`
///
/// The input is templated first if it carries no script data yet. Returns
/// `Ok(false)` without touching the transaction when verification was
/// requested and failed, or when no slot accepts the signature.
pub fn apply_signature(
    tx: &mut Transaction,
    index: usize,
    coin: &Coin,
    ring: &KeyRing,
    signature: &[u8],
    verify: bool,
) -> Result<bool, SigningError> {
    if index >= tx.input.len() {
        return Err(SigningError::InputOutOfRange {
            index,
            count: tx.input.len(),
        });
    }
    if verify && !verify_signature(tx, index, coin, ring, signature)? {
        return Ok(false);
    }

    let place = placement(coin, ring)?;
    let input = &tx.input[index];

    let mut vector = if place.witness {
        let mut stack = input.witness.to_vec();
        if place.witness_script.is_some() {
            stack.pop();
        }
        stack
    } else {
        let mut stack = input
            .script_sig
            .push_items()
            .ok_or_else(|| unsupported(&input.script_sig))?;
        if place.redeem.is_some() {
            stack.pop();
        }
        stack
    };
    if vector.is_empty() {
        vector = template(&place.prev, ring)?;
    }

    if !sign_vector(&place.prev, &mut vector, signature, ring) {
        return Ok(false);
    }

    let input = &mut tx.input[index];
    if place.witness {
        if let Some(script) = place.witness_script {
            vector.push(script.into_bytes());
        }
        input.witness = Witness::from_slice(&vector);
        input.script_sig = match place.program {
            Some(program) => from_pushes(&[program.into_bytes()])?,
            None => ScriptBuf::new(),
        };
    } else {
        if let Some(redeem) = place.redeem {
            vector.push(redeem.into_bytes());
        }
        input.script_sig = from_pushes(&vector)?;
    }
    Ok(true)
}

fn check_lengths(
    tx: &Transaction,
    rings: &[Option<KeyRing>],
    signatures: &[Option<Vec<u8>>],
) -> Result<(), SigningError> {
    if rings.len() != tx.input.len() || signatures.len() != tx.input.len() {
        return Err(SigningError::LengthMismatch {
            inputs: tx.input.len(),
            rings: rings.len(),
            signatures: signatures.len(),
        });
    }
    Ok(())
}

fn coin_at<'a>(
    view: &'a CoinView,
    tx: &Transaction,
    index: usize,
) -> Result<&'a Coin, SigningError> {
    view.coin_for(tx, index).ok_or_else(|| {
        log::error!("No coin for input {} of {}", index, tx.unsigned_id());
        SigningError::MissingCoin(index)
    })
}

/// Apply one signature per input, all or nothing
///
/// `rings[i]` and `signatures[i]` must both be present or both absent.
/// Returns `Ok(false)` and leaves `tx` untouched if any input fails.
pub fn apply_all(
    tx: &mut Transaction,
    view: &CoinView,
    rings: &[Option<KeyRing>],
    signatures: &[Option<Vec<u8>>],
    verify: bool,
) -> Result<bool, SigningError> {
    check_lengths(tx, rings, signatures)?;

    let mut scratch = tx.clone();
    for (index, (ring, signature)) in rings.iter().zip(signatures).enumerate() {
        let (ring, signature) = match (ring, signature) {
            (None, None) => continue,
            (Some(ring), Some(signature)) => (ring, signature),
            _ => return Ok(false),
        };
        let coin = coin_at(view, tx, index)?;
        if !apply_signature(&mut scratch, index, coin, ring, signature, verify)? {
            return Ok(false);
        }
    }

    *tx = scratch;
    Ok(true)
}

/// Number of supplied signatures that verify against their ring
pub fn check_all(
    tx: &Transaction,
    view: &CoinView,
    rings: &[Option<KeyRing>],
    signatures: &[Option<Vec<u8>>],
) -> Result<usize, SigningError> {
    check_lengths(tx, rings, signatures)?;

    let mut valid = 0;
    for (index, (ring, signature)) in rings.iter().zip(signatures).enumerate() {
        if let (Some(ring), Some(signature)) = (ring, signature) {
            let coin = coin_at(view, tx, index)?;
            if verify_signature(tx, index, coin, ring, signature)? {
                valid += 1;
            }
        }
    }
    Ok(valid)
}
