//! Script templates
//!
//! Scripts themselves are `bitcoin::ScriptBuf`. This module adds the
//! handful of template recognisers the coordinator needs on top of them:
//! pubkey, pubkey-hash, script-hash, witness programs and bare m-of-n
//! multisig, plus builders for sorted multisig and push-only scripts.

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{PubkeyHash, Script, ScriptBuf, WPubkeyHash};
use secp256k1::PublicKey;
use thiserror::Error;

/// Maximum keys in a multisig script built by this crate
pub const MAX_MULTISIG_KEYS: usize = 15;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid multisig: {m}-of-{n}")]
    InvalidMultisig { m: usize, n: usize },
    #[error("Push of {0} bytes is too large")]
    PushTooLarge(usize),
}

// =============================================================================
// Script Types
// =============================================================================

/// The standard template a script matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// `<pubkey> OP_CHECKSIG`
    PubKey,
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    PubKeyHash,
    /// `OP_HASH160 <20> OP_EQUAL`
    ScriptHash,
    /// `OP_0 <20>`
    WitnessPubKeyHash,
    /// `OP_0 <32>`
    WitnessScriptHash,
    /// `<m> <pubkey>... <n> OP_CHECKMULTISIG`
    MultiSig,
    NonStandard,
}

impl ScriptType {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptType::PubKey => "pubkey",
            ScriptType::PubKeyHash => "pubkeyhash",
            ScriptType::ScriptHash => "scripthash",
            ScriptType::WitnessPubKeyHash => "witness_v0_keyhash",
            ScriptType::WitnessScriptHash => "witness_v0_scripthash",
            ScriptType::MultiSig => "multisig",
            ScriptType::NonStandard => "nonstandard",
        }
    }
}

/// Small integer pushed by `OP_1` through `OP_16`
fn pushnum(op: Opcode) -> Option<usize> {
    let byte = op.to_u8();
    if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&byte) {
        Some((byte - OP_PUSHNUM_1.to_u8() + 1) as usize)
    } else {
        None
    }
}

fn slice<const N: usize>(bytes: &[u8], start: usize) -> Option<[u8; N]> {
    bytes.get(start..start + N)?.try_into().ok()
}

// =============================================================================
// Template recognition
// =============================================================================

/// Template accessors for [`Script`]
pub trait ScriptTemplates {
    /// Key of a `<pubkey> OP_CHECKSIG` script
    fn as_p2pk(&self) -> Option<PublicKey>;
    fn as_p2pkh(&self) -> Option<[u8; 20]>;
    fn as_p2sh(&self) -> Option<[u8; 20]>;
    fn as_p2wpkh(&self) -> Option<[u8; 20]>;
    fn as_p2wsh(&self) -> Option<[u8; 32]>;
    /// Threshold and keys of a bare multisig script
    fn as_multisig(&self) -> Option<(usize, Vec<PublicKey>)>;
    /// Every pushed item, or `None` if the script is not push-only
    fn push_items(&self) -> Option<Vec<Vec<u8>>>;
    fn template(&self) -> ScriptType;
}

impl ScriptTemplates for Script {
    fn as_p2pk(&self) -> Option<PublicKey> {
        if !self.is_p2pk() {
            return None;
        }
        match self.instructions().next()? {
            Ok(Instruction::PushBytes(bytes)) => PublicKey::from_slice(bytes.as_bytes()).ok(),
            _ => None,
        }
    }

    fn as_p2pkh(&self) -> Option<[u8; 20]> {
        self.is_p2pkh().then(|| slice(self.as_bytes(), 3)).flatten()
    }

    fn as_p2sh(&self) -> Option<[u8; 20]> {
        self.is_p2sh().then(|| slice(self.as_bytes(), 2)).flatten()
    }

    fn as_p2wpkh(&self) -> Option<[u8; 20]> {
        self.is_p2wpkh().then(|| slice(self.as_bytes(), 2)).flatten()
    }

    fn as_p2wsh(&self) -> Option<[u8; 32]> {
        self.is_p2wsh().then(|| slice(self.as_bytes(), 2)).flatten()
    }

    fn as_multisig(&self) -> Option<(usize, Vec<PublicKey>)> {
        let mut items = Vec::new();
        for instruction in self.instructions() {
            items.push(instruction.ok()?);
        }
        let (first, rest) = items.split_first()?;
        let (last, rest) = rest.split_last()?;
        let (count, keys) = rest.split_last()?;

        let m = match first {
            Instruction::Op(op) => pushnum(*op)?,
            _ => return None,
        };
        let n = match count {
            Instruction::Op(op) => pushnum(*op)?,
            _ => return None,
        };
        if *last != Instruction::Op(OP_CHECKMULTISIG) || keys.len() != n || m > n {
            return None;
        }

        let keys = keys
            .iter()
            .map(|item| match item {
                Instruction::PushBytes(bytes) => PublicKey::from_slice(bytes.as_bytes()).ok(),
                Instruction::Op(_) => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some((m, keys))
    }

    fn push_items(&self) -> Option<Vec<Vec<u8>>> {
        self.instructions()
            .map(|instruction| match instruction {
                Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
                _ => None,
            })
            .collect()
    }

    fn template(&self) -> ScriptType {
        if self.as_p2pk().is_some() {
            ScriptType::PubKey
        } else if self.is_p2pkh() {
            ScriptType::PubKeyHash
        } else if self.is_p2sh() {
            ScriptType::ScriptHash
        } else if self.is_p2wpkh() {
            ScriptType::WitnessPubKeyHash
        } else if self.is_p2wsh() {
            ScriptType::WitnessScriptHash
        } else if self.as_multisig().is_some() {
            ScriptType::MultiSig
        } else {
            ScriptType::NonStandard
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

/// `<m> <keys...> <n> OP_CHECKMULTISIG` with keys in the given order
pub fn multisig(m: usize, keys: &[PublicKey]) -> Result<ScriptBuf, ScriptError> {
    let n = keys.len();
    if m == 0 || m > n || n > MAX_MULTISIG_KEYS {
        return Err(ScriptError::InvalidMultisig { m, n });
    }

    let mut builder = Builder::new().push_int(m as i64);
    for key in keys {
        builder = builder.push_key(&bitcoin::PublicKey::new(*key));
    }
    Ok(builder
        .push_int(n as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// Multisig script with keys sorted by their compressed encoding
pub fn sorted_multisig(m: usize, keys: &[PublicKey]) -> Result<ScriptBuf, ScriptError> {
    let mut sorted = keys.to_vec();
    sorted.sort_by_key(|key| key.serialize());
    multisig(m, &sorted)
}

/// A push-only script pushing `items` in order
pub fn from_pushes(items: &[Vec<u8>]) -> Result<ScriptBuf, ScriptError> {
    let mut builder = Builder::new();
    for item in items {
        let push = PushBytesBuf::try_from(item.clone())
            .map_err(|_| ScriptError::PushTooLarge(item.len()))?;
        builder = builder.push_slice(push);
    }
    Ok(builder.into_script())
}

pub fn p2pkh(hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(*hash))
}

pub fn p2wpkh(hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(*hash))
}

/// P2SH output committing to `script`
pub fn p2sh(script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2sh(&script.script_hash())
}

/// P2WSH output committing to `script`
pub fn p2wsh(script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&script.wscript_hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash160, sha256, KeyPair};

    fn keys(n: usize) -> Vec<PublicKey> {
        (0..n).map(|_| KeyPair::generate().public_key).collect()
    }

    #[test]
    fn test_p2pkh_template() {
        let script = p2pkh(&[7; 20]);
        assert_eq!(script.len(), 25);
        assert_eq!(script.as_p2pkh(), Some([7; 20]));
        assert_eq!(script.as_p2sh(), None);
        assert_eq!(script.template(), ScriptType::PubKeyHash);
    }

    #[test]
    fn test_hash_templates_commit_to_script() {
        let redeem = sorted_multisig(1, &keys(2)).unwrap();

        let legacy = p2sh(&redeem);
        assert_eq!(legacy.as_p2sh(), Some(hash160(redeem.as_bytes())));
        assert_eq!(legacy.template(), ScriptType::ScriptHash);

        let witness = p2wsh(&redeem);
        assert_eq!(witness.as_p2wsh(), Some(sha256(redeem.as_bytes())));
        assert!(witness.is_witness_program());
        assert_eq!(witness.template(), ScriptType::WitnessScriptHash);

        let key = p2wpkh(&[3; 20]);
        assert_eq!(key.as_p2wpkh(), Some([3; 20]));
        assert_eq!(key.template().type_name(), "witness_v0_keyhash");
    }

    #[test]
    fn test_multisig_roundtrip() {
        let pubs = keys(3);
        let script = multisig(2, &pubs).unwrap();
        assert_eq!(script.as_multisig(), Some((2, pubs)));
        assert_eq!(script.template(), ScriptType::MultiSig);
    }

    #[test]
    fn test_sorted_multisig_is_order_independent() {
        let pubs = keys(3);
        let mut reversed = pubs.clone();
        reversed.reverse();
        assert_eq!(
            sorted_multisig(2, &pubs).unwrap(),
            sorted_multisig(2, &reversed).unwrap()
        );
    }

    #[test]
    fn test_multisig_validation() {
        let pubs = keys(2);
        assert_eq!(
            multisig(0, &pubs),
            Err(ScriptError::InvalidMultisig { m: 0, n: 2 })
        );
        assert_eq!(
            multisig(3, &pubs),
            Err(ScriptError::InvalidMultisig { m: 3, n: 2 })
        );
        assert!(multisig(1, &keys(16)).is_err());
    }

    #[test]
    fn test_pushes() {
        let items = vec![Vec::new(), vec![1, 2, 3], vec![0xab; 300]];
        let script = from_pushes(&items).unwrap();
        assert_eq!(script.push_items(), Some(items));

        let not_push_only = multisig(1, &keys(1)).unwrap();
        assert_eq!(not_push_only.push_items(), None);
    }

    #[test]
    fn test_p2pk_template() {
        let key = KeyPair::generate().public_key;
        let script = Builder::new()
            .push_key(&bitcoin::PublicKey::new(key))
            .push_opcode(bitcoin::opcodes::all::OP_CHECKSIG)
            .into_script();
        assert_eq!(script.as_p2pk(), Some(key));
        assert_eq!(script.template(), ScriptType::PubKey);
    }
}
