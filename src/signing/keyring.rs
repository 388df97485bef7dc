//! Key rings
//!
//! A ring is the key material needed to sign or verify one input: the
//! public key, optionally the private key, and for script-hash outputs the
//! redeem or witness script together with how it is wrapped.

use bitcoin::bip32::{self, ChildNumber};
use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

use crate::core::script::{p2pkh, p2sh, p2wpkh, p2wsh};
use crate::core::ScriptBuf;
use crate::crypto::{hash160, sha256, KeyPair};

/// Position of a key in the wallet's derivation tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath {
    /// 0 for receive addresses, 1 for change
    pub branch: u32,
    pub index: u32,
}

impl KeyPath {
    pub fn new(branch: u32, index: u32) -> Self {
        Self { branch, index }
    }

    /// The unhardened `branch/index` steps below an account key
    pub fn child_numbers(&self) -> Result<[ChildNumber; 2], bip32::Error> {
        Ok([
            ChildNumber::from_normal_idx(self.branch)?,
            ChildNumber::from_normal_idx(self.index)?,
        ])
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct KeyRing {
    pub public_key: PublicKey,
    pub private_key: Option<SecretKey>,
    /// Redeem script (legacy) or witness script (segwit)
    pub script: Option<ScriptBuf>,
    pub witness: bool,
    /// Witness program wrapped in P2SH
    pub nested: bool,
    pub path: Option<KeyPath>,
}

impl KeyRing {
    /// A watch-only ring for a single key
    pub fn from_public(public_key: PublicKey) -> Self {
        Self {
            public_key,
            private_key: None,
            script: None,
            witness: false,
            nested: false,
            path: None,
        }
    }

    /// A signing ring for a single key
    pub fn from_private(private_key: SecretKey) -> Self {
        let pair = KeyPair::from_secret_key(private_key);
        let mut ring = Self::from_public(pair.public_key);
        ring.private_key = Some(pair.secret_key);
        ring
    }

    pub fn with_script(mut self, script: ScriptBuf, witness: bool, nested: bool) -> Self {
        self.script = Some(script);
        self.witness = witness;
        self.nested = witness && nested;
        self
    }

    pub fn with_path(mut self, path: KeyPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn key_hash(&self) -> [u8; 20] {
        hash160(&self.public_key.serialize())
    }

    /// Witness program for this ring (P2WSH for scripts, P2WPKH otherwise)
    pub fn program(&self) -> ScriptBuf {
        match &self.script {
            Some(script) => p2wsh(script),
            None => p2wpkh(&self.key_hash()),
        }
    }

    /// Look up the script committed to by a script hash
    ///
    /// Accepts a 20-byte P2SH hash or a 32-byte P2WSH hash.
    pub fn get_redeem(&self, hash: &[u8]) -> Option<ScriptBuf> {
        if self.nested {
            let program = self.program();
            if hash160(program.as_bytes())[..] == *hash {
                return Some(program);
            }
        }

        let script = self.script.as_ref()?;
        match hash.len() {
            20 if hash160(script.as_bytes())[..] == *hash => Some(script.clone()),
            32 if sha256(script.as_bytes())[..] == *hash => Some(script.clone()),
            _ => None,
        }
    }

    /// The output script this ring can spend
    pub fn output_script(&self) -> ScriptBuf {
        if self.witness {
            let program = self.program();
            if self.nested {
                return p2sh(&program);
            }
            return program;
        }

        match &self.script {
            Some(script) => p2sh(script),
            None => p2pkh(&self.key_hash()),
        }
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("public_key", &hex::encode(self.public_key.serialize()))
            .field("private_key", &self.private_key.map(|_| "[REDACTED]"))
            .field("script", &self.script)
            .field("witness", &self.witness)
            .field("nested", &self.nested)
            .field("path", &self.path)
            .finish()
    }
}
