//! Cosigner identity
//!
//! One party to a multisig wallet: an ordinal id, a display name, the key
//! that authenticates the party's proofs, and the extended public key that
//! wallet signing keys are derived from.

use bitcoin::bip32;
use rand::RngCore;
use secp256k1::{PublicKey, Secp256k1};
use serde::{Deserialize, Serialize};

use super::wallet::WalletError;
use crate::crypto::{sha256, MessageSignature, Xpub};
use crate::signing::KeyPath;

/// Longest accepted cosigner or wallet name
pub const MAX_NAME_LENGTH: usize = 40;

/// Whether `name` uses only `[A-Za-z0-9_-]` and is 1 to 40 bytes long
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A party to a multisig wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cosigner {
    /// Ordinal assigned at join time, 0 is the wallet creator
    pub id: u8,
    pub name: String,
    pub auth_pub_key: PublicKey,
    pub xpub: Xpub,
    pub token_depth: u32,
    #[serde(skip)]
    token: [u8; 32],
}

impl Cosigner {
    pub fn new(
        id: u8,
        name: &str,
        auth_pub_key: PublicKey,
        xpub: Xpub,
    ) -> Result<Self, WalletError> {
        if !is_valid_name(name) {
            return Err(WalletError::InvalidName(name.to_string()));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            auth_pub_key,
            xpub,
            token_depth: 0,
            token: [0u8; 32],
        })
    }

    /// Signing key of this cosigner at `path`
    pub fn derive_key(&self, path: KeyPath) -> Result<PublicKey, bip32::Error> {
        let secp = Secp256k1::verification_only();
        Ok(self.xpub.derive_pub(&secp, &path.child_numbers()?)?.public_key)
    }

    /// Check a proof made with this cosigner's authentication key
    pub fn verify_proof(&self, payload: &[u8], signature: &MessageSignature) -> bool {
        signature.verify(&self.auth_pub_key, payload)
    }

    /// Payload signed when joining `wallet_name`
    ///
    /// `walletName || cosignerName || authPubKey || rawXpub`
    pub fn join_payload(&self, wallet_name: &str) -> Vec<u8> {
        let mut payload = Vec::with_capacity(wallet_name.len() + self.name.len() + 33 + 78);
        payload.extend_from_slice(wallet_name.as_bytes());
        payload.extend_from_slice(self.name.as_bytes());
        payload.extend_from_slice(&self.auth_pub_key.serialize());
        payload.extend_from_slice(&self.xpub.encode());
        payload
    }

    pub fn verify_join(&self, wallet_name: &str, signature: &MessageSignature) -> bool {
        self.verify_proof(&self.join_payload(wallet_name), signature)
    }

    /// Replace the session token, returning the new one
    pub fn retoken(&mut self) -> [u8; 32] {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        self.token = token;
        self.token_depth += 1;
        token
    }

    /// Compare a presented token against the current one
    pub fn check_token(&self, token: &[u8; 32]) -> bool {
        if self.token_depth == 0 {
            return false;
        }
        sha256(token) == sha256(&self.token)
    }
}
