//! Signed message proofs
//!
//! Creation, rejection and join proofs are 65-byte compact recoverable
//! signatures over the Bitcoin signed-message hash of a payload.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::hash::double_sha256;
use super::keys::KeyError;
use crate::core::encoding::write_var_bytes;

/// Prefix mixed into every message hash so that proofs can never be
/// replayed as transaction signatures.
pub const MESSAGE_MAGIC: &str = "Bitcoin Signed Message:\n";

/// Size of a serialized message signature
pub const MESSAGE_SIGNATURE_SIZE: usize = 65;

/// Domain-separated hash of a message payload
pub fn message_hash(payload: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(MESSAGE_MAGIC.len() + payload.len() + 10);
    write_var_bytes(&mut data, MESSAGE_MAGIC.as_bytes());
    write_var_bytes(&mut data, payload);
    double_sha256(&data)
}

/// A 65-byte recoverable signature: header byte followed by `r || s`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MessageSignature(pub [u8; MESSAGE_SIGNATURE_SIZE]);

impl MessageSignature {
    /// Parse from a byte slice, requiring exactly 65 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; MESSAGE_SIGNATURE_SIZE] =
            bytes.try_into().map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self(array))
    }

    /// Parse from a hex string
    pub fn from_hex(hex_sig: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_sig).map_err(|_| KeyError::InvalidSignature)?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Recover the public key that produced this signature over `payload`
    pub fn recover(&self, payload: &[u8]) -> Result<PublicKey, KeyError> {
        let header = self.0[0];
        if !(27..=34).contains(&header) {
            return Err(KeyError::InvalidSignature);
        }
        let recid = RecoveryId::from_i32(i32::from((header - 27) & 3))?;
        let sig = RecoverableSignature::from_compact(&self.0[1..], recid)?;
        let message = Message::from_digest(message_hash(payload));

        Ok(Secp256k1::verification_only().recover_ecdsa(&message, &sig)?)
    }

    /// Check that this signature over `payload` was made by `public_key`
    pub fn verify(&self, public_key: &PublicKey, payload: &[u8]) -> bool {
        match self.recover(payload) {
            Ok(recovered) => recovered == *public_key,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for MessageSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageSignature({})", self.to_hex())
    }
}

impl Serialize for MessageSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MessageSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Sign `payload` with the message hash scheme (compressed key header)
pub fn sign_message(secret_key: &SecretKey, payload: &[u8]) -> MessageSignature {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(message_hash(payload));
    let (recid, compact) = secp
        .sign_ecdsa_recoverable(&message, secret_key)
        .serialize_compact();

    let mut out = [0u8; MESSAGE_SIGNATURE_SIZE];
    // 27 + recid, +4 marks a compressed public key
    out[0] = 27 + 4 + recid.to_i32() as u8;
    out[1..].copy_from_slice(&compact);
    MessageSignature(out)
}
