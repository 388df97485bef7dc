//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256, double SHA-256 and HASH160 digests
//! - ECDSA key management (secp256k1)
//! - Recoverable message signatures for proposal proofs
//! - BIP32 extended keys (re-exported from `bitcoin::bip32`)

pub mod hash;
pub mod keys;
pub mod message;

pub use bitcoin::bip32::{Xpriv, Xpub};
pub use hash::{double_sha256, hash160, sha256, sha256_hex};
pub use keys::{public_key_from_hex, sign_digest, verify_digest, KeyError, KeyPair};
pub use message::{message_hash, sign_message, MessageSignature, MESSAGE_SIGNATURE_SIZE};
