//! Transaction signing
//!
//! Key rings plus the engine that computes, verifies and assembles
//! partial signatures into a fully signed transaction.

pub mod engine;
pub mod keyring;
pub mod verify;

use thiserror::Error;

pub use engine::{
    apply_all, apply_signature, check_all, classify_coin, compute_signature,
    resolve_preimage_script, verify_signature,
};
pub use keyring::{KeyPath, KeyRing};
pub use verify::verify_transaction;

/// Signing and verification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The ring has no script for a script hash it should own
    #[error("No redeem script for hash {0}")]
    MissingRedeem(String),
    /// An input's coin is not in the view
    #[error("Coin for input {0} not found")]
    MissingCoin(usize),
    #[error("Unsupported script: {0}")]
    UnsupportedScript(String),
    #[error("Input index {index} out of range ({count} inputs)")]
    InputOutOfRange { index: usize, count: usize },
    #[error("Expected {inputs} entries, got {rings} rings and {signatures} signatures")]
    LengthMismatch {
        inputs: usize,
        rings: usize,
        signatures: usize,
    },
    #[error("Input {index} failed verification: {reason}")]
    Verification { index: usize, reason: &'static str },
    #[error("Script error: {0}")]
    Script(#[from] crate::core::ScriptError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] crate::core::TransactionError),
    #[error("Key error: {0}")]
    Key(#[from] crate::crypto::KeyError),
}

impl SigningError {
    /// Whether this error means the ledger and the caller's view disagree
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            SigningError::MissingRedeem(_) | SigningError::MissingCoin(_)
        )
    }
}
