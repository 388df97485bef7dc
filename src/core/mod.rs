//! Core transaction components
//!
//! This module contains the fundamental building blocks:
//! - Binary encoding helpers for proposal records
//! - Script templates and classification (P2PKH, P2SH, P2WSH, MultiSig)
//! - Coins, coin views and signature hashes over `bitcoin` transactions

pub mod encoding;
pub mod script;
pub mod transaction;

pub use bitcoin::{EcdsaSighashType, Script, ScriptBuf, Witness};
pub use encoding::EncodingError;
pub use script::{ScriptError, ScriptTemplates, ScriptType, MAX_MULTISIG_KEYS};
pub use transaction::{
    decode_transaction, encode_transaction, signature_hash, transaction_from_hex, Coin, CoinView,
    OutPoint, SigVersion, Transaction, TransactionBuilder, TransactionError, TransactionExt, TxIn,
    TxOut, Txid,
};
