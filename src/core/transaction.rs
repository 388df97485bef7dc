//! Transaction handling
//!
//! Transactions are `bitcoin::Transaction`. On top of them this module adds:
//! - Coins and coin views describing the outputs being spent
//! - A signature-independent id for recognising "the same spend"
//! - Legacy and BIP143 (witness v0) signature hashes via `SighashCache`
//! - A small builder for unsigned transactions

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{Amount, EcdsaSighashType, Script, ScriptBuf, Sequence, Witness};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use bitcoin::{OutPoint, Transaction, TxIn, TxOut, Txid};

/// Signature hash algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    /// Original algorithm, used for bare and P2SH spends
    Base,
    /// BIP143, used for witness v0 spends (native or nested)
    WitnessV0,
}

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Input index {index} out of range ({count} inputs)")]
    InputOutOfRange { index: usize, count: usize },
    #[error("Signature hash error: {0}")]
    Sighash(String),
    #[error("Decoding error: {0}")]
    Decode(String),
}

// =============================================================================
// Coins
// =============================================================================

/// An unspent output together with where it lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    /// Amount in satoshis
    pub value: u64,
    pub script: ScriptBuf,
    /// Confirmation height, `None` while unconfirmed
    pub height: Option<u32>,
}

impl Coin {
    pub fn from_tx(tx: &Transaction, vout: u32, height: Option<u32>) -> Option<Self> {
        let output = tx.output.get(vout as usize)?;
        Some(Self {
            outpoint: OutPoint::new(tx.compute_txid(), vout),
            value: output.value.to_sat(),
            script: output.script_pubkey.clone(),
            height,
        })
    }
}

/// The set of coins a transaction spends, keyed by outpoint
#[derive(Debug, Clone, Default)]
pub struct CoinView {
    coins: HashMap<OutPoint, Coin>,
}

impl CoinView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, coin: Coin) {
        self.coins.insert(coin.outpoint, coin);
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    /// The coin spent by input `index` of `tx`
    pub fn coin_for(&self, tx: &Transaction, index: usize) -> Option<&Coin> {
        tx.input
            .get(index)
            .and_then(|input| self.get(&input.previous_output))
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl FromIterator<Coin> for CoinView {
    fn from_iter<I: IntoIterator<Item = Coin>>(iter: I) -> Self {
        let mut view = CoinView::new();
        for coin in iter {
            view.add(coin);
        }
        view
    }
}

// =============================================================================
// Transaction helpers
// =============================================================================

/// Coordinator-side queries on a [`Transaction`]
pub trait TransactionExt {
    /// Outpoints spent, in input order
    fn prevouts(&self) -> Vec<OutPoint>;

    /// Id of the transaction with every scriptSig and witness stripped
    ///
    /// Signing does not change this value, so it identifies "the same spend"
    /// before and after signatures are applied.
    fn unsigned_id(&self) -> Txid;

    /// Sum of output values, `None` on overflow
    fn total_output(&self) -> Option<u64>;
}

impl TransactionExt for Transaction {
    fn prevouts(&self) -> Vec<OutPoint> {
        self.input.iter().map(|input| input.previous_output).collect()
    }

    fn unsigned_id(&self) -> Txid {
        let mut stripped = self.clone();
        for input in &mut stripped.input {
            input.script_sig = ScriptBuf::new();
            input.witness.clear();
        }
        stripped.compute_txid()
    }

    fn total_output(&self) -> Option<u64> {
        self.output
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value.to_sat()))
    }
}

/// Consensus serialization, including witness data when present
pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    encode::serialize(tx)
}

/// Decode a consensus-serialized transaction, rejecting trailing bytes
pub fn decode_transaction(data: &[u8]) -> Result<Transaction, TransactionError> {
    encode::deserialize(data).map_err(|e| TransactionError::Decode(e.to_string()))
}

pub fn transaction_from_hex(text: &str) -> Result<Transaction, TransactionError> {
    let bytes = hex::decode(text).map_err(|e| TransactionError::Decode(format!("hex: {}", e)))?;
    decode_transaction(&bytes)
}

// =============================================================================
// Signature hashes
// =============================================================================

/// Digest signed by input `index` under the selected algorithm
///
/// For `WitnessV0` the script code is the witness script, or the P2PKH
/// script of the key for a P2WPKH spend.
pub fn signature_hash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: EcdsaSighashType,
    version: SigVersion,
) -> Result<[u8; 32], TransactionError> {
    if index >= tx.input.len() {
        return Err(TransactionError::InputOutOfRange {
            index,
            count: tx.input.len(),
        });
    }

    let mut cache = SighashCache::new(tx);
    match version {
        SigVersion::Base => cache
            .legacy_signature_hash(index, script_code, sighash_type.to_u32())
            .map(|hash| hash.to_byte_array())
            .map_err(|e| TransactionError::Sighash(e.to_string())),
        SigVersion::WitnessV0 => cache
            .p2wsh_signature_hash(index, script_code, Amount::from_sat(value), sighash_type)
            .map(|hash| hash.to_byte_array())
            .map_err(|e| TransactionError::Sighash(e.to_string())),
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for unsigned transactions
pub struct TransactionBuilder {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an input spending a coin
    pub fn add_input(mut self, coin: &Coin) -> Self {
        self.inputs.push(TxIn {
            previous_output: coin.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
        self
    }

    /// Add an output
    pub fn add_output(mut self, script_pubkey: ScriptBuf, value: u64) -> Self {
        self.outputs.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        });
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: self.inputs,
            output: self.outputs,
        }
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
