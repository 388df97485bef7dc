//! In-process ledger
//!
//! Tracks the coins of one multisig wallet in memory. Used by the demo
//! binary and by tests; a production deployment plugs a full wallet
//! engine in behind [`LedgerPort`] instead.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Balance, LedgerError, LedgerPort};
use bitcoin::hashes::Hash;

use crate::core::{
    Coin, CoinView, OutPoint, ScriptBuf, Transaction, TransactionBuilder, TransactionExt, TxOut,
    Txid,
};
use crate::crypto::double_sha256;
use crate::multisig::{Cosigner, MultisigWallet, ProposalOptions};
use crate::signing::{KeyPath, KeyRing};

/// Fee rate used when a proposal does not name one (per 1000 bytes)
pub const DEFAULT_FEE_RATE: u64 = 1_000;

/// Change below this value is added to the fee
pub const DUST_THRESHOLD: u64 = 546;

const RECEIVE_BRANCH: u32 = 0;
const CHANGE_BRANCH: u32 = 1;

/// Rough serialized size for fee purposes
fn estimate_size(inputs: usize, outputs: usize) -> u64 {
    (10 + inputs * 150 + outputs * 43) as u64
}

fn fee_for(rate: u64, inputs: usize, outputs: usize) -> Result<u64, LedgerError> {
    rate.checked_mul(estimate_size(inputs, outputs))
        .map(|scaled| scaled / 1000)
        .ok_or(LedgerError::AmountOverflow("fee"))
}

#[derive(Default)]
struct LedgerState {
    /// Unspent wallet coins and their derivation paths
    coins: BTreeMap<OutPoint, (Coin, KeyPath)>,
    broadcasts: Vec<Transaction>,
    next_receive: u32,
    next_change: u32,
    funding_nonce: u64,
}

pub struct MemoryLedger {
    wallet: MultisigWallet,
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new(wallet: MultisigWallet) -> Self {
        Self {
            wallet,
            state: RwLock::new(LedgerState::default()),
        }
    }

    pub fn wallet(&self) -> &MultisigWallet {
        &self.wallet
    }

    /// Credit the wallet with a new confirmed coin at the next receive path
    pub async fn fund(&self, value: u64) -> Result<Coin, LedgerError> {
        Ok(self.receive(value).await?.1)
    }

    /// Like [`fund`](Self::fund), also returning the funding transaction
    pub async fn receive(&self, value: u64) -> Result<(Transaction, Coin), LedgerError> {
        let mut state = self.state.write().await;
        let path = KeyPath::new(RECEIVE_BRANCH, state.next_receive);
        state.next_receive += 1;
        state.funding_nonce += 1;

        // Funding inputs come from outside the wallet
        let source = Coin {
            outpoint: OutPoint::new(
                Txid::from_byte_array(double_sha256(&state.funding_nonce.to_le_bytes())),
                0,
            ),
            value,
            script: ScriptBuf::new(),
            height: None,
        };
        let tx = TransactionBuilder::new()
            .add_input(&source)
            .add_output(self.wallet.output_script(path)?, value)
            .build();
        let coin = Coin::from_tx(&tx, 0, Some(1)).ok_or(LedgerError::NoOutputs)?;

        state.coins.insert(coin.outpoint, (coin.clone(), path));
        log::debug!("Funded {} with {}", coin.outpoint, value);
        Ok((tx, coin))
    }

    /// Mark the inputs of `tx` as spent
    pub async fn spend(&self, tx: &Transaction) {
        let mut state = self.state.write().await;
        for outpoint in tx.prevouts() {
            state.coins.remove(&outpoint);
        }
    }

    /// Forget a coin, as a reorg removing its funding transaction would
    pub async fn remove_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.state
            .write()
            .await
            .coins
            .remove(outpoint)
            .map(|(coin, _)| coin)
    }

    pub async fn broadcasts(&self) -> Vec<Transaction> {
        self.state.read().await.broadcasts.clone()
    }
}

#[async_trait]
impl LedgerPort for MemoryLedger {
    async fn build_transaction(
        &self,
        options: &ProposalOptions,
        exclude: &HashSet<OutPoint>,
    ) -> Result<Transaction, LedgerError> {
        if options.outputs.is_empty() {
            return Err(LedgerError::NoOutputs);
        }

        let mut state = self.state.write().await;
        let amount = options
            .total_value()
            .ok_or(LedgerError::AmountOverflow("outputs"))?;
        let rate = options.rate.unwrap_or(DEFAULT_FEE_RATE);
        let available = state
            .coins
            .values()
            .filter(|(coin, _)| !exclude.contains(&coin.outpoint))
            .fold(0u64, |total, (coin, _)| total.saturating_add(coin.value));

        // Oldest receive paths first
        let mut candidates: Vec<&(Coin, KeyPath)> = state
            .coins
            .values()
            .filter(|(coin, _)| !exclude.contains(&coin.outpoint))
            .collect();
        candidates.sort_by_key(|(_, path)| (path.branch, path.index));

        // Select coins to cover the amount plus fee
        let mut selected = Vec::new();
        let mut selected_amount = 0u64;
        let mut needed = amount;
        for (coin, _) in candidates {
            selected.push(coin.clone());
            selected_amount = selected_amount.saturating_add(coin.value);
            let fee = fee_for(rate, selected.len(), options.outputs.len() + 1)?;
            needed = amount
                .checked_add(fee)
                .ok_or(LedgerError::AmountOverflow("amount plus fee"))?;
            if selected_amount >= needed {
                break;
            }
        }

        if selected_amount < needed || selected.is_empty() {
            return Err(LedgerError::InsufficientFunds { needed, available });
        }

        let mut builder = TransactionBuilder::new();
        for coin in &selected {
            builder = builder.add_input(coin);
        }
        for TxOut {
            value,
            script_pubkey,
        } in &options.outputs
        {
            builder = builder.add_output(script_pubkey.clone(), value.to_sat());
        }

        // Change back to the wallet
        let change = selected_amount - needed;
        if change >= DUST_THRESHOLD {
            let path = KeyPath::new(CHANGE_BRANCH, state.next_change);
            state.next_change += 1;
            builder = builder.add_output(self.wallet.output_script(path)?, change);
        }

        Ok(builder.build())
    }

    async fn coin_view(&self, tx: &Transaction) -> Result<CoinView, LedgerError> {
        let state = self.state.read().await;
        Ok(tx
            .prevouts()
            .iter()
            .filter_map(|outpoint| state.coins.get(outpoint).map(|(coin, _)| coin.clone()))
            .collect())
    }

    async fn input_paths(&self, tx: &Transaction) -> Result<Vec<Option<KeyPath>>, LedgerError> {
        let state = self.state.read().await;
        Ok(tx
            .prevouts()
            .iter()
            .map(|outpoint| state.coins.get(outpoint).map(|(_, path)| *path))
            .collect())
    }

    async fn derive_keyring(
        &self,
        cosigner: &Cosigner,
        path: KeyPath,
    ) -> Result<KeyRing, LedgerError> {
        Ok(self.wallet.keyring(cosigner.id, path)?)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        let prevouts = tx.prevouts();
        for outpoint in &prevouts {
            if !state.coins.contains_key(outpoint) {
                return Err(LedgerError::Rejected(format!("input {} is not spendable", outpoint)));
            }
        }
        for outpoint in &prevouts {
            state.coins.remove(outpoint);
        }
        state.broadcasts.push(tx.clone());
        log::info!("Broadcast transaction {}", tx.compute_txid());
        Ok(())
    }

    async fn balance(&self) -> Result<Balance, LedgerError> {
        let state = self.state.read().await;
        let mut balance = Balance::default();
        for (coin, _) in state.coins.values() {
            if coin.height.is_some() {
                balance.confirmed = balance.confirmed.saturating_add(coin.value);
            } else {
                balance.unconfirmed = balance.unconfirmed.saturating_add(coin.value);
            }
            balance.coins += 1;
        }
        Ok(balance)
    }
}
