//! Proposal persistence
//!
//! Reads go straight to the store. Writes are staged into a [`Batch`] so
//! that a proposal, its index markers, its transaction and its coin locks
//! commit together.

use std::sync::Arc;

use crate::core::{decode_transaction, encode_transaction, OutPoint, Transaction};
use crate::multisig::Proposal;
use crate::storage::{layout, Batch, Store};

use super::CoordinatorError;

pub struct ProposalDb {
    store: Arc<dyn Store>,
    m: u8,
    n: u8,
}

impl ProposalDb {
    /// `m` and `n` are attached to every decoded record
    pub fn new(store: Arc<dyn Store>, m: u8, n: u8) -> Self {
        Self { store, m, n }
    }

    pub async fn write(&self, batch: Batch) -> Result<(), CoordinatorError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.write(batch).await?;
        Ok(())
    }

    // =========================================================================
    // Proposals
    // =========================================================================

    /// Next proposal id
    pub async fn depth(&self) -> Result<u32, CoordinatorError> {
        match self.store.get(&layout::depth()).await? {
            None => Ok(0),
            Some(raw) => {
                let bytes: [u8; 4] = raw.as_slice().try_into().map_err(|_| {
                    CoordinatorError::Inconsistent(format!("depth record is {} bytes", raw.len()))
                })?;
                Ok(u32::from_le_bytes(bytes))
            }
        }
    }

    pub fn set_depth(&self, batch: &mut Batch, depth: u32) {
        batch.put(layout::depth(), depth.to_le_bytes().to_vec());
    }

    pub async fn get_proposal(&self, id: u32) -> Result<Option<Proposal>, CoordinatorError> {
        match self.store.get(&layout::proposal(id)).await? {
            Some(raw) => Ok(Some(Proposal::decode(&raw, self.m, self.n)?)),
            None => Ok(None),
        }
    }

    /// Stage the record and move its index marker to match its status
    pub fn save_proposal(&self, batch: &mut Batch, proposal: &Proposal) {
        batch.put(layout::proposal(proposal.id), proposal.encode());
        if proposal.is_pending() {
            batch.delete(layout::finished(proposal.id));
            batch.put(layout::pending(proposal.id), Vec::new());
        } else {
            batch.delete(layout::pending(proposal.id));
            batch.put(layout::finished(proposal.id), Vec::new());
        }
    }

    async fn ids(&self, prefix: u8) -> Result<Vec<u32>, CoordinatorError> {
        Ok(self
            .store
            .scan_prefix(&[prefix])
            .await?
            .iter()
            .filter_map(|(key, _)| layout::parse_id(key))
            .collect())
    }

    pub async fn pending_ids(&self) -> Result<Vec<u32>, CoordinatorError> {
        self.ids(layout::PENDING).await
    }

    pub async fn finished_ids(&self) -> Result<Vec<u32>, CoordinatorError> {
        self.ids(layout::FINISHED).await
    }

    /// Every record, in id order
    pub async fn all_proposals(&self) -> Result<Vec<Proposal>, CoordinatorError> {
        self.store
            .scan_prefix(&[layout::PROPOSAL])
            .await?
            .iter()
            .map(|(_, raw)| Ok(Proposal::decode(raw, self.m, self.n)?))
            .collect()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn get_transaction(&self, id: u32) -> Result<Option<Transaction>, CoordinatorError> {
        match self.store.get(&layout::transaction(id)).await? {
            Some(raw) => Ok(Some(decode_transaction(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save_transaction(&self, batch: &mut Batch, id: u32, tx: &Transaction) {
        batch.put(layout::transaction(id), encode_transaction(tx));
    }

    // =========================================================================
    // Coin locks
    // =========================================================================

    pub async fn is_locked(&self, outpoint: &OutPoint) -> Result<bool, CoordinatorError> {
        Ok(self.store.has(&layout::locked_coin(outpoint)).await?)
    }

    /// Proposal holding `outpoint`, if any
    pub async fn coin_owner(&self, outpoint: &OutPoint) -> Result<Option<u32>, CoordinatorError> {
        match self.store.get(&layout::coin_owner(outpoint)).await? {
            None => Ok(None),
            Some(raw) => {
                let bytes: [u8; 4] = raw.as_slice().try_into().map_err(|_| {
                    CoordinatorError::Inconsistent(format!("bad owner record for {}", outpoint))
                })?;
                Ok(Some(u32::from_le_bytes(bytes)))
            }
        }
    }

    pub async fn locked_coins(&self) -> Result<Vec<OutPoint>, CoordinatorError> {
        Ok(self
            .store
            .scan_prefix(&[layout::LOCKED_COIN])
            .await?
            .iter()
            .filter_map(|(key, _)| layout::parse_coin(key))
            .collect())
    }

    pub async fn proposal_coins(&self, id: u32) -> Result<Vec<OutPoint>, CoordinatorError> {
        Ok(self
            .store
            .scan_prefix(&layout::proposal_coins(id))
            .await?
            .iter()
            .filter_map(|(key, _)| layout::parse_proposal_coin(key))
            .collect())
    }

    pub fn lock_coins(&self, batch: &mut Batch, id: u32, coins: &[OutPoint]) {
        for outpoint in coins {
            batch.put(layout::locked_coin(outpoint), Vec::new());
            batch.put(layout::coin_owner(outpoint), id.to_le_bytes().to_vec());
            batch.put(layout::proposal_coin(id, outpoint), Vec::new());
        }
    }

    pub fn unlock_coins(&self, batch: &mut Batch, id: u32, coins: &[OutPoint]) {
        for outpoint in coins {
            batch.delete(layout::locked_coin(outpoint));
            batch.delete(layout::coin_owner(outpoint));
            batch.delete(layout::proposal_coin(id, outpoint));
        }
    }
}
