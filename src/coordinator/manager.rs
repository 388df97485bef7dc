//! Per-wallet proposal coordinator
//!
//! Owns the proposal records and the coin lock index of one wallet.
//! Mutations serialize on the wallet write lock; read-then-mutate sequences
//! on one proposal also hold that proposal's lock, which is always taken
//! first.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use bitcoin::Amount;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard};

use super::db::ProposalDb;
use super::events::{EventBus, ProposalEvent};
use super::locks::{KeyedGuard, KeyedMutex};
use super::CoordinatorError;
use crate::config::CoordinatorConfig;
use crate::core::{Coin, CoinView, OutPoint, Transaction, TransactionExt, Txid};
use crate::crypto::MessageSignature;
use crate::ledger::{Balance, LedgerPort};
use crate::multisig::{
    Cosigner, MultisigWallet, PayloadType, Proposal, ProposalOptions, ProposalStatus,
    SignatureSet, WalletError, MAX_PROPOSAL_INPUTS,
};
use crate::signing::{apply_all, check_all, verify_transaction, KeyPath, KeyRing, SigningError};
use crate::storage::{Batch, Store};

/// One input of a proposal transaction as a cosigner needs it for signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalInput {
    pub outpoint: OutPoint,
    /// `None` once the coin is spent or unknown to the ledger
    pub coin: Option<Coin>,
    /// `None` for inputs the wallet does not own
    pub path: Option<KeyPath>,
}

/// Locks held while a ledger event is applied
///
/// `lost` owns coins the event's transaction created, `spent` owns coins
/// it consumed. Both were read while the locks were held.
struct EventLocks<'a> {
    lost: BTreeSet<u32>,
    spent: BTreeSet<u32>,
    _write: MutexGuard<'a, ()>,
    _proposals: Vec<KeyedGuard<u32>>,
}

pub struct ProposalCoordinator {
    wallet: MultisigWallet,
    ledger: Arc<dyn LedgerPort>,
    db: ProposalDb,
    write_lock: Mutex<()>,
    proposal_locks: KeyedMutex<u32>,
    events: EventBus,
    config: CoordinatorConfig,
}

impl ProposalCoordinator {
    /// Coordinator for a complete wallet
    pub fn new(
        wallet: MultisigWallet,
        ledger: Arc<dyn LedgerPort>,
        store: Arc<dyn Store>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        if !wallet.is_complete() {
            return Err(WalletError::Incomplete {
                joined: wallet.cosigners.len(),
                n: wallet.n,
            }
            .into());
        }

        log::info!(
            "Opened coordinator for wallet {} ({})",
            wallet.name,
            wallet.description()
        );

        Ok(Self {
            db: ProposalDb::new(store, wallet.m, wallet.n),
            events: EventBus::new(config.event_capacity),
            wallet,
            ledger,
            write_lock: Mutex::new(()),
            proposal_locks: KeyedMutex::new(),
            config,
        })
    }

    pub fn wallet(&self) -> &MultisigWallet {
        &self.wallet
    }

    pub fn name(&self) -> &str {
        &self.wallet.name
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProposalEvent> {
        self.events.subscribe()
    }

    fn cosigner(&self, id: u8) -> Result<&Cosigner, CoordinatorError> {
        self.wallet
            .cosigner(id)
            .ok_or(CoordinatorError::CosignerNotFound(id))
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a proposal, letting the ledger pick unlocked coins
    pub async fn create_proposal(
        &self,
        options: &ProposalOptions,
        author: u8,
        signature: MessageSignature,
    ) -> Result<Proposal, CoordinatorError> {
        self.verify_creation(options, author, &signature)?;

        let _write = self.write_lock.lock().await;
        let locked: HashSet<OutPoint> = self.db.locked_coins().await?.into_iter().collect();
        let tx = self.ledger.build_transaction(options, &locked).await?;
        self.insert_proposal(options, author, signature, tx).await
    }

    /// Create a proposal for a transaction built by the caller
    pub async fn create_proposal_with_tx(
        &self,
        options: &ProposalOptions,
        author: u8,
        signature: MessageSignature,
        tx: Transaction,
    ) -> Result<Proposal, CoordinatorError> {
        self.verify_creation(options, author, &signature)?;
        if tx.input.len() > MAX_PROPOSAL_INPUTS {
            return Err(CoordinatorError::TooManyInputs(tx.input.len()));
        }

        let _write = self.write_lock.lock().await;
        self.insert_proposal(options, author, signature, tx).await
    }

    fn verify_creation(
        &self,
        options: &ProposalOptions,
        author: u8,
        signature: &MessageSignature,
    ) -> Result<(), CoordinatorError> {
        let len = options.memo.len();
        if len == 0 || len > self.config.max_memo_length {
            return Err(CoordinatorError::InvalidMemo {
                len,
                max: self.config.max_memo_length,
            });
        }

        let total = options.total_value().ok_or_else(|| {
            CoordinatorError::InvalidAmount("outputs overflow".to_string())
        })?;
        if total > Amount::MAX_MONEY.to_sat() {
            return Err(CoordinatorError::InvalidAmount(format!(
                "outputs total {} exceeds the money supply",
                total
            )));
        }

        let cosigner = self.cosigner(author)?;
        let payload = options.payload(&self.wallet.name, PayloadType::Create)?;
        if !cosigner.verify_proof(&payload, signature) {
            return Err(CoordinatorError::InvalidCreationProof(author));
        }
        Ok(())
    }

    /// Caller holds the write lock
    async fn insert_proposal(
        &self,
        options: &ProposalOptions,
        author: u8,
        signature: MessageSignature,
        tx: Transaction,
    ) -> Result<Proposal, CoordinatorError> {
        if tx.input.len() > MAX_PROPOSAL_INPUTS {
            return Err(CoordinatorError::TooManyInputs(tx.input.len()));
        }
        if tx.input.is_empty() {
            return Err(CoordinatorError::NoInputs);
        }

        // Every input must be a wallet coin the ledger can still resolve
        let view = self.ledger.coin_view(&tx).await?;
        let paths = self.ledger.input_paths(&tx).await?;
        for (index, input) in tx.input.iter().enumerate() {
            let owned = matches!(paths.get(index), Some(Some(_)));
            if !owned || view.get(&input.previous_output).is_none() {
                return Err(CoordinatorError::UnknownInput(input.previous_output));
            }
        }

        let coins = tx.prevouts();
        for outpoint in &coins {
            if let Some(owner) = self.db.coin_owner(outpoint).await? {
                return Err(CoordinatorError::CoinLocked {
                    outpoint: *outpoint,
                    owner,
                });
            }
        }

        let id = self.db.depth().await?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| CoordinatorError::Inconsistent("proposal ids exhausted".to_string()))?;
        let proposal = Proposal::new(id, author, options, signature, self.wallet.m, self.wallet.n)?;

        let mut batch = Batch::new();
        self.db.save_proposal(&mut batch, &proposal);
        self.db.save_transaction(&mut batch, id, &tx);
        self.db.lock_coins(&mut batch, id, &coins);
        self.db.set_depth(&mut batch, next);
        self.db.write(batch).await?;

        log::info!(
            "Created proposal {} ({:?}) by cosigner {}, locked {} coins",
            id,
            proposal.memo,
            author,
            coins.len()
        );
        self.events.publish(ProposalEvent::Created {
            wallet: self.wallet.name.clone(),
            proposal: proposal.clone(),
        });
        Ok(proposal)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Pending proposals, or every proposal when `pending` is false
    pub async fn list_proposals(&self, pending: bool) -> Result<Vec<Proposal>, CoordinatorError> {
        if !pending {
            return self.db.all_proposals().await;
        }
        let mut proposals = Vec::new();
        for id in self.db.pending_ids().await? {
            proposals.push(self.get_proposal(id).await?);
        }
        Ok(proposals)
    }

    pub async fn get_proposal(&self, id: u32) -> Result<Proposal, CoordinatorError> {
        self.db
            .get_proposal(id)
            .await?
            .ok_or(CoordinatorError::ProposalNotFound(id))
    }

    /// The unsigned transaction, or the signed one once approved
    pub async fn get_proposal_transaction(&self, id: u32) -> Result<Transaction, CoordinatorError> {
        self.get_proposal(id).await?;
        self.stored_transaction(id).await
    }

    async fn stored_transaction(&self, id: u32) -> Result<Transaction, CoordinatorError> {
        self.db.get_transaction(id).await?.ok_or_else(|| {
            log::error!("Proposal {} has no transaction", id);
            CoordinatorError::Inconsistent(format!("proposal {} has no transaction", id))
        })
    }

    /// Coins and key paths of the proposal's inputs
    pub async fn get_proposal_inputs(&self, id: u32) -> Result<Vec<ProposalInput>, CoordinatorError> {
        let tx = self.get_proposal_transaction(id).await?;
        let view = self.ledger.coin_view(&tx).await?;
        let paths = self.ledger.input_paths(&tx).await?;

        Ok(tx
            .input
            .iter()
            .zip(paths)
            .map(|(input, path)| ProposalInput {
                outpoint: input.previous_output,
                coin: view.get(&input.previous_output).cloned(),
                path,
            })
            .collect())
    }

    /// Coins currently locked by proposal `id`
    pub async fn get_proposal_coins(&self, id: u32) -> Result<Vec<OutPoint>, CoordinatorError> {
        self.get_proposal(id).await?;
        self.db.proposal_coins(id).await
    }

    pub async fn locked_coins(&self) -> Result<Vec<OutPoint>, CoordinatorError> {
        self.db.locked_coins().await
    }

    /// Proposal holding the lock on `outpoint`
    pub async fn proposal_for_coin(
        &self,
        outpoint: &OutPoint,
    ) -> Result<Option<Proposal>, CoordinatorError> {
        match self.db.coin_owner(outpoint).await? {
            Some(id) => Ok(Some(self.get_proposal(id).await?)),
            None => Ok(None),
        }
    }

    pub async fn balance(&self) -> Result<Balance, CoordinatorError> {
        Ok(self.ledger.balance().await?)
    }

    // =========================================================================
    // Votes
    // =========================================================================

    async fn derive_rings(
        &self,
        cosigner: &Cosigner,
        paths: &[Option<KeyPath>],
    ) -> Result<Vec<Option<KeyRing>>, CoordinatorError> {
        let mut rings = Vec::with_capacity(paths.len());
        for path in paths {
            rings.push(match path {
                Some(path) => Some(self.ledger.derive_keyring(cosigner, *path).await?),
                None => None,
            });
        }
        Ok(rings)
    }

    /// Approve with one signature per input, `None` for inputs the
    /// cosigner does not own
    pub async fn approve_proposal(
        &self,
        id: u32,
        cosigner_id: u8,
        signatures: Vec<Option<Vec<u8>>>,
    ) -> Result<Proposal, CoordinatorError> {
        let cosigner = self.cosigner(cosigner_id)?;
        let set = SignatureSet::from_signatures(&signatures)?;

        let _proposal = self.proposal_locks.lock(id).await;
        let proposal = self.get_proposal(id).await?;
        proposal.check_vote(cosigner_id)?;

        let tx = self.stored_transaction(id).await?;
        if signatures.len() != tx.input.len() {
            return Err(CoordinatorError::SignatureCount {
                expected: tx.input.len(),
                actual: signatures.len(),
            });
        }

        let view = self.ledger.coin_view(&tx).await?;
        let paths = self.ledger.input_paths(&tx).await?;
        self.check_inputs_resolve(id, &tx, &view, &paths).await?;
        let rings = self.derive_rings(cosigner, &paths).await?;

        // Exactly the owned inputs must carry a valid signature
        let expected = rings.iter().flatten().count();
        if expected == 0 {
            log::error!("Proposal {} has no wallet inputs to sign", id);
            return Err(CoordinatorError::Inconsistent(format!(
                "proposal {} has no wallet inputs",
                id
            )));
        }
        let valid = check_all(&tx, &view, &rings, &signatures)?;
        if valid != expected || set.present() != expected {
            log::warn!(
                "Cosigner {} sent {} signatures for proposal {}, {} of {} valid",
                cosigner_id,
                set.present(),
                id,
                valid,
                expected
            );
            return Err(CoordinatorError::SignaturesIncorrect { expected, valid });
        }

        let mut next = proposal.clone();
        let status = next.approve(cosigner_id, set.clone())?;
        let mut signed = None;
        if status == ProposalStatus::Approved {
            signed = self.assemble(&next, &tx, &view, &paths).await?;
            if signed.is_none() {
                next = proposal;
                next.approvals.insert(cosigner_id, set);
                next.force_reject(ProposalStatus::Verify)?;
            }
        }

        let _write = self.write_lock.lock().await;
        let mut batch = Batch::new();
        self.db.save_proposal(&mut batch, &next);
        if let Some(tx) = &signed {
            self.db.save_transaction(&mut batch, id, tx);
        }
        let unlocked = if next.status == ProposalStatus::Verify {
            self.release(&mut batch, id).await?
        } else {
            Vec::new()
        };
        self.db.write(batch).await?;

        let wallet = self.wallet.name.clone();
        match signed {
            Some(tx) => {
                log::info!("Proposal {} approved, transaction {}", id, tx.compute_txid());
                self.events.publish(ProposalEvent::Approved {
                    wallet,
                    proposal: next.clone(),
                    cosigner: cosigner_id,
                    tx,
                });
            }
            None if next.status == ProposalStatus::Verify => {
                log::error!("Proposal {} failed verification after approval", id);
                self.events.publish(ProposalEvent::Rejected {
                    wallet: wallet.clone(),
                    proposal: next.clone(),
                    cosigner: Some(cosigner_id),
                });
                self.publish_unlocked(id, unlocked);
            }
            None => {
                log::info!(
                    "Cosigner {} approved proposal {} ({}/{})",
                    cosigner_id,
                    id,
                    next.approvals.len(),
                    next.m
                );
                self.events.publish(ProposalEvent::Approval {
                    wallet,
                    proposal: next.clone(),
                    cosigner: cosigner_id,
                });
            }
        }
        Ok(next)
    }

    /// Every input of the proposal must still be one of its locked wallet
    /// coins with a known key path
    async fn check_inputs_resolve(
        &self,
        id: u32,
        tx: &Transaction,
        view: &CoinView,
        paths: &[Option<KeyPath>],
    ) -> Result<(), CoordinatorError> {
        if paths.len() != tx.input.len() {
            log::error!(
                "Ledger returned {} paths for {} inputs of proposal {}",
                paths.len(),
                tx.input.len(),
                id
            );
            return Err(CoordinatorError::Inconsistent(format!(
                "path count mismatch for proposal {}",
                id
            )));
        }

        let locked: HashSet<OutPoint> = self.db.proposal_coins(id).await?.into_iter().collect();
        for (index, (input, path)) in tx.input.iter().zip(paths).enumerate() {
            let outpoint = input.previous_output;
            if !locked.contains(&outpoint) || view.get(&outpoint).is_none() || path.is_none() {
                log::error!(
                    "Input {} ({}) of proposal {} no longer resolves to a locked wallet coin",
                    index,
                    outpoint,
                    id
                );
                return Err(CoordinatorError::Inconsistent(format!(
                    "input {} of proposal {} is not resolvable",
                    index, id
                )));
            }
        }
        Ok(())
    }

    /// Apply every approval in cosigner order and verify the result
    ///
    /// `Ok(None)` means the combined signatures do not verify.
    async fn assemble(
        &self,
        proposal: &Proposal,
        tx: &Transaction,
        view: &CoinView,
        paths: &[Option<KeyPath>],
    ) -> Result<Option<Transaction>, CoordinatorError> {
        let mut signed = tx.clone();
        for (cosigner_id, set) in &proposal.approvals {
            let rings = self.derive_rings(self.cosigner(*cosigner_id)?, paths).await?;
            if !apply_all(&mut signed, view, &rings, &set.to_vec(), true)? {
                log::warn!(
                    "Signatures of cosigner {} do not apply to proposal {}",
                    cosigner_id,
                    proposal.id
                );
                return Ok(None);
            }
        }

        match verify_transaction(&signed, view) {
            Ok(()) => Ok(Some(signed)),
            Err(SigningError::Verification { index, reason }) => {
                log::warn!(
                    "Proposal {} input {} does not verify: {}",
                    proposal.id,
                    index,
                    reason
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reject with a proof over the proposal's rejection payload
    pub async fn reject_proposal(
        &self,
        id: u32,
        cosigner_id: u8,
        signature: MessageSignature,
    ) -> Result<Proposal, CoordinatorError> {
        let cosigner = self.cosigner(cosigner_id)?;

        let _proposal = self.proposal_locks.lock(id).await;
        let mut proposal = self.get_proposal(id).await?;
        proposal.check_vote(cosigner_id)?;
        if !proposal.verify_rejection(&self.wallet.name, cosigner, &signature) {
            return Err(CoordinatorError::InvalidRejectionProof(cosigner_id));
        }
        let status = proposal.reject(cosigner_id, signature)?;

        let _write = self.write_lock.lock().await;
        let mut batch = Batch::new();
        self.db.save_proposal(&mut batch, &proposal);
        let unlocked = if status == ProposalStatus::Rejected {
            self.release(&mut batch, id).await?
        } else {
            Vec::new()
        };
        self.db.write(batch).await?;

        let wallet = self.wallet.name.clone();
        if status == ProposalStatus::Rejected {
            log::info!("Proposal {} rejected", id);
            self.events.publish(ProposalEvent::Rejected {
                wallet,
                proposal: proposal.clone(),
                cosigner: Some(cosigner_id),
            });
            self.publish_unlocked(id, unlocked);
        } else {
            log::info!(
                "Cosigner {} rejected proposal {} ({}/{})",
                cosigner_id,
                id,
                proposal.rejections.len(),
                proposal.critical()
            );
            self.events.publish(ProposalEvent::Rejection {
                wallet,
                proposal: proposal.clone(),
                cosigner: cosigner_id,
            });
        }
        Ok(proposal)
    }

    /// Broadcast the signed transaction of an approved proposal
    ///
    /// Coins stay locked until the ledger reports the spend.
    pub async fn send_proposal(&self, id: u32) -> Result<Transaction, CoordinatorError> {
        let _proposal = self.proposal_locks.lock(id).await;
        let proposal = self.get_proposal(id).await?;
        if proposal.status != ProposalStatus::Approved {
            return Err(CoordinatorError::NotApproved(proposal.status));
        }
        let tx = self.stored_transaction(id).await?;

        let _write = self.write_lock.lock().await;
        self.ledger.broadcast(&tx).await?;
        log::info!("Sent proposal {} as {}", id, tx.compute_txid());
        Ok(tx)
    }

    // =========================================================================
    // Ledger events
    // =========================================================================

    /// A transaction entered the ledger unconfirmed
    ///
    /// Returns the proposals it closed.
    pub async fn on_tx_added(&self, tx: &Transaction) -> Result<Vec<Proposal>, CoordinatorError> {
        self.resolve_spend(tx, false).await
    }

    pub async fn on_tx_confirmed(
        &self,
        tx: &Transaction,
    ) -> Result<Vec<Proposal>, CoordinatorError> {
        self.resolve_spend(tx, true).await
    }

    /// A transaction left the ledger (reorg or eviction)
    ///
    /// Pending proposals holding coins the transaction created lose them
    /// and close as double spends. Coins it spent that belong to the
    /// proposal that produced it stay locked so the proposal can be sent
    /// again.
    pub async fn on_tx_removed(&self, tx: &Transaction) -> Result<Vec<Proposal>, CoordinatorError> {
        let txid = tx.compute_txid();
        let created: Vec<OutPoint> = (0..tx.output.len() as u32)
            .map(|vout| OutPoint::new(txid, vout))
            .collect();
        let locks = self.lock_owners(&created, &tx.prevouts()).await?;
        let lost = &locks.lost;
        let ids: BTreeSet<u32> = lost.union(&locks.spent).copied().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let unsigned = tx.unsigned_id();
        let mut batch = Batch::new();
        let mut events = Vec::new();
        let mut closed = Vec::new();

        for &id in &ids {
            let Some(mut proposal) = self.load_for_event(id).await? else {
                continue;
            };

            if lost.contains(&id) {
                match proposal.status {
                    ProposalStatus::Progress => {
                        log::warn!("Proposal {} lost coins created by removed {}", id, txid);
                        self.close_double_spend(&mut batch, &mut events, &mut proposal)
                            .await?;
                        closed.push(proposal);
                    }
                    ProposalStatus::Approved => {
                        let coins = self.release(&mut batch, id).await?;
                        events.extend(self.unlocked_event(id, coins));
                    }
                    _ => {}
                }
            } else if self.is_own(id, &unsigned).await? {
                log::info!(
                    "Transaction of proposal {} removed, coins stay locked",
                    id
                );
            }
        }

        self.db.write(batch).await?;
        for event in events {
            self.events.publish(event);
        }
        Ok(closed)
    }

    async fn resolve_spend(
        &self,
        tx: &Transaction,
        confirmed: bool,
    ) -> Result<Vec<Proposal>, CoordinatorError> {
        let locks = self.lock_owners(&[], &tx.prevouts()).await?;
        let ids = &locks.spent;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let unsigned = tx.unsigned_id();
        let mut batch = Batch::new();
        let mut events = Vec::new();
        let mut closed = Vec::new();

        for &id in ids {
            let Some(mut proposal) = self.load_for_event(id).await? else {
                continue;
            };
            let own = self.is_own(id, &unsigned).await?;

            match proposal.status {
                ProposalStatus::Progress if !own => {
                    log::warn!("Proposal {} double spent by {}", id, tx.compute_txid());
                    self.close_double_spend(&mut batch, &mut events, &mut proposal)
                        .await?;
                    closed.push(proposal);
                }
                ProposalStatus::Approved if confirmed || !own => {
                    log::info!(
                        "Coins of approved proposal {} spent by {}",
                        id,
                        tx.compute_txid()
                    );
                    let coins = self.release(&mut batch, id).await?;
                    events.extend(self.unlocked_event(id, coins));
                }
                _ => {}
            }
        }

        self.db.write(batch).await?;
        for event in events {
            self.events.publish(event);
        }
        Ok(closed)
    }

    async fn owners(&self, outpoints: &[OutPoint]) -> Result<BTreeSet<u32>, CoordinatorError> {
        let mut ids = BTreeSet::new();
        for outpoint in outpoints {
            if let Some(id) = self.db.coin_owner(outpoint).await? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Lock the proposals owning `created` or `spent` coins, then the
    /// wallet write lock
    ///
    /// Owners are read before locking to know which proposal locks to take
    /// and read again under the locks. If they changed in between the
    /// locks are dropped and the sequence starts over.
    async fn lock_owners(
        &self,
        created: &[OutPoint],
        spent: &[OutPoint],
    ) -> Result<EventLocks<'_>, CoordinatorError> {
        loop {
            let lost = self.owners(created).await?;
            let spending = self.owners(spent).await?;
            let ids: BTreeSet<u32> = lost.union(&spending).copied().collect();

            let proposals = self.lock_all(&ids).await;
            let write = self.write_lock.lock().await;

            let lost_now = self.owners(created).await?;
            let spending_now = self.owners(spent).await?;
            if lost_now == lost && spending_now == spending {
                return Ok(EventLocks {
                    lost,
                    spent: spending,
                    _write: write,
                    _proposals: proposals,
                });
            }

            log::debug!("Coin owners changed while locking, retrying");
            drop(write);
            drop(proposals);
        }
    }

    /// Lock proposals in ascending id order
    async fn lock_all(&self, ids: &BTreeSet<u32>) -> Vec<KeyedGuard<u32>> {
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.proposal_locks.lock(*id).await);
        }
        guards
    }

    async fn load_for_event(&self, id: u32) -> Result<Option<Proposal>, CoordinatorError> {
        let proposal = self.db.get_proposal(id).await?;
        if proposal.is_none() {
            log::error!("Coin lock points at missing proposal {}", id);
        }
        Ok(proposal)
    }

    /// Whether `unsigned` identifies the proposal's own transaction
    async fn is_own(&self, id: u32, unsigned: &Txid) -> Result<bool, CoordinatorError> {
        Ok(self
            .db
            .get_transaction(id)
            .await?
            .is_some_and(|tx| tx.unsigned_id() == *unsigned))
    }

    async fn close_double_spend(
        &self,
        batch: &mut Batch,
        events: &mut Vec<ProposalEvent>,
        proposal: &mut Proposal,
    ) -> Result<(), CoordinatorError> {
        proposal.force_reject(ProposalStatus::DblSpend)?;
        self.db.save_proposal(batch, proposal);
        let coins = self.release(batch, proposal.id).await?;

        events.push(ProposalEvent::Rejected {
            wallet: self.wallet.name.clone(),
            proposal: proposal.clone(),
            cosigner: None,
        });
        events.extend(self.unlocked_event(proposal.id, coins));
        Ok(())
    }

    async fn release(&self, batch: &mut Batch, id: u32) -> Result<Vec<OutPoint>, CoordinatorError> {
        let coins = self.db.proposal_coins(id).await?;
        self.db.unlock_coins(batch, id, &coins);
        log::debug!("Unlocking {} coins of proposal {}", coins.len(), id);
        Ok(coins)
    }

    fn unlocked_event(&self, id: u32, coins: Vec<OutPoint>) -> Option<ProposalEvent> {
        if coins.is_empty() {
            return None;
        }
        Some(ProposalEvent::CoinsUnlocked {
            wallet: self.wallet.name.clone(),
            proposal_id: id,
            coins,
        })
    }

    fn publish_unlocked(&self, id: u32, coins: Vec<OutPoint>) {
        if let Some(event) = self.unlocked_event(id, coins) {
            self.events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::p2pkh;
    use crate::core::TransactionBuilder;
    use crate::ledger::MemoryLedger;
    use crate::storage::MemoryStore;
    use crate::testutil::{self, TestCosigner};

    async fn setup(m: u8, n: u8) -> (ProposalCoordinator, Arc<MemoryLedger>, Vec<TestCosigner>) {
        let (wallet, signers) = testutil::wallet(m, n);
        let ledger = Arc::new(MemoryLedger::new(wallet.clone()));
        let coordinator = ProposalCoordinator::new(
            wallet,
            ledger.clone(),
            Arc::new(MemoryStore::new()),
            CoordinatorConfig::default(),
        )
        .unwrap();
        (coordinator, ledger, signers)
    }

    #[tokio::test]
    async fn test_event_rereads_owners_after_locking() {
        let (coordinator, ledger, signers) = setup(1, 2).await;
        let coin = ledger.fund(200_000).await.unwrap();
        let options = testutil::pay_options("first", 50_000);
        let proof = signers[0].create_proof("vault", &options);
        coordinator.create_proposal(&options, 0, proof).await.unwrap();
        let unsigned = coordinator.get_proposal_transaction(0).await.unwrap();

        let external = TransactionBuilder::new()
            .add_input(&coin)
            .add_output(p2pkh(&[9; 20]), coin.value - 1_000)
            .build();

        // Hold proposal 0 so the event stalls after reading the owners
        let held = coordinator.proposal_locks.lock(0).await;
        let event = coordinator.on_tx_added(&external);
        let handover = async {
            tokio::task::yield_now().await;

            // Proposal 0 closes and a new proposal takes over the coin
            let mut first = coordinator.get_proposal(0).await.unwrap();
            first.force_reject(ProposalStatus::Verify).unwrap();
            let mut batch = Batch::new();
            coordinator.db.save_proposal(&mut batch, &first);
            coordinator.release(&mut batch, 0).await.unwrap();
            coordinator.db.write(batch).await.unwrap();

            let options = testutil::pay_options("second", 50_000);
            let proof = signers[1].create_proof("vault", &options);
            coordinator
                .create_proposal_with_tx(&options, 1, proof, unsigned)
                .await
                .unwrap();
            drop(held);
        };
        let (closed, ()) = tokio::join!(event, handover);

        let closed = closed.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, 1);
        assert_eq!(
            coordinator.get_proposal(1).await.unwrap().status,
            ProposalStatus::DblSpend
        );
        assert_eq!(
            coordinator.get_proposal(0).await.unwrap().status,
            ProposalStatus::Verify
        );
        assert!(coordinator.locked_coins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assembly_needs_threshold_signatures() {
        let (coordinator, ledger, signers) = setup(2, 3).await;
        ledger.fund(200_000).await.unwrap();
        let options = testutil::pay_options("partial", 50_000);
        let proof = signers[0].create_proof("vault", &options);
        coordinator.create_proposal(&options, 0, proof).await.unwrap();

        let tx = coordinator.get_proposal_transaction(0).await.unwrap();
        let view = ledger.coin_view(&tx).await.unwrap();
        let paths = ledger.input_paths(&tx).await.unwrap();
        let signatures = signers[1].sign_inputs(coordinator.wallet(), &tx, &view, &paths);
        let proposal = coordinator.approve_proposal(0, 1, signatures).await.unwrap();
        assert_eq!(proposal.approvals.len(), 1);

        // One valid signature of two required never verifies
        let assembled = coordinator
            .assemble(&proposal, &tx, &view, &paths)
            .await
            .unwrap();
        assert!(assembled.is_none());

        let proposal = coordinator.get_proposal(0).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Progress);
        assert_eq!(coordinator.get_proposal_coins(0).await.unwrap().len(), 1);
    }
}
