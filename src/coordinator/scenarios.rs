//! End-to-end coordinator scenarios

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::Amount;
use futures::future::join_all;
use tokio::sync::broadcast::Receiver;

use super::{CoordinatorError, ErrorKind, ProposalCoordinator, ProposalEvent};
use crate::config::CoordinatorConfig;
use crate::core::script::p2pkh;
use crate::core::{
    Coin, CoinView, OutPoint, Transaction, TransactionBuilder, TransactionExt, TxOut, Txid,
};
use crate::ledger::{Balance, LedgerError, LedgerPort, MemoryLedger};
use crate::multisig::{
    Cosigner, MultisigWallet, Proposal, ProposalError, ProposalOptions, ProposalStatus,
    ScriptKind,
};
use crate::signing::{verify_transaction, KeyPath, KeyRing};
use crate::storage::{FileStore, MemoryStore, Store};
use crate::testutil::{self, TestCosigner};

struct Harness {
    wallet: MultisigWallet,
    signers: Vec<TestCosigner>,
    ledger: Arc<MemoryLedger>,
    coordinator: ProposalCoordinator,
}

impl Harness {
    fn new(m: u8, n: u8) -> Self {
        Self::build(testutil::wallet(m, n), Arc::new(MemoryStore::new()))
    }

    fn with_kind(m: u8, n: u8, kind: ScriptKind) -> Self {
        Self::build(
            testutil::wallet_of_kind(m, n, kind),
            Arc::new(MemoryStore::new()),
        )
    }

    fn with_store(m: u8, n: u8, store: Arc<dyn Store>) -> Self {
        Self::build(testutil::wallet(m, n), store)
    }

    fn build((wallet, signers): (MultisigWallet, Vec<TestCosigner>), store: Arc<dyn Store>) -> Self {
        let ledger = Arc::new(MemoryLedger::new(wallet.clone()));
        let coordinator = ProposalCoordinator::new(
            wallet.clone(),
            ledger.clone(),
            store,
            CoordinatorConfig::default(),
        )
        .unwrap();
        Self {
            wallet,
            signers,
            ledger,
            coordinator,
        }
    }

    async fn propose(&self, author: u8, memo: &str, value: u64) -> Result<Proposal, CoordinatorError> {
        let options = testutil::pay_options(memo, value);
        let proof = self.signers[author as usize].create_proof("vault", &options);
        self.coordinator.create_proposal(&options, author, proof).await
    }

    async fn signatures(&self, signer: u8, id: u32) -> Vec<Option<Vec<u8>>> {
        let tx = self.coordinator.get_proposal_transaction(id).await.unwrap();
        let view = self.ledger.coin_view(&tx).await.unwrap();
        let paths = self.ledger.input_paths(&tx).await.unwrap();
        self.signers[signer as usize].sign_inputs(&self.wallet, &tx, &view, &paths)
    }

    async fn approve(&self, signer: u8, id: u32) -> Result<Proposal, CoordinatorError> {
        let signatures = self.signatures(signer, id).await;
        self.coordinator.approve_proposal(id, signer, signatures).await
    }

    async fn reject(&self, signer: u8, id: u32) -> Result<Proposal, CoordinatorError> {
        let proposal = self.coordinator.get_proposal(id).await.unwrap();
        let proof = self.signers[signer as usize].reject_proof("vault", &proposal);
        self.coordinator.reject_proposal(id, signer, proof).await
    }
}

fn event_kinds(rx: &mut Receiver<ProposalEvent>) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            ProposalEvent::Created { .. } => "created",
            ProposalEvent::Approval { .. } => "approval",
            ProposalEvent::Approved { .. } => "approved",
            ProposalEvent::Rejection { .. } => "rejection",
            ProposalEvent::Rejected { .. } => "rejected",
            ProposalEvent::CoinsUnlocked { .. } => "unlocked",
        });
    }
    kinds
}

fn external_spend(coin: &Coin) -> Transaction {
    TransactionBuilder::new()
        .add_input(coin)
        .add_output(p2pkh(&[9; 20]), coin.value - 1_000)
        .build()
}

/// Ledger whose coin values move by `drift` satoshis after funding
struct DriftingLedger {
    inner: Arc<MemoryLedger>,
    drift: AtomicU64,
}

#[async_trait]
impl LedgerPort for DriftingLedger {
    async fn build_transaction(
        &self,
        options: &ProposalOptions,
        exclude: &HashSet<OutPoint>,
    ) -> Result<Transaction, LedgerError> {
        self.inner.build_transaction(options, exclude).await
    }

    async fn coin_view(&self, tx: &Transaction) -> Result<CoinView, LedgerError> {
        let view = self.inner.coin_view(tx).await?;
        let drift = self.drift.load(Ordering::SeqCst);
        Ok(tx
            .prevouts()
            .iter()
            .filter_map(|outpoint| view.get(outpoint).cloned())
            .map(|mut coin| {
                coin.value += drift;
                coin
            })
            .collect())
    }

    async fn input_paths(&self, tx: &Transaction) -> Result<Vec<Option<KeyPath>>, LedgerError> {
        self.inner.input_paths(tx).await
    }

    async fn derive_keyring(
        &self,
        cosigner: &Cosigner,
        path: KeyPath,
    ) -> Result<KeyRing, LedgerError> {
        self.inner.derive_keyring(cosigner, path).await
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<(), LedgerError> {
        self.inner.broadcast(tx).await
    }

    async fn balance(&self) -> Result<Balance, LedgerError> {
        self.inner.balance().await
    }
}

#[tokio::test]
async fn test_two_of_two_end_to_end() {
    let h = Harness::new(2, 2);
    let coin = h.ledger.fund(200_000_000).await.unwrap();
    let mut events = h.coordinator.subscribe();

    let proposal = h.propose(0, "payroll", 100_000_000).await.unwrap();
    assert_eq!(proposal.id, 0);
    assert_eq!(proposal.status, ProposalStatus::Progress);
    assert_eq!(
        h.coordinator.get_proposal_coins(0).await.unwrap(),
        vec![coin.outpoint]
    );

    let inputs = h.coordinator.get_proposal_inputs(0).await.unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].coin.as_ref(), Some(&coin));
    assert_eq!(inputs[0].path, Some(KeyPath::new(0, 0)));

    // The only coin is locked, so the ledger has nothing left to select
    let err = h.propose(0, "again", 100_000_000).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Ledger(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Reusing the locked coin directly is a conflict too
    let unsigned = h.coordinator.get_proposal_transaction(0).await.unwrap();
    let options = testutil::pay_options("again", 100_000_000);
    let proof = h.signers[1].create_proof("vault", &options);
    let err = h
        .coordinator
        .create_proposal_with_tx(&options, 1, proof, unsigned.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::CoinLocked { owner: 0, .. }));
    assert_eq!(h.coordinator.list_proposals(false).await.unwrap().len(), 1);

    let proposal = h.approve(0, 0).await.unwrap();
    assert_eq!(proposal.approvals.len(), 1);
    assert_eq!(proposal.status, ProposalStatus::Progress);

    let proposal = h.approve(1, 0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Approved);
    assert_eq!(proposal.approvals.len(), 2);
    assert!(proposal.closed_at > 0);
    assert!(h.coordinator.list_proposals(true).await.unwrap().is_empty());

    let signed = h.coordinator.get_proposal_transaction(0).await.unwrap();
    assert_eq!(signed.unsigned_id(), unsigned.unsigned_id());
    let view = h.ledger.coin_view(&signed).await.unwrap();
    verify_transaction(&signed, &view).unwrap();

    let sent = h.coordinator.send_proposal(0).await.unwrap();
    assert_eq!(sent, signed);
    assert_eq!(h.ledger.broadcasts().await, vec![signed.clone()]);

    // The proposal's own spend never turns it into a double spend
    assert!(h.coordinator.on_tx_added(&sent).await.unwrap().is_empty());
    assert!(h.coordinator.on_tx_removed(&sent).await.unwrap().is_empty());
    assert_eq!(h.coordinator.locked_coins().await.unwrap(), vec![coin.outpoint]);

    assert!(h.coordinator.on_tx_confirmed(&sent).await.unwrap().is_empty());
    assert!(h.coordinator.locked_coins().await.unwrap().is_empty());
    assert_eq!(
        h.coordinator.get_proposal(0).await.unwrap().status,
        ProposalStatus::Approved
    );

    assert_eq!(
        event_kinds(&mut events),
        vec!["created", "approval", "approved", "unlocked"]
    );
}

#[tokio::test]
async fn test_one_of_two_rejection() {
    let h = Harness::new(1, 2);
    let coin = h.ledger.fund(500_000).await.unwrap();
    let mut events = h.coordinator.subscribe();
    h.propose(0, "rent", 100_000).await.unwrap();

    let proposal = h.reject(0, 0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Progress);
    assert_eq!(proposal.rejections.len(), 1);

    // A proof from the wrong key is refused
    let wrong = h.signers[0].reject_proof("vault", &proposal);
    let err = h.coordinator.reject_proposal(0, 1, wrong).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidRejectionProof(1)));
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let proposal = h.reject(1, 0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Rejected);
    assert!(h.coordinator.locked_coins().await.unwrap().is_empty());
    assert!(h.coordinator.list_proposals(true).await.unwrap().is_empty());
    assert_eq!(h.coordinator.list_proposals(false).await.unwrap().len(), 1);

    // The released coin can back a new proposal
    let next = h.propose(1, "rent again", 100_000).await.unwrap();
    assert_eq!(next.id, 1);
    assert_eq!(
        h.coordinator.get_proposal_coins(1).await.unwrap(),
        vec![coin.outpoint]
    );

    assert_eq!(
        event_kinds(&mut events),
        vec!["created", "rejection", "rejected", "unlocked", "created"]
    );
}

#[tokio::test]
async fn test_double_spend_closes_proposal() {
    let h = Harness::new(2, 3);
    let coin = h.ledger.fund(300_000).await.unwrap();
    h.propose(2, "supplies", 100_000).await.unwrap();

    // Seeing its own unsigned transaction leaves the proposal open
    let own = h.coordinator.get_proposal_transaction(0).await.unwrap();
    assert!(h.coordinator.on_tx_added(&own).await.unwrap().is_empty());

    let external = external_spend(&coin);
    let closed = h.coordinator.on_tx_added(&external).await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status, ProposalStatus::DblSpend);

    let proposal = h.coordinator.get_proposal(0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::DblSpend);
    assert!(h
        .coordinator
        .proposal_for_coin(&coin.outpoint)
        .await
        .unwrap()
        .is_none());
    assert!(h.coordinator.locked_coins().await.unwrap().is_empty());

    let err = h
        .coordinator
        .approve_proposal(0, 0, vec![None])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Proposal(ProposalError::NotPending(ProposalStatus::DblSpend))
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Confirmation of the same spend changes nothing further
    assert!(h.coordinator.on_tx_confirmed(&external).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reorg_of_funding_transaction() {
    let h = Harness::new(1, 2);
    let (funding, coin) = h.ledger.receive(400_000).await.unwrap();
    h.propose(0, "build", 100_000).await.unwrap();
    assert_eq!(h.coordinator.locked_coins().await.unwrap(), vec![coin.outpoint]);

    let unrelated = external_spend(&h.ledger.fund(50_000).await.unwrap());
    assert!(h.coordinator.on_tx_removed(&unrelated).await.unwrap().is_empty());

    let closed = h.coordinator.on_tx_removed(&funding).await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status, ProposalStatus::DblSpend);
    assert!(h.coordinator.locked_coins().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_locked_sets_are_disjoint() {
    let h = Harness::new(1, 1);
    let mut funded = HashSet::new();
    for _ in 0..3 {
        funded.insert(h.ledger.fund(100_000).await.unwrap().outpoint);
    }

    let mut seen: HashSet<OutPoint> = HashSet::new();
    for i in 0..3 {
        let proposal = h.propose(0, &format!("p{}", i), 50_000).await.unwrap();
        for outpoint in h.coordinator.get_proposal_coins(proposal.id).await.unwrap() {
            assert!(seen.insert(outpoint), "{} locked twice", outpoint);
        }
    }
    assert_eq!(seen, funded);

    let err = h.propose(0, "p3", 50_000).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Ledger(LedgerError::InsufficientFunds { available: 0, .. })
    ));
    assert_eq!(h.coordinator.list_proposals(true).await.unwrap().len(), 3);
    assert_eq!(h.coordinator.locked_coins().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_terminal_proposals_are_immutable() {
    let h = Harness::new(1, 2);
    h.ledger.fund(100_000).await.unwrap();
    h.propose(0, "once", 10_000).await.unwrap();
    assert_eq!(h.approve(0, 0).await.unwrap().status, ProposalStatus::Approved);
    let snapshot = h.coordinator.get_proposal(0).await.unwrap();

    assert!(matches!(
        h.approve(1, 0).await,
        Err(CoordinatorError::Proposal(ProposalError::NotPending(
            ProposalStatus::Approved
        )))
    ));
    assert!(matches!(
        h.reject(1, 0).await,
        Err(CoordinatorError::Proposal(ProposalError::NotPending(
            ProposalStatus::Approved
        )))
    ));
    assert_eq!(h.coordinator.get_proposal(0).await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_bad_signatures_earn_no_credit() {
    let h = Harness::new(2, 2);
    h.ledger.fund(100_000).await.unwrap();
    h.propose(0, "check", 10_000).await.unwrap();

    // Cosigner 1's signatures submitted as cosigner 0
    let foreign = h.signatures(1, 0).await;
    let err = h
        .coordinator
        .approve_proposal(0, 0, foreign)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::SignaturesIncorrect {
            expected: 1,
            valid: 0
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Authentication);

    assert!(matches!(
        h.coordinator.approve_proposal(0, 0, vec![None]).await,
        Err(CoordinatorError::SignaturesIncorrect { .. })
    ));
    assert!(matches!(
        h.coordinator.approve_proposal(0, 0, vec![]).await,
        Err(CoordinatorError::SignatureCount {
            expected: 1,
            actual: 0
        })
    ));
    assert!(matches!(
        h.coordinator.approve_proposal(0, 7, vec![None]).await,
        Err(CoordinatorError::CosignerNotFound(7))
    ));

    let proposal = h.coordinator.get_proposal(0).await.unwrap();
    assert!(proposal.approvals.is_empty());
    assert_eq!(proposal.status, ProposalStatus::Progress);
}

#[tokio::test]
async fn test_creation_is_validated_before_locking() {
    let h = Harness::new(2, 2);
    h.ledger.fund(100_000).await.unwrap();

    let options = testutil::pay_options("lunch", 10_000);
    let forged = h.signers[1].create_proof("vault", &options);
    let err = h
        .coordinator
        .create_proposal(&options, 0, forged)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidCreationProof(0)));

    let long = testutil::pay_options(&"x".repeat(100), 10_000);
    let proof = h.signers[0].create_proof("vault", &long);
    let err = h.coordinator.create_proposal(&long, 0, proof).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidMemo { len: 100, .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(h.coordinator.locked_coins().await.unwrap().is_empty());
    assert!(h.coordinator.list_proposals(false).await.unwrap().is_empty());
    assert_eq!(
        h.coordinator.get_proposal(0).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_concurrent_approvals_reach_quorum_once() {
    let h = Harness::new(2, 3);
    h.ledger.fund(100_000).await.unwrap();
    h.ledger.fund(100_000).await.unwrap();
    h.propose(0, "split", 150_000).await.unwrap();

    let mut submissions = Vec::new();
    for signer in 0..3u8 {
        submissions.push((signer, h.signatures(signer, 0).await));
    }

    let results = join_all(
        submissions
            .into_iter()
            .map(|(signer, sigs)| h.coordinator.approve_proposal(0, signer, sigs)),
    )
    .await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 2);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(CoordinatorError::Proposal(ProposalError::NotPending(
            ProposalStatus::Approved
        )))
    )));

    let proposal = h.coordinator.get_proposal(0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Approved);
    assert_eq!(proposal.approvals.len(), 2);

    let signed = h.coordinator.get_proposal_transaction(0).await.unwrap();
    assert_eq!(signed.input.len(), 2);
    let view = h.ledger.coin_view(&signed).await.unwrap();
    verify_transaction(&signed, &view).unwrap();
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = CoordinatorConfig::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();

    let store = Arc::new(FileStore::open(config.storage.clone()).unwrap());
    let h = Harness::with_store(2, 3, store);
    h.ledger.fund(100_000).await.unwrap();
    h.ledger.fund(100_000).await.unwrap();
    h.propose(0, "persist", 10_000).await.unwrap();
    let before = h.approve(1, 0).await.unwrap();
    let locked = h.coordinator.get_proposal_coins(0).await.unwrap();
    assert_eq!(locked.len(), 1);

    let reopened = ProposalCoordinator::new(
        h.wallet.clone(),
        h.ledger.clone(),
        Arc::new(FileStore::open(config.storage.clone()).unwrap()),
        config.clone(),
    )
    .unwrap();

    assert_eq!(reopened.get_proposal(0).await.unwrap(), before);
    assert_eq!(reopened.locked_coins().await.unwrap(), locked);

    let options = testutil::pay_options("second", 10_000);
    let proof = h.signers[2].create_proof("vault", &options);
    let next = reopened.create_proposal(&options, 2, proof).await.unwrap();
    assert_eq!(next.id, 1);
    assert_ne!(reopened.get_proposal_coins(1).await.unwrap(), locked);
}

async fn end_to_end_of_kind(kind: ScriptKind) {
    let h = Harness::with_kind(2, 2, kind);
    let coin = h.ledger.fund(300_000).await.unwrap();
    assert_eq!(coin.script, h.wallet.output_script(KeyPath::new(0, 0)).unwrap());

    h.propose(1, "kind", 100_000).await.unwrap();
    assert_eq!(h.approve(0, 0).await.unwrap().status, ProposalStatus::Progress);
    assert_eq!(h.approve(1, 0).await.unwrap().status, ProposalStatus::Approved);

    let signed = h.coordinator.get_proposal_transaction(0).await.unwrap();
    let view = h.ledger.coin_view(&signed).await.unwrap();
    verify_transaction(&signed, &view).unwrap();
    assert_eq!(h.coordinator.send_proposal(0).await.unwrap(), signed);
}

#[tokio::test]
async fn test_legacy_wallet_end_to_end() {
    end_to_end_of_kind(ScriptKind::Legacy).await;
}

#[tokio::test]
async fn test_nested_wallet_end_to_end() {
    end_to_end_of_kind(ScriptKind::Nested).await;
}

#[tokio::test]
async fn test_vanished_coin_blocks_approval() {
    let h = Harness::new(1, 2);
    let coin = h.ledger.fund(200_000).await.unwrap();
    h.propose(0, "gone", 50_000).await.unwrap();
    let signatures = h.signatures(0, 0).await;

    // The ledger spent the coin but the coordinator never heard about it
    h.ledger.spend(&external_spend(&coin)).await;

    let err = h
        .coordinator
        .approve_proposal(0, 0, signatures)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Inconsistent(_)));
    assert_eq!(err.kind(), ErrorKind::Inconsistency);

    let proposal = h.coordinator.get_proposal(0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Progress);
    assert!(proposal.approvals.is_empty());
}

#[tokio::test]
async fn test_empty_approval_after_coin_vanished() {
    let h = Harness::new(2, 2);
    let coin = h.ledger.fund(200_000).await.unwrap();
    h.propose(0, "gone", 50_000).await.unwrap();
    h.ledger.spend(&external_spend(&coin)).await;

    let err = h
        .coordinator
        .approve_proposal(0, 0, vec![None])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inconsistency);
    assert!(h.coordinator.get_proposal(0).await.unwrap().approvals.is_empty());
}

#[tokio::test]
async fn test_foreign_inputs_are_refused_at_creation() {
    let h = Harness::new(1, 2);
    h.ledger.fund(200_000).await.unwrap();
    let stranger = Coin {
        outpoint: OutPoint::new(Txid::from_byte_array([0x51; 32]), 5),
        value: 80_000,
        script: p2pkh(&[5; 20]),
        height: Some(1),
    };
    let tx = external_spend(&stranger);

    let options = testutil::pay_options("foreign", 10_000);
    let proof = h.signers[0].create_proof("vault", &options);
    let err = h
        .coordinator
        .create_proposal_with_tx(&options, 0, proof, tx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::UnknownInput(outpoint) if outpoint == stranger.outpoint
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let empty = Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: Vec::new(),
        output: Vec::new(),
    };
    let proof = h.signers[0].create_proof("vault", &options);
    let err = h
        .coordinator
        .create_proposal_with_tx(&options, 0, proof, empty)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NoInputs));
    assert!(h.coordinator.locked_coins().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overflowing_outputs_are_rejected() {
    let h = Harness::new(1, 2);
    h.ledger.fund(200_000).await.unwrap();

    let half = u64::MAX / 2 + 1;
    let output = TxOut {
        value: Amount::from_sat(half),
        script_pubkey: p2pkh(&[0x77; 20]),
    };
    let options = ProposalOptions::new("huge", vec![output.clone(), output]);
    let proof = h.signers[0].create_proof("vault", &options);
    let err = h
        .coordinator
        .create_proposal(&options, 0, proof)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidAmount(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let options = testutil::pay_options("too much", Amount::MAX_MONEY.to_sat() + 1);
    let proof = h.signers[0].create_proof("vault", &options);
    let err = h
        .coordinator
        .create_proposal(&options, 0, proof)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.coordinator.list_proposals(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_below_threshold_is_not_sendable() {
    let h = Harness::new(2, 3);
    h.ledger.fund(200_000).await.unwrap();
    h.propose(0, "partial", 50_000).await.unwrap();

    let proposal = h.approve(2, 0).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Progress);
    assert!(matches!(
        h.coordinator.send_proposal(0).await,
        Err(CoordinatorError::NotApproved(ProposalStatus::Progress))
    ));

    // Only the unsigned transaction is stored until the quorum is met
    let stored = h.coordinator.get_proposal_transaction(0).await.unwrap();
    let view = h.ledger.coin_view(&stored).await.unwrap();
    assert!(verify_transaction(&stored, &view).is_err());
    assert!(h.ledger.broadcasts().await.is_empty());
}

async fn sign_with(
    ledger: &dyn LedgerPort,
    wallet: &MultisigWallet,
    signer: &TestCosigner,
    tx: &Transaction,
) -> Vec<Option<Vec<u8>>> {
    let view = ledger.coin_view(tx).await.unwrap();
    let paths = ledger.input_paths(tx).await.unwrap();
    signer.sign_inputs(wallet, tx, &view, &paths)
}

#[tokio::test]
async fn test_assembly_failure_closes_as_verify() {
    let (wallet, signers) = testutil::wallet(2, 2);
    let inner = Arc::new(MemoryLedger::new(wallet.clone()));
    let ledger = Arc::new(DriftingLedger {
        inner: inner.clone(),
        drift: AtomicU64::new(0),
    });
    let coordinator = ProposalCoordinator::new(
        wallet.clone(),
        ledger.clone(),
        Arc::new(MemoryStore::new()),
        CoordinatorConfig::default(),
    )
    .unwrap();
    let coin = inner.fund(200_000).await.unwrap();

    let options = testutil::pay_options("drift", 50_000);
    let proof = signers[0].create_proof("vault", &options);
    coordinator.create_proposal(&options, 0, proof).await.unwrap();
    let mut events = coordinator.subscribe();

    let tx = coordinator.get_proposal_transaction(0).await.unwrap();
    let first = sign_with(ledger.as_ref(), &wallet, &signers[0], &tx).await;
    let proposal = coordinator.approve_proposal(0, 0, first).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Progress);

    // The second signature commits to a different coin value than the first
    ledger.drift.store(1, Ordering::SeqCst);
    let second = sign_with(ledger.as_ref(), &wallet, &signers[1], &tx).await;
    let proposal = coordinator.approve_proposal(0, 1, second).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Verify);
    assert_eq!(proposal.approvals.len(), 2);

    assert_eq!(
        coordinator.get_proposal(0).await.unwrap().status,
        ProposalStatus::Verify
    );
    assert!(coordinator.locked_coins().await.unwrap().is_empty());
    assert!(coordinator
        .proposal_for_coin(&coin.outpoint)
        .await
        .unwrap()
        .is_none());
    assert!(matches!(
        coordinator.send_proposal(0).await,
        Err(CoordinatorError::NotApproved(ProposalStatus::Verify))
    ));
    assert_eq!(event_kinds(&mut events), vec!["approval", "rejected", "unlocked"]);
}
