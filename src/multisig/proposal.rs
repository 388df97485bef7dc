//! Spend proposals
//!
//! A proposal is one attempt to spend wallet funds. It tracks which
//! cosigners approved (with their per-input signatures) or rejected it and
//! closes as soon as the quorum is reached either way.

use std::collections::BTreeMap;
use std::fmt;

use bytes::BufMut;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::cosigner::Cosigner;
use crate::core::encoding::{read_array, read_bytes, read_u32_le, read_u64_le, read_u8, EncodingError};
use crate::core::TxOut;
use crate::crypto::{KeyError, MessageSignature, MESSAGE_SIGNATURE_SIZE};

// =============================================================================
// Constants
// =============================================================================

/// Longest memo in bytes
pub const MAX_MEMO_LENGTH: usize = 99;

/// Signature sets index inputs with a single byte
pub const MAX_PROPOSAL_INPUTS: usize = 255;

/// DER signature (72 bytes at most) plus the sighash byte
pub const MAX_INPUT_SIGNATURE_SIZE: usize = 73;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposalError {
    #[error("Memo must be 1 to {max} bytes, got {len}")]
    InvalidMemo { len: usize, max: usize },
    #[error("Proposal is not pending (status {0})")]
    NotPending(ProposalStatus),
    #[error("Cosigner {0} already approved")]
    AlreadyApproved(u8),
    #[error("Cosigner {0} already rejected")]
    AlreadyRejected(u8),
    #[error("Cosigner {0} is not part of this wallet")]
    UnknownCosigner(u8),
    #[error("Cannot force status {0}")]
    InvalidForceStatus(ProposalStatus),
    #[error("Too many inputs: {0}")]
    TooManyInputs(usize),
    #[error("Invalid signature length {len} at input {index}")]
    InvalidSignatureLength { index: usize, len: usize },
    #[error("Unknown status byte {0}")]
    InvalidStatus(u8),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Invalid threshold: {m}-of-{n}")]
    InvalidThreshold { m: u8, n: u8 },
    #[error("Decoding error: {0}")]
    Decode(#[from] EncodingError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

// =============================================================================
// Status
// =============================================================================

/// Proposal status; everything except `Progress` is terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ProposalStatus {
    Progress = 0,
    Approved = 1,
    Rejected = 2,
    #[serde(rename = "DBLSPEND")]
    DblSpend = 3,
    Verify = 4,
}

impl ProposalStatus {
    pub fn from_byte(byte: u8) -> Result<Self, ProposalError> {
        match byte {
            0 => Ok(ProposalStatus::Progress),
            1 => Ok(ProposalStatus::Approved),
            2 => Ok(ProposalStatus::Rejected),
            3 => Ok(ProposalStatus::DblSpend),
            4 => Ok(ProposalStatus::Verify),
            other => Err(ProposalError::InvalidStatus(other)),
        }
    }

    pub fn is_pending(&self) -> bool {
        *self == ProposalStatus::Progress
    }

    /// Statuses that close a proposal without a spend
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Rejected | ProposalStatus::DblSpend | ProposalStatus::Verify
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposalStatus::Progress => "PROGRESS",
            ProposalStatus::Approved => "APPROVED",
            ProposalStatus::Rejected => "REJECTED",
            ProposalStatus::DblSpend => "DBLSPEND",
            ProposalStatus::Verify => "VERIFY",
        };
        write!(f, "{}", name)
    }
}

/// Type byte separating creation proofs from rejection proofs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Create = 0x00,
    Reject = 0x01,
}

// =============================================================================
// Options
// =============================================================================

/// Spend request as signed by the proposal author
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalOptions {
    pub memo: String,
    /// Client timestamp (seconds)
    pub timestamp: u64,
    pub outputs: Vec<TxOut>,
    /// Fee rate per kilobyte, `None` lets the ledger choose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u64>,
}

impl ProposalOptions {
    pub fn new(memo: &str, outputs: Vec<TxOut>) -> Self {
        Self {
            memo: memo.to_string(),
            timestamp: Utc::now().timestamp().max(0) as u64,
            outputs,
            rate: None,
        }
    }

    /// Sum of requested output values, `None` on overflow
    pub fn total_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value.to_sat()))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProposalError> {
        serde_json::to_vec(self).map_err(|e| ProposalError::InvalidOptions(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProposalError> {
        serde_json::from_slice(data).map_err(|e| ProposalError::InvalidOptions(e.to_string()))
    }

    /// Bytes authenticated by a creation or rejection proof
    ///
    /// `walletName || type || JSON(options)`
    pub fn payload(&self, wallet_name: &str, kind: PayloadType) -> Result<Vec<u8>, ProposalError> {
        Ok(signable(wallet_name, kind, &self.to_json()?))
    }
}

fn signable(wallet_name: &str, kind: PayloadType, options: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(wallet_name.len() + 1 + options.len());
    payload.extend_from_slice(wallet_name.as_bytes());
    payload.push(kind as u8);
    payload.extend_from_slice(options);
    payload
}

// =============================================================================
// Signature Set
// =============================================================================

/// Per-input signatures of one approver; absent inputs are not theirs
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SignatureSet {
    len: u8,
    entries: BTreeMap<u8, Vec<u8>>,
}

impl SignatureSet {
    pub fn new(len: usize) -> Result<Self, ProposalError> {
        if len > MAX_PROPOSAL_INPUTS {
            return Err(ProposalError::TooManyInputs(len));
        }
        Ok(Self {
            len: len as u8,
            entries: BTreeMap::new(),
        })
    }

    /// Build from one optional signature per input
    pub fn from_signatures(signatures: &[Option<Vec<u8>>]) -> Result<Self, ProposalError> {
        let mut set = Self::new(signatures.len())?;
        for (index, signature) in signatures.iter().enumerate() {
            if let Some(signature) = signature {
                set.set(index, signature.clone())?;
            }
        }
        Ok(set)
    }

    pub fn set(&mut self, index: usize, signature: Vec<u8>) -> Result<(), ProposalError> {
        if index >= self.len as usize {
            return Err(ProposalError::TooManyInputs(index + 1));
        }
        if signature.is_empty() || signature.len() > MAX_INPUT_SIGNATURE_SIZE {
            return Err(ProposalError::InvalidSignatureLength {
                index,
                len: signature.len(),
            });
        }
        self.entries.insert(index as u8, signature);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        u8::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(&i))
            .map(Vec::as_slice)
    }

    /// Logical length (input count)
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of inputs with a signature
    pub fn present(&self) -> usize {
        self.entries.len()
    }

    /// Dense view with `None` for absent inputs
    pub fn to_vec(&self) -> Vec<Option<Vec<u8>>> {
        (0..self.len())
            .map(|i| self.get(i).map(<[u8]>::to_vec))
            .collect()
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.len);
        buf.put_u8(self.entries.len() as u8);
        for (index, signature) in &self.entries {
            buf.put_u8(*index);
            buf.put_u8(signature.len() as u8);
            buf.put_slice(signature);
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self, ProposalError> {
        let len = read_u8(buf)?;
        let present = read_u8(buf)?;
        let mut set = Self {
            len,
            entries: BTreeMap::new(),
        };
        for _ in 0..present {
            let index = read_u8(buf)?;
            let size = read_u8(buf)? as usize;
            set.set(index as usize, read_bytes(buf, size)?)?;
        }
        Ok(set)
    }
}

impl Serialize for SignatureSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dense: Vec<Option<String>> = self
            .to_vec()
            .into_iter()
            .map(|sig| sig.map(hex::encode))
            .collect();
        dense.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SignatureSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dense: Vec<Option<String>> = Vec::deserialize(deserializer)?;
        let signatures = dense
            .into_iter()
            .map(|sig| sig.map(hex::decode).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        SignatureSet::from_signatures(&signatures).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Proposal
// =============================================================================

fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

fn check_threshold(m: u8, n: u8) -> Result<(), ProposalError> {
    if m == 0 || m > n {
        return Err(ProposalError::InvalidThreshold { m, n });
    }
    Ok(())
}

fn options_as_json<S: Serializer>(options: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    match serde_json::from_slice::<serde_json::Value>(options) {
        Ok(value) => value.serialize(serializer),
        Err(_) => serializer.serialize_str(&hex::encode(options)),
    }
}

/// A spend proposal
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: u32,
    pub memo: String,
    pub status: ProposalStatus,
    /// Cosigner id of the creator
    pub author: u8,
    /// Creation proof by the author
    pub signature: MessageSignature,
    /// Signed options JSON, kept byte-exact
    #[serde(serialize_with = "options_as_json")]
    pub options: Vec<u8>,
    pub timestamp: u64,
    pub created_at: u64,
    /// 0 while pending
    pub closed_at: u64,
    pub m: u8,
    pub n: u8,
    pub approvals: BTreeMap<u8, SignatureSet>,
    pub rejections: BTreeMap<u8, MessageSignature>,
}

impl Proposal {
    /// Create a pending proposal from signed options
    pub fn new(
        id: u32,
        author: u8,
        options: &ProposalOptions,
        signature: MessageSignature,
        m: u8,
        n: u8,
    ) -> Result<Self, ProposalError> {
        let len = options.memo.len();
        if len == 0 || len > MAX_MEMO_LENGTH {
            return Err(ProposalError::InvalidMemo {
                len,
                max: MAX_MEMO_LENGTH,
            });
        }
        check_threshold(m, n)?;
        if author >= n {
            return Err(ProposalError::UnknownCosigner(author));
        }

        Ok(Self {
            id,
            memo: options.memo.clone(),
            status: ProposalStatus::Progress,
            author,
            signature,
            options: options.to_json()?,
            timestamp: options.timestamp,
            created_at: now(),
            closed_at: 0,
            m,
            n,
            approvals: BTreeMap::new(),
            rejections: BTreeMap::new(),
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Rejections that make approval impossible
    pub fn critical(&self) -> usize {
        (self.n - self.m) as usize + 1
    }

    pub fn options(&self) -> Result<ProposalOptions, ProposalError> {
        ProposalOptions::from_json(&self.options)
    }

    pub fn payload(&self, wallet_name: &str, kind: PayloadType) -> Vec<u8> {
        signable(wallet_name, kind, &self.options)
    }

    pub fn verify_creation(&self, wallet_name: &str, author: &Cosigner) -> bool {
        author.id == self.author
            && author.verify_proof(&self.payload(wallet_name, PayloadType::Create), &self.signature)
    }

    pub fn verify_rejection(
        &self,
        wallet_name: &str,
        cosigner: &Cosigner,
        signature: &MessageSignature,
    ) -> bool {
        cosigner.verify_proof(&self.payload(wallet_name, PayloadType::Reject), signature)
    }

    /// Whether `cosigner_id` may still vote on this proposal
    pub fn check_vote(&self, cosigner_id: u8) -> Result<(), ProposalError> {
        if !self.is_pending() {
            return Err(ProposalError::NotPending(self.status));
        }
        if cosigner_id >= self.n {
            return Err(ProposalError::UnknownCosigner(cosigner_id));
        }
        if self.rejections.contains_key(&cosigner_id) {
            return Err(ProposalError::AlreadyRejected(cosigner_id));
        }
        if self.approvals.contains_key(&cosigner_id) {
            return Err(ProposalError::AlreadyApproved(cosigner_id));
        }
        Ok(())
    }

    /// Record an approval and re-evaluate the quorum
    pub fn approve(
        &mut self,
        cosigner_id: u8,
        signatures: SignatureSet,
    ) -> Result<ProposalStatus, ProposalError> {
        self.check_vote(cosigner_id)?;
        self.approvals.insert(cosigner_id, signatures);
        Ok(self.update_status())
    }

    /// Record a rejection and re-evaluate the quorum
    pub fn reject(
        &mut self,
        cosigner_id: u8,
        signature: MessageSignature,
    ) -> Result<ProposalStatus, ProposalError> {
        self.check_vote(cosigner_id)?;
        self.rejections.insert(cosigner_id, signature);
        Ok(self.update_status())
    }

    /// Close a pending proposal with a rejection-class status
    pub fn force_reject(&mut self, status: ProposalStatus) -> Result<(), ProposalError> {
        if !status.is_rejection() {
            return Err(ProposalError::InvalidForceStatus(status));
        }
        if !self.is_pending() {
            return Err(ProposalError::NotPending(self.status));
        }
        self.close(status);
        Ok(())
    }

    /// Apply the quorum rules to the current votes
    pub fn update_status(&mut self) -> ProposalStatus {
        if self.is_pending() {
            if self.rejections.len() >= self.critical() {
                self.close(ProposalStatus::Rejected);
            } else if self.approvals.len() == self.m as usize {
                self.close(ProposalStatus::Approved);
            }
        }
        self.status
    }

    fn close(&mut self, status: ProposalStatus) {
        self.status = status;
        self.closed_at = now();
    }

    // =========================================================================
    // Binary record
    // =========================================================================

    /// Encode the record; `m` and `n` are not included
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.options.len());
        buf.put_u32_le(self.id);
        buf.put_u8(self.memo.len() as u8);
        buf.put_slice(self.memo.as_bytes());
        buf.put_u8(self.status as u8);
        buf.put_u8(self.author);
        buf.put_slice(self.signature.as_bytes());
        buf.put_u32_le(self.options.len() as u32);
        buf.put_slice(&self.options);
        buf.put_u64_le(self.timestamp);
        buf.put_u64_le(self.created_at);
        buf.put_u64_le(self.closed_at);

        buf.put_u8(self.approvals.len() as u8);
        for (id, set) in &self.approvals {
            buf.put_u8(*id);
            set.encode_into(&mut buf);
        }

        buf.put_u8(self.rejections.len() as u8);
        for (id, signature) in &self.rejections {
            buf.put_u8(*id);
            buf.put_slice(signature.as_bytes());
        }
        buf
    }

    /// Decode a record, attaching the wallet's `m` and `n`
    pub fn decode(data: &[u8], m: u8, n: u8) -> Result<Self, ProposalError> {
        check_threshold(m, n)?;
        let mut buf = data;
        let id = read_u32_le(&mut buf)?;
        let memo_len = read_u8(&mut buf)? as usize;
        let memo = String::from_utf8(read_bytes(&mut buf, memo_len)?)
            .map_err(|_| EncodingError::Invalid("memo is not utf-8".to_string()))?;
        let status = ProposalStatus::from_byte(read_u8(&mut buf)?)?;
        let author = read_u8(&mut buf)?;
        let signature = MessageSignature(read_array::<_, MESSAGE_SIGNATURE_SIZE>(&mut buf)?);
        let options_len = read_u32_le(&mut buf)? as usize;
        let options = read_bytes(&mut buf, options_len)?;
        let timestamp = read_u64_le(&mut buf)?;
        let created_at = read_u64_le(&mut buf)?;
        let closed_at = read_u64_le(&mut buf)?;

        let mut approvals = BTreeMap::new();
        for _ in 0..read_u8(&mut buf)? {
            let cosigner = read_u8(&mut buf)?;
            approvals.insert(cosigner, SignatureSet::decode_from(&mut buf)?);
        }

        let mut rejections = BTreeMap::new();
        for _ in 0..read_u8(&mut buf)? {
            let cosigner = read_u8(&mut buf)?;
            let signature = read_array::<_, MESSAGE_SIGNATURE_SIZE>(&mut buf)?;
            rejections.insert(cosigner, MessageSignature(signature));
        }

        if !buf.is_empty() {
            return Err(EncodingError::TrailingBytes(buf.len()).into());
        }

        Ok(Self {
            id,
            memo,
            status,
            author,
            signature,
            options,
            timestamp,
            created_at,
            closed_at,
            m,
            n,
            approvals,
            rejections,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
