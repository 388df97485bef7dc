//! Key layout
//!
//! Ids are big-endian inside keys so that prefix scans return proposals in
//! id order. Outpoints are `txid (32) || vout (4, big-endian)`.
//!
//! | Key | Value |
//! |---|---|
//! | `D` | proposal id depth (u32 LE) |
//! | `p[pid]` | proposal record |
//! | `e[pid]` | pending marker |
//! | `f[pid]` | finished marker |
//! | `t[pid]` | proposal transaction |
//! | `c[outpoint]` | coin is locked |
//! | `P[outpoint]` | owning proposal id (u32 LE) |
//! | `C[pid][outpoint]` | coin held by proposal |

use bitcoin::hashes::Hash;

use crate::core::{OutPoint, Txid};

pub const DEPTH: u8 = b'D';
pub const PROPOSAL: u8 = b'p';
pub const PENDING: u8 = b'e';
pub const FINISHED: u8 = b'f';
pub const TRANSACTION: u8 = b't';
pub const LOCKED_COIN: u8 = b'c';
pub const COIN_OWNER: u8 = b'P';
pub const PROPOSAL_COIN: u8 = b'C';

const OUTPOINT_SIZE: usize = 36;

fn with_id(prefix: u8, id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(prefix);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn push_outpoint(key: &mut Vec<u8>, outpoint: &OutPoint) {
    key.extend_from_slice(outpoint.txid.as_byte_array());
    key.extend_from_slice(&outpoint.vout.to_be_bytes());
}

fn read_outpoint(data: &[u8]) -> Option<OutPoint> {
    if data.len() != OUTPOINT_SIZE {
        return None;
    }
    let txid: [u8; 32] = data[..32].try_into().ok()?;
    let vout = u32::from_be_bytes(data[32..].try_into().ok()?);
    Some(OutPoint::new(Txid::from_byte_array(txid), vout))
}

pub fn depth() -> Vec<u8> {
    vec![DEPTH]
}

pub fn proposal(id: u32) -> Vec<u8> {
    with_id(PROPOSAL, id)
}

pub fn pending(id: u32) -> Vec<u8> {
    with_id(PENDING, id)
}

pub fn finished(id: u32) -> Vec<u8> {
    with_id(FINISHED, id)
}

pub fn transaction(id: u32) -> Vec<u8> {
    with_id(TRANSACTION, id)
}

pub fn locked_coin(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = vec![LOCKED_COIN];
    push_outpoint(&mut key, outpoint);
    key
}

pub fn coin_owner(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = vec![COIN_OWNER];
    push_outpoint(&mut key, outpoint);
    key
}

pub fn proposal_coin(id: u32, outpoint: &OutPoint) -> Vec<u8> {
    let mut key = with_id(PROPOSAL_COIN, id);
    push_outpoint(&mut key, outpoint);
    key
}

/// Prefix of every coin held by proposal `id`
pub fn proposal_coins(id: u32) -> Vec<u8> {
    with_id(PROPOSAL_COIN, id)
}

/// Proposal id from a `p`, `e`, `f` or `t` key
pub fn parse_id(key: &[u8]) -> Option<u32> {
    if key.len() != 5 {
        return None;
    }
    Some(u32::from_be_bytes(key[1..5].try_into().ok()?))
}

/// Outpoint from a `c` or `P` key
pub fn parse_coin(key: &[u8]) -> Option<OutPoint> {
    read_outpoint(key.get(1..)?)
}

/// Outpoint from a `C` key
pub fn parse_proposal_coin(key: &[u8]) -> Option<OutPoint> {
    read_outpoint(key.get(5..)?)
}
