//! Binary encoding helpers
//!
//! Little-endian integers and compact-size length prefixes on top of the
//! `bytes` buffer traits, used by proposal records and message signing.
//! Reads are bounds-checked and return [`EncodingError`] instead of
//! panicking on short input.

use bytes::{Buf, BufMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("Trailing data: {0} bytes")]
    TrailingBytes(usize),
    #[error("Invalid data: {0}")]
    Invalid(String),
}

fn need<B: Buf>(buf: &B, needed: usize) -> Result<(), EncodingError> {
    if buf.remaining() < needed {
        return Err(EncodingError::UnexpectedEof {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_u8<B: Buf>(buf: &mut B) -> Result<u8, EncodingError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u32_le<B: Buf>(buf: &mut B) -> Result<u32, EncodingError> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn read_u64_le<B: Buf>(buf: &mut B) -> Result<u64, EncodingError> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub fn read_array<B: Buf, const N: usize>(buf: &mut B) -> Result<[u8; N], EncodingError> {
    need(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn read_bytes<B: Buf>(buf: &mut B, len: usize) -> Result<Vec<u8>, EncodingError> {
    need(buf, len)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Write a compact-size integer
pub fn write_varint<B: BufMut>(buf: &mut B, n: u64) {
    match n {
        0..=0xfc => buf.put_u8(n as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(n as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(n as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(n);
        }
    }
}

/// Write a compact-size length followed by the bytes
pub fn write_var_bytes<B: BufMut>(buf: &mut B, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.put_slice(data);
}
