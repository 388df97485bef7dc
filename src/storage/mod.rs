//! Storage module for coordinator persistence

pub mod file;
pub mod kv;
pub mod layout;

use std::io;
use thiserror::Error;

pub use file::FileStore;
pub use kv::{Batch, BatchOp, MemoryStore, Store};

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}
