//! Persistence for the ordered block log.

use std::fmt;
use std::sync::Arc;

use ledgerd_primitives::block::BlockData;

pub mod disk;
pub mod memory;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Backend for the append-only block log. Blocks arrive strictly in chain
/// order; `read_range` returns blocks with numbers in `[from, to]`, also in
/// chain order.
pub trait BlockStore: Send + Sync {
    fn append(&self, block: &BlockData) -> Result<(), StoreError>;
    fn read_range(&self, from: u64, to: u64) -> Result<Vec<BlockData>, StoreError>;
}

impl<T: BlockStore + ?Sized> BlockStore for Arc<T> {
    fn append(&self, block: &BlockData) -> Result<(), StoreError> {
        self.as_ref().append(block)
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<BlockData>, StoreError> {
        self.as_ref().read_range(from, to)
    }
}
