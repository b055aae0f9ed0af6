//! Full validation of a block against the chain tip.

use std::fmt;

use ledgerd_primitives::block::Block;
use ledgerd_primitives::transaction::TransactionError;

use crate::difficulty::is_hash_solved;

#[derive(Debug)]
pub enum BlockError {
    /// The proposed block is two or more blocks ahead of the local tip,
    /// which means the chains have diverged and a resync is needed.
    ChainForked { got: u64, latest: u64 },
    InvalidNumber { got: u64, want: u64 },
    InvalidPrevHash { got: String, want: String },
    HashNotSolved(String),
    InvalidTransRoot,
    InvalidStateRoot { got: String, want: String },
    Transaction(TransactionError),
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::ChainForked { got, latest } => {
                write!(f, "chain forked: block {got} against latest {latest}, resync required")
            }
            BlockError::InvalidNumber { got, want } => {
                write!(f, "invalid block number: got {got}, expected {want}")
            }
            BlockError::InvalidPrevHash { got, want } => {
                write!(f, "previous block hash mismatch: got {got}, expected {want}")
            }
            BlockError::HashNotSolved(hash) => {
                write!(f, "block hash {hash} does not satisfy the difficulty")
            }
            BlockError::InvalidTransRoot => {
                write!(f, "transaction root does not match the block transactions")
            }
            BlockError::InvalidStateRoot { got, want } => {
                write!(f, "state root mismatch: got {got}, expected {want}")
            }
            BlockError::Transaction(err) => write!(f, "invalid block transaction: {err}"),
        }
    }
}

impl std::error::Error for BlockError {}

impl From<TransactionError> for BlockError {
    fn from(err: TransactionError) -> Self {
        BlockError::Transaction(err)
    }
}

/// Validates a block against the current tip and the account state root
/// captured before applying it. Every contained transaction must carry a
/// signature that recovers to its from account on the right chain.
pub fn validate_block(
    block: &Block,
    prev_block: &Block,
    expected_state_root: &str,
    chain_id: u16,
) -> Result<(), BlockError> {
    let next = prev_block.header.number + 1;
    if block.header.number > next {
        return Err(BlockError::ChainForked {
            got: block.header.number,
            latest: prev_block.header.number,
        });
    }
    if block.header.number != next {
        return Err(BlockError::InvalidNumber {
            got: block.header.number,
            want: next,
        });
    }

    let prev_hash = prev_block.hash();
    if block.header.prev_block_hash != prev_hash {
        return Err(BlockError::InvalidPrevHash {
            got: block.header.prev_block_hash.clone(),
            want: prev_hash,
        });
    }

    let hash = block.hash();
    if !is_hash_solved(block.header.difficulty, &hash) {
        return Err(BlockError::HashNotSolved(hash));
    }

    if block.header.trans_root != block.tree.root_hex() {
        return Err(BlockError::InvalidTransRoot);
    }

    if block.header.state_root != expected_state_root {
        return Err(BlockError::InvalidStateRoot {
            got: block.header.state_root.clone(),
            want: expected_state_root.to_string(),
        });
    }

    for tx in block.tree.values() {
        tx.signed.validate(chain_id)?;
    }

    Ok(())
}
