//! Core account, transaction, block, and signing types for the ledger.

pub mod account;
pub mod block;
pub mod hash;
pub mod merkle;
pub mod signature;
pub mod transaction;

pub use account::{Account, AccountId};
pub use block::{Block, BlockData, BlockHeader};
pub use merkle::{MerkleHash, Tree};
pub use signature::{QID, ZERO_HASH};
pub use transaction::{BlockTx, SignedTx, Tx};
