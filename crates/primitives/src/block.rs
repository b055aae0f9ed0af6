//! Block header, block, and the serialized block-data form.

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::merkle::Tree;
use crate::signature::{self, ZERO_HASH};
use crate::transaction::BlockTx;

/// Everything needed to cryptographically audit the chain without the
/// transaction bodies: hashing a block means hashing only its header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub prev_block_hash: String,
    pub timestamp: u64,
    pub beneficiary: AccountId,
    pub difficulty: u16,
    pub mining_reward: u64,
    pub state_root: String,
    pub trans_root: String,
    pub nonce: u64,
}

/// A group of transactions bundled under one mined header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub tree: Tree<BlockTx>,
}

impl Block {
    pub fn new(header: BlockHeader, trans: Vec<BlockTx>) -> Self {
        Block {
            header,
            tree: Tree::new(trans),
        }
    }

    /// The unique hash for the block. Block zero is the genesis sentinel and
    /// hashes to [`ZERO_HASH`].
    pub fn hash(&self) -> String {
        if self.header.number == 0 {
            return ZERO_HASH.to_string();
        }
        signature::hash(&self.header)
    }

    pub fn transactions(&self) -> Vec<BlockTx> {
        self.tree.values()
    }

    /// The serialized form written to disk and sent over the network.
    pub fn to_data(&self) -> BlockData {
        BlockData {
            hash: self.hash(),
            header: self.header.clone(),
            trans: self.tree.values(),
        }
    }

    /// Rebuilds a block, and its merkle tree, from the serialized form.
    pub fn from_data(data: BlockData) -> Self {
        Block::new(data.header, data.trans)
    }
}

/// Wire and disk representation of a block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: String,
    #[serde(rename = "block")]
    pub header: BlockHeader,
    pub trans: Vec<BlockTx>,
}
