//! Proof-of-work mining: build a candidate block and search for a nonce
//! that satisfies the difficulty rule.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ledgerd_primitives::account::AccountId;
use ledgerd_primitives::block::{Block, BlockHeader};
use ledgerd_primitives::signature::ZERO_HASH;
use ledgerd_primitives::transaction::BlockTx;
use rand::Rng;

use crate::difficulty::is_hash_solved;
use crate::observer::MiningObserver;

/// How many attempts between progress events.
const PROGRESS_INTERVAL: u64 = 1_000_000;

#[derive(Debug, PartialEq, Eq)]
pub enum MineError {
    Cancelled,
}

impl fmt::Display for MineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MineError::Cancelled => write!(f, "mining cancelled"),
        }
    }
}

impl std::error::Error for MineError {}

/// Everything required to construct and mine the next block.
pub struct MineArgs {
    pub beneficiary: AccountId,
    pub difficulty: u16,
    pub mining_reward: u64,
    pub prev_block: Block,
    pub state_root: String,
    pub trans: Vec<BlockTx>,
}

/// Constructs the next block and searches nonces until the header hash
/// satisfies the difficulty rule. The token is polled every iteration so a
/// winning peer block or shutdown stops the search promptly; a cancelled
/// run leaves no partial state.
pub fn mine_block(
    args: MineArgs,
    cancel: &AtomicBool,
    observer: &dyn MiningObserver,
) -> Result<Block, MineError> {
    let prev_block_hash = if args.prev_block.header.number > 0 {
        args.prev_block.hash()
    } else {
        ZERO_HASH.to_string()
    };

    let mut block = Block::new(
        BlockHeader {
            number: args.prev_block.header.number + 1,
            prev_block_hash,
            timestamp: now_millis(),
            beneficiary: args.beneficiary,
            difficulty: args.difficulty,
            mining_reward: args.mining_reward,
            state_root: args.state_root,
            trans_root: String::new(),
            nonce: 0,
        },
        args.trans,
    );
    block.header.trans_root = block.tree.root_hex();

    // Start from a random nonce so competing miners walk different parts of
    // the search space, then increment.
    block.header.nonce = rand::thread_rng().gen_range(0..1u64 << 63);

    observer.mining_started(block.tree.len());

    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        if attempts % PROGRESS_INTERVAL == 0 {
            observer.mining_progress(attempts);
        }

        if cancel.load(Ordering::Relaxed) {
            observer.mining_cancelled();
            return Err(MineError::Cancelled);
        }

        let hash = block.hash();
        if is_hash_solved(block.header.difficulty, &hash) {
            observer.mining_solved(&hash, attempts);
            return Ok(block);
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
