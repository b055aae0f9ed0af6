//! Pending-transaction pool keyed by (from, nonce) with a pluggable
//! selection strategy.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use ledgerd_primitives::transaction::{BlockTx, TransactionError};

#[derive(Debug)]
pub enum MempoolError {
    Transaction(TransactionError),
    LockPoisoned,
}

impl fmt::Display for MempoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MempoolError::Transaction(err) => write!(f, "{err}"),
            MempoolError::LockPoisoned => write!(f, "mempool lock poisoned"),
        }
    }
}

impl std::error::Error for MempoolError {}

impl From<TransactionError> for MempoolError {
    fn from(err: TransactionError) -> Self {
        MempoolError::Transaction(err)
    }
}

/// How transactions are picked when building a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectStrategy {
    /// Highest gas fee plus tip first.
    #[default]
    Tip,
}

impl FromStr for SelectStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "tip" => Ok(SelectStrategy::Tip),
            other => Err(format!("unknown select strategy {other:?}")),
        }
    }
}

/// Uncommitted transactions. Re-submitting the same (from, nonce) replaces
/// the earlier entry, which lets a wallet bump its tip.
pub struct Mempool {
    chain_id: u16,
    strategy: SelectStrategy,
    pool: Mutex<HashMap<String, BlockTx>>,
}

impl Mempool {
    pub fn new(chain_id: u16, strategy: SelectStrategy) -> Self {
        Mempool {
            chain_id,
            strategy,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Admits a transaction after re-validating its signature and format.
    pub fn upsert(&self, tx: BlockTx) -> Result<(), MempoolError> {
        tx.signed.validate(self.chain_id)?;
        let mut pool = self.pool.lock().map_err(|_| MempoolError::LockPoisoned)?;
        pool.insert(map_key(&tx), tx);
        Ok(())
    }

    pub fn delete(&self, tx: &BlockTx) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.remove(&map_key(tx));
        }
    }

    pub fn len(&self) -> usize {
        self.pool.lock().map(|pool| pool.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `take` transactions in selection order.
    pub fn pick_best(&self, take: usize) -> Vec<BlockTx> {
        let mut txs: Vec<BlockTx> = match self.pool.lock() {
            Ok(pool) => pool.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };

        match self.strategy {
            SelectStrategy::Tip => txs.sort_by(|a, b| {
                let fee_a = a.gas_fee().saturating_add(a.tip());
                let fee_b = b.gas_fee().saturating_add(b.tip());
                // Ties resolve by (from, nonce) so block contents stay
                // deterministic across nodes.
                fee_b
                    .cmp(&fee_a)
                    .then_with(|| a.from_id().cmp(b.from_id()))
                    .then_with(|| a.nonce().cmp(&b.nonce()))
            }),
        }

        txs.truncate(take);
        txs
    }

    /// Every transaction in selection order.
    pub fn pick_all(&self) -> Vec<BlockTx> {
        self.pick_best(usize::MAX)
    }
}

fn map_key(tx: &BlockTx) -> String {
    format!("{}:{}", tx.from_id(), tx.nonce())
}

#[cfg(test)]
mod tests {
    use ledgerd_primitives::account::AccountId;
    use ledgerd_primitives::transaction::{BlockTx, Tx};
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    use super::{Mempool, SelectStrategy};

    const CHAIN_ID: u16 = 1;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).expect("secret key")
    }

    fn address_of(key: &SecretKey) -> AccountId {
        let secp = Secp256k1::new();
        AccountId::from_public_key(&PublicKey::from_secret_key(&secp, key))
    }

    fn block_tx(key_byte: u8, nonce: u64, tip: u64) -> BlockTx {
        let key = key(key_byte);
        let to = AccountId::parse("0x6fe6ccf0d379567c1a10e7eaa5e535b533db3bd9").expect("account");
        let signed = Tx::new(CHAIN_ID, address_of(&key), to, 10, nonce, tip, Vec::new())
            .sign(&key)
            .expect("sign");
        BlockTx::new(signed, 1, 1)
    }

    fn mempool() -> Mempool {
        Mempool::new(CHAIN_ID, SelectStrategy::Tip)
    }

    #[test]
    fn resubmitting_the_same_nonce_replaces_the_entry() {
        let pool = mempool();
        pool.upsert(block_tx(0x42, 7, 1)).expect("upsert");
        pool.upsert(block_tx(0x42, 7, 5)).expect("upsert");

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pick_all()[0].tip(), 5);
    }

    #[test]
    fn rejects_a_transaction_for_another_chain() {
        let pool = Mempool::new(CHAIN_ID + 1, SelectStrategy::Tip);
        assert!(pool.upsert(block_tx(0x42, 1, 0)).is_err());
    }

    #[test]
    fn tip_strategy_orders_by_fee_then_sender() {
        let pool = mempool();
        pool.upsert(block_tx(0x42, 1, 0)).expect("upsert");
        pool.upsert(block_tx(0x43, 1, 50)).expect("upsert");
        pool.upsert(block_tx(0x44, 1, 10)).expect("upsert");

        let tips: Vec<u64> = pool.pick_all().iter().map(|tx| tx.tip()).collect();
        assert_eq!(tips, vec![50, 10, 0]);

        let top = pool.pick_best(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].tip(), 50);
    }

    #[test]
    fn equal_fees_tie_break_deterministically() {
        let pool = mempool();
        pool.upsert(block_tx(0x42, 2, 3)).expect("upsert");
        pool.upsert(block_tx(0x42, 1, 3)).expect("upsert");
        pool.upsert(block_tx(0x43, 1, 3)).expect("upsert");

        let picked = pool.pick_all();
        let keys: Vec<(String, u64)> = picked
            .iter()
            .map(|tx| (tx.from_id().to_string(), tx.nonce()))
            .collect();
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn delete_removes_the_committed_transaction() {
        let pool = mempool();
        let tx = block_tx(0x42, 1, 0);
        pool.upsert(tx.clone()).expect("upsert");
        pool.upsert(block_tx(0x42, 2, 0)).expect("upsert");

        pool.delete(&tx);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pick_all()[0].nonce(), 2);
    }

    #[test]
    fn select_strategy_parses_known_names_only() {
        assert_eq!(
            "Tip".parse::<SelectStrategy>().expect("parse"),
            SelectStrategy::Tip
        );
        assert!("fifo".parse::<SelectStrategy>().is_err());
    }
}
