use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use ledgerd_consensus::{Genesis, QUERY_LATEST};
use ledgerd_primitives::account::{sort_accounts, Account, AccountError, AccountId};
use ledgerd_primitives::block::{Block, BlockData, BlockHeader};
use ledgerd_primitives::signature;
use ledgerd_primitives::transaction::BlockTx;
use ledgerd_storage::{BlockStore, StoreError};

pub type Accounts = HashMap<AccountId, Account>;

#[derive(Debug)]
pub enum ChainStateError {
    UnknownAccount,
    InvalidGenesisAccount(AccountError),
    InvalidNonce { got: u64, want: u64 },
    InsufficientFunds { balance: u64, needed: u64 },
    Store(StoreError),
    LockPoisoned,
}

impl fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::UnknownAccount => write!(f, "account does not exist"),
            ChainStateError::InvalidGenesisAccount(err) => {
                write!(f, "invalid genesis account: {err}")
            }
            ChainStateError::InvalidNonce { got, want } => {
                write!(f, "invalid transaction nonce: got {got}, expected {want}")
            }
            ChainStateError::InsufficientFunds { balance, needed } => {
                write!(f, "insufficient funds: balance {balance}, needed {needed}")
            }
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::LockPoisoned => write!(f, "chain state lock poisoned"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

struct Inner {
    accounts: Accounts,
    latest_block: Block,
}

/// The account database plus the chain tip, backed by the append-only block
/// log. The only writer is [`ChainState::accept_block`]; everything else
/// reads snapshots.
pub struct ChainState<S: BlockStore> {
    genesis: Genesis,
    storage: S,
    inner: RwLock<Inner>,
}

impl<S: BlockStore> ChainState<S> {
    /// Seeds accounts from the genesis balances and replays any persisted
    /// blocks to rebuild the current state.
    pub fn new(genesis: Genesis, storage: S) -> Result<Self, ChainStateError> {
        let mut accounts = Accounts::new();
        for (raw, balance) in &genesis.balances {
            let account_id =
                AccountId::parse(raw).map_err(ChainStateError::InvalidGenesisAccount)?;
            accounts.insert(account_id.clone(), Account::new(account_id, *balance));
        }

        let mut latest_block = Block::default();
        for data in storage.read_range(1, QUERY_LATEST)? {
            let block = Block::from_data(data);
            for tx in block.tree.values() {
                apply_transaction(&mut accounts, &block.header, &tx)?;
            }
            apply_mining_reward(&mut accounts, &block.header);
            latest_block = block;
        }

        Ok(ChainState {
            genesis,
            storage,
            inner: RwLock::new(Inner {
                accounts,
                latest_block,
            }),
        })
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub fn query(&self, account_id: &AccountId) -> Result<Account, ChainStateError> {
        let inner = self.inner.read().map_err(|_| ChainStateError::LockPoisoned)?;
        inner
            .accounts
            .get(account_id)
            .cloned()
            .ok_or(ChainStateError::UnknownAccount)
    }

    /// A deep copy of the current account map.
    pub fn accounts(&self) -> Accounts {
        match self.inner.read() {
            Ok(inner) => inner.accounts.clone(),
            Err(_) => Accounts::new(),
        }
    }

    pub fn latest_block(&self) -> Block {
        match self.inner.read() {
            Ok(inner) => inner.latest_block.clone(),
            Err(_) => Block::default(),
        }
    }

    /// Hash of the account table sorted by id. The snapshot is taken under
    /// the read lock; hashing happens without holding it.
    pub fn hash_state(&self) -> String {
        let mut accounts: Vec<Account> = match self.inner.read() {
            Ok(inner) => inner.accounts.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        sort_accounts(&mut accounts);
        signature::hash(&accounts)
    }

    /// Blocks with numbers in `[from, to]`, read back from storage.
    pub fn read_blocks(&self, from: u64, to: u64) -> Result<Vec<BlockData>, ChainStateError> {
        Ok(self.storage.read_range(from, to)?)
    }

    /// Applies a validated block: every transaction plus the mining reward
    /// runs against a staged copy of the accounts, and only when all of them
    /// succeed is the block persisted and the state committed. A failing
    /// transaction therefore rejects the whole block and leaves nothing
    /// behind.
    pub fn accept_block(&self, block: &Block) -> Result<(), ChainStateError> {
        let mut staged = {
            let inner = self.inner.read().map_err(|_| ChainStateError::LockPoisoned)?;
            inner.accounts.clone()
        };

        for tx in block.tree.values() {
            apply_transaction(&mut staged, &block.header, &tx)?;
        }
        apply_mining_reward(&mut staged, &block.header);

        self.storage.append(&block.to_data())?;

        let mut inner = self.inner.write().map_err(|_| ChainStateError::LockPoisoned)?;
        inner.accounts = staged;
        inner.latest_block = block.clone();
        Ok(())
    }
}

/// Applies one transaction to the account map. The gas fee is charged up
/// front, capped at the remaining balance, and stays charged even when a
/// later check fails; that is the only cost a bad actor cannot avoid.
pub fn apply_transaction(
    accounts: &mut Accounts,
    header: &BlockHeader,
    tx: &BlockTx,
) -> Result<(), ChainStateError> {
    let from_id = tx.from_id().clone();
    let to_id = tx.to_id().clone();
    let beneficiary = header.beneficiary.clone();

    let from_balance = account(accounts, &from_id).balance;
    let gas_fee = tx.gas_fee().min(from_balance);
    account(accounts, &from_id).balance -= gas_fee;
    account(accounts, &beneficiary).balance += gas_fee;

    let from = account(accounts, &from_id).clone();
    if tx.nonce() != from.nonce + 1 {
        return Err(ChainStateError::InvalidNonce {
            got: tx.nonce(),
            want: from.nonce + 1,
        });
    }

    let needed = tx.value().saturating_add(tx.tip());
    if from.balance == 0 || from.balance < needed {
        return Err(ChainStateError::InsufficientFunds {
            balance: from.balance,
            needed,
        });
    }

    account(accounts, &from_id).balance -= tx.value();
    account(accounts, &to_id).balance += tx.value();

    account(accounts, &from_id).balance -= tx.tip();
    account(accounts, &beneficiary).balance += tx.tip();

    account(accounts, &from_id).nonce = tx.nonce();
    Ok(())
}

/// Credits the block's mining reward to its beneficiary.
pub fn apply_mining_reward(accounts: &mut Accounts, header: &BlockHeader) {
    account(accounts, &header.beneficiary).balance += header.mining_reward;
}

// Accounts materialize with zero nonce and balance on first reference.
fn account<'a>(accounts: &'a mut Accounts, account_id: &AccountId) -> &'a mut Account {
    accounts
        .entry(account_id.clone())
        .or_insert_with(|| Account::new(account_id.clone(), 0))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ledgerd_consensus::Genesis;
    use ledgerd_primitives::account::{Account, AccountId};
    use ledgerd_primitives::block::{Block, BlockHeader};
    use ledgerd_primitives::signature::ZERO_HASH;
    use ledgerd_primitives::transaction::{BlockTx, Tx};
    use ledgerd_storage::memory::MemoryStore;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    use super::{apply_mining_reward, apply_transaction, Accounts, ChainState, ChainStateError};

    const CHAIN_ID: u16 = 1;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).expect("secret key")
    }

    fn address_of(key: &SecretKey) -> AccountId {
        let secp = Secp256k1::new();
        AccountId::from_public_key(&PublicKey::from_secret_key(&secp, key))
    }

    fn miner() -> AccountId {
        AccountId::parse("0x6fe6ccf0d379567c1a10e7eaa5e535b533db3bd9").expect("account")
    }

    fn header() -> BlockHeader {
        BlockHeader {
            number: 1,
            beneficiary: miner(),
            mining_reward: 700,
            ..BlockHeader::default()
        }
    }

    fn block_tx(key: &SecretKey, to: AccountId, value: u64, nonce: u64, tip: u64) -> BlockTx {
        let signed = Tx::new(CHAIN_ID, address_of(key), to, value, nonce, tip, Vec::new())
            .sign(key)
            .expect("sign");
        BlockTx::new(signed, 1, 1)
    }

    fn seeded(accounts: &[(AccountId, u64, u64)]) -> Accounts {
        accounts
            .iter()
            .map(|(id, nonce, balance)| {
                let mut account = Account::new(id.clone(), *balance);
                account.nonce = *nonce;
                (id.clone(), account)
            })
            .collect()
    }

    fn genesis(balances: &[(AccountId, u64)]) -> Genesis {
        Genesis {
            date: Utc::now(),
            chain_id: CHAIN_ID,
            trans_per_block: 10,
            difficulty: 1,
            miner_reward: 700,
            gas_price: 1,
            balances: balances
                .iter()
                .map(|(id, balance)| (id.as_str().to_string(), *balance))
                .collect(),
        }
    }

    #[test]
    fn a_simple_transfer_moves_value_fee_and_tip() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let to = miner_free_account();
        let mut accounts = seeded(&[(from.clone(), 0, 1_000)]);

        let tx = block_tx(&sender, to.clone(), 100, 1, 10);
        apply_transaction(&mut accounts, &header(), &tx).expect("apply");

        // gas fee 1, value 100, tip 10
        assert_eq!(accounts[&from].balance, 889);
        assert_eq!(accounts[&from].nonce, 1);
        assert_eq!(accounts[&to].balance, 100);
        assert_eq!(accounts[&miner()].balance, 11);
    }

    fn miner_free_account() -> AccountId {
        AccountId::parse("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").expect("account")
    }

    #[test]
    fn insufficient_funds_still_charges_the_gas_fee() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let mut accounts = seeded(&[(from.clone(), 0, 10)]);

        // value 5 + tip 6 = 11 against a post-gas balance of 9.
        let tx = block_tx(&sender, miner_free_account(), 5, 1, 6);
        let err = apply_transaction(&mut accounts, &header(), &tx).unwrap_err();
        assert!(matches!(err, ChainStateError::InsufficientFunds { .. }));

        assert_eq!(accounts[&from].balance, 9);
        assert_eq!(accounts[&from].nonce, 0);
        assert_eq!(accounts[&miner()].balance, 1);
    }

    #[test]
    fn a_nonce_gap_is_rejected() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let mut accounts = seeded(&[(from.clone(), 3, 1_000)]);

        let tx = block_tx(&sender, miner_free_account(), 5, 5, 0);
        let err = apply_transaction(&mut accounts, &header(), &tx).unwrap_err();
        assert!(matches!(
            err,
            ChainStateError::InvalidNonce { got: 5, want: 4 }
        ));
    }

    #[test]
    fn gas_fee_is_capped_at_the_remaining_balance() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let mut accounts = seeded(&[(from.clone(), 0, 0)]);

        let tx = block_tx(&sender, miner_free_account(), 0, 1, 0);
        let err = apply_transaction(&mut accounts, &header(), &tx).unwrap_err();
        assert!(matches!(err, ChainStateError::InsufficientFunds { .. }));
        assert_eq!(accounts[&from].balance, 0);
        assert_eq!(accounts[&miner()].balance, 0);
    }

    #[test]
    fn mining_reward_credits_the_beneficiary() {
        let mut accounts = Accounts::new();
        apply_mining_reward(&mut accounts, &header());
        assert_eq!(accounts[&miner()].balance, 700);
    }

    #[test]
    fn state_hash_ignores_map_ordering() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let other = miner_free_account();

        let state_a = ChainState::new(
            genesis(&[(from.clone(), 10), (other.clone(), 20)]),
            MemoryStore::new(),
        )
        .expect("state");
        let state_b = ChainState::new(
            genesis(&[(other, 20), (from, 10)]),
            MemoryStore::new(),
        )
        .expect("state");

        assert_eq!(state_a.hash_state(), state_b.hash_state());
        assert_ne!(state_a.hash_state(), ZERO_HASH);
    }

    #[test]
    fn accept_block_commits_accounts_tip_and_storage() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let state = ChainState::new(genesis(&[(from.clone(), 1_000)]), MemoryStore::new())
            .expect("state");

        let tx = block_tx(&sender, miner_free_account(), 100, 1, 10);
        let block = Block::new(header(), vec![tx]);
        state.accept_block(&block).expect("accept");

        assert_eq!(state.latest_block().header.number, 1);
        assert_eq!(state.query(&from).expect("query").balance, 889);
        assert_eq!(state.read_blocks(1, u64::MAX).expect("read").len(), 1);
    }

    #[test]
    fn accept_block_rejects_atomically_on_a_bad_transaction() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let state = ChainState::new(genesis(&[(from.clone(), 1_000)]), MemoryStore::new())
            .expect("state");
        let before = state.hash_state();

        let good = block_tx(&sender, miner_free_account(), 100, 1, 0);
        let gapped = block_tx(&sender, miner_free_account(), 100, 5, 0);
        let block = Block::new(header(), vec![good, gapped]);

        assert!(state.accept_block(&block).is_err());
        assert_eq!(state.hash_state(), before);
        assert_eq!(state.latest_block().header.number, 0);
        assert!(state.read_blocks(1, u64::MAX).expect("read").is_empty());
    }

    #[test]
    fn replay_rebuilds_accounts_from_storage() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let store = std::sync::Arc::new(MemoryStore::new());

        {
            let state = ChainState::new(
                genesis(&[(from.clone(), 1_000)]),
                std::sync::Arc::clone(&store),
            )
            .expect("state");
            let tx = block_tx(&sender, miner_free_account(), 100, 1, 10);
            state
                .accept_block(&Block::new(header(), vec![tx]))
                .expect("accept");
        }

        let replayed = ChainState::new(genesis(&[(from.clone(), 1_000)]), store).expect("replay");
        assert_eq!(replayed.latest_block().header.number, 1);
        assert_eq!(replayed.query(&from).expect("query").balance, 889);
        assert_eq!(replayed.query(&miner()).expect("query").balance, 711);
    }

    #[test]
    fn query_unknown_account_errors() {
        let state = ChainState::new(genesis(&[]), MemoryStore::new()).expect("state");
        assert!(matches!(
            state.query(&miner()),
            Err(ChainStateError::UnknownAccount)
        ));
    }

    #[test]
    fn accounts_returns_a_detached_copy() {
        let sender = key(0x42);
        let from = address_of(&sender);
        let state =
            ChainState::new(genesis(&[(from.clone(), 50)]), MemoryStore::new()).expect("state");

        let mut copy = state.accounts();
        copy.insert(miner(), Account::new(miner(), 9_999));
        assert!(state.query(&miner()).is_err());
        assert_eq!(state.accounts()[&from].balance, 50);
    }
}
