//! The node's core API: owns the account database, the mempool, and the
//! peer book, and coordinates mining against blocks arriving from peers.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use ledgerd_chainstate::{apply_transaction, ChainState, ChainStateError};
use ledgerd_consensus::{Consensus, Genesis, ONE_UNIT_OF_GAS, QUERY_LATEST};
use ledgerd_pow::mine::{mine_block, MineArgs, MineError};
use ledgerd_pow::observer::MiningObserver;
use ledgerd_pow::validation::{validate_block, BlockError};
use ledgerd_primitives::account::{Account, AccountId};
use ledgerd_primitives::block::{Block, BlockData};
use ledgerd_primitives::transaction::{BlockTx, SignedTx, TransactionError};
use ledgerd_storage::BlockStore;
use tracing::{debug, warn};

use crate::mempool::{Mempool, MempoolError, SelectStrategy};
use crate::net::{NetClient, NetError};
use crate::peer_book::{Peer, PeerBook, PeerStatus};
use crate::worker::WorkerHandle;

#[derive(Debug)]
pub enum StateError {
    NoTransactions,
    Transaction(TransactionError),
    Mempool(MempoolError),
    Block(BlockError),
    ChainState(ChainStateError),
    Mining(MineError),
    Net(NetError),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NoTransactions => write!(f, "no transactions in the mempool"),
            StateError::Transaction(err) => write!(f, "{err}"),
            StateError::Mempool(err) => write!(f, "{err}"),
            StateError::Block(err) => write!(f, "{err}"),
            StateError::ChainState(err) => write!(f, "{err}"),
            StateError::Mining(err) => write!(f, "{err}"),
            StateError::Net(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<TransactionError> for StateError {
    fn from(err: TransactionError) -> Self {
        StateError::Transaction(err)
    }
}

impl From<MempoolError> for StateError {
    fn from(err: MempoolError) -> Self {
        StateError::Mempool(err)
    }
}

impl From<BlockError> for StateError {
    fn from(err: BlockError) -> Self {
        StateError::Block(err)
    }
}

impl From<ChainStateError> for StateError {
    fn from(err: ChainStateError) -> Self {
        StateError::ChainState(err)
    }
}

impl From<MineError> for StateError {
    fn from(err: MineError) -> Self {
        StateError::Mining(err)
    }
}

impl From<NetError> for StateError {
    fn from(err: NetError) -> Self {
        StateError::Net(err)
    }
}

pub struct StateConfig<S: BlockStore> {
    pub beneficiary: AccountId,
    pub host: String,
    pub consensus: Consensus,
    pub select_strategy: SelectStrategy,
    pub known_peers: Vec<Peer>,
    pub db: ChainState<S>,
    pub net: NetClient,
    pub worker: WorkerHandle,
}

pub struct NodeState<S: BlockStore> {
    beneficiary: AccountId,
    host: String,
    consensus: Consensus,
    db: ChainState<S>,
    mempool: Mempool,
    peers: PeerBook,
    net: NetClient,
    worker: WorkerHandle,
    // Serializes the validate-and-apply critical section so the state root
    // a block was checked against cannot move before the block commits.
    commit: Mutex<()>,
}

impl<S: BlockStore> NodeState<S> {
    pub fn new(cfg: StateConfig<S>) -> Self {
        let chain_id = cfg.db.genesis().chain_id;
        let peers = PeerBook::new(cfg.known_peers);
        peers.add(Peer::new(cfg.host.clone()));

        NodeState {
            beneficiary: cfg.beneficiary,
            host: cfg.host,
            consensus: cfg.consensus,
            mempool: Mempool::new(chain_id, cfg.select_strategy),
            peers,
            net: cfg.net,
            worker: cfg.worker,
            db: cfg.db,
            commit: Mutex::new(()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn consensus(&self) -> Consensus {
        self.consensus
    }

    pub fn beneficiary(&self) -> &AccountId {
        &self.beneficiary
    }

    pub fn genesis(&self) -> &Genesis {
        self.db.genesis()
    }

    pub fn worker(&self) -> WorkerHandle {
        self.worker.clone()
    }

    pub fn latest_block(&self) -> Block {
        self.db.latest_block()
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    pub fn mempool(&self) -> Vec<BlockTx> {
        self.mempool.pick_all()
    }

    pub fn accounts(&self) -> std::collections::HashMap<AccountId, Account> {
        self.db.accounts()
    }

    pub fn query_account(&self, account_id: &AccountId) -> Result<Account, StateError> {
        Ok(self.db.query(account_id)?)
    }

    pub fn add_known_peer(&self, peer: Peer) -> bool {
        self.peers.add(peer)
    }

    pub fn remove_known_peer(&self, peer: &Peer) {
        self.peers.remove(peer);
    }

    /// Every known peer, this node included. The PoA leader election runs
    /// over this list.
    pub fn known_peers(&self) -> Vec<Peer> {
        self.peers.copy(None)
    }

    /// Every known peer except this node.
    pub fn known_external_peers(&self) -> Vec<Peer> {
        self.peers.copy(Some(&self.host))
    }

    /// What this node reports when a peer probes it.
    pub fn status(&self) -> PeerStatus {
        let latest_block = self.latest_block();
        PeerStatus {
            latest_block_hash: latest_block.hash(),
            latest_block_number: latest_block.header.number,
            known_peers: self.known_external_peers(),
        }
    }

    /// Blocks `[from, to]` from storage. Either bound may be the
    /// latest-block sentinel.
    pub fn query_blocks_by_number(&self, from: u64, to: u64) -> Result<Vec<BlockData>, StateError> {
        let latest = self.latest_block().header.number;
        let from = if from == QUERY_LATEST { latest } else { from };
        let to = if to == QUERY_LATEST { latest } else { to };
        Ok(self.db.read_blocks(from, to)?)
    }

    /// Admits a wallet transaction: checks the signature, stamps it with
    /// the genesis gas terms, and wakes the miner. The wallet is
    /// responsible for balance and nonce; fees are taken regardless once
    /// the transaction lands in a block.
    pub fn upsert_wallet_tx(&self, signed: SignedTx) -> Result<(), StateError> {
        signed.validate(self.genesis().chain_id)?;

        let tx = BlockTx::new(signed, self.genesis().gas_price, ONE_UNIT_OF_GAS);
        self.mempool.upsert(tx.clone())?;

        self.worker.signal_share_tx(tx);
        self.worker.signal_start_mining();
        Ok(())
    }

    /// Admits a transaction forwarded by another node.
    pub fn upsert_node_tx(&self, tx: BlockTx) -> Result<(), StateError> {
        tx.signed.validate(self.genesis().chain_id)?;
        self.mempool.upsert(tx)?;
        self.worker.signal_start_mining();
        Ok(())
    }

    /// Builds a candidate from the best mempool transactions and runs the
    /// proof-of-work search. On success the block is validated and applied
    /// locally; broadcasting is the caller's job.
    pub fn mine_new_block(
        &self,
        cancel: &AtomicBool,
        observer: &dyn MiningObserver,
    ) -> Result<Block, StateError> {
        if self.mempool.is_empty() {
            return Err(StateError::NoTransactions);
        }

        let genesis = self.genesis();
        let trans = self.mempool.pick_best(genesis.trans_per_block as usize);

        let block = mine_block(
            MineArgs {
                beneficiary: self.beneficiary.clone(),
                difficulty: genesis.difficulty,
                mining_reward: genesis.miner_reward,
                prev_block: self.db.latest_block(),
                state_root: self.db.hash_state(),
                trans,
            },
            cancel,
            observer,
        )?;

        if cancel.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(StateError::Mining(MineError::Cancelled));
        }

        if let Err(err) = self.accept_block(&block) {
            if matches!(err, StateError::ChainState(_)) {
                self.evict_unappliable(&block);
            }
            return Err(err);
        }
        Ok(block)
    }

    /// Validates and applies a block proposed by a peer. On success the
    /// local miner is told to abandon its candidate.
    pub fn process_proposed_block(&self, block: &Block) -> Result<(), StateError> {
        self.accept_block(block)?;
        self.worker.signal_cancel_mining();
        Ok(())
    }

    // The critical section: validate against the current tip and state
    // root, persist, commit, and clear the committed transactions from the
    // mempool. Nothing is persisted when any step fails.
    fn accept_block(&self, block: &Block) -> Result<(), StateError> {
        let _guard = self.commit.lock().unwrap_or_else(|err| err.into_inner());

        validate_block(
            block,
            &self.db.latest_block(),
            &self.db.hash_state(),
            self.genesis().chain_id,
        )?;
        self.db.accept_block(block)?;

        for tx in block.tree.values() {
            self.mempool.delete(&tx);
        }
        Ok(())
    }

    // A candidate built from the local mempool can still fail to apply
    // (nonce gaps, overdrafts). Dropping the offenders keeps the miner from
    // re-picking them forever; the wallet has to resubmit.
    fn evict_unappliable(&self, block: &Block) {
        let mut staged = self.db.accounts();
        for tx in block.tree.values() {
            if apply_transaction(&mut staged, &block.header, &tx).is_err() {
                warn!(tx = %tx, "dropping transaction that cannot apply");
                self.mempool.delete(&tx);
            }
        }
    }

    pub async fn request_peer_status(&self, peer: &Peer) -> Result<PeerStatus, StateError> {
        Ok(self.net.peer_status(peer).await?)
    }

    pub async fn request_peer_mempool(&self, peer: &Peer) -> Result<Vec<BlockTx>, StateError> {
        Ok(self.net.peer_mempool(peer).await?)
    }

    /// Pulls the blocks this node is missing from the peer and applies them
    /// in order.
    pub async fn request_peer_blocks(&self, peer: &Peer) -> Result<(), StateError> {
        let from = self.latest_block().header.number + 1;
        let blocks = self.net.peer_blocks(peer, from).await?;
        debug!(host = %peer.host, count = blocks.len(), "retrieved peer blocks");

        for data in blocks {
            let block = Block::from_data(data);
            self.process_proposed_block(&block)?;
        }
        Ok(())
    }

    /// Tells every external peer this node is on the network. Best effort:
    /// unreachable peers are the peer loop's problem.
    pub async fn send_node_available_to_peers(&self) {
        let announce = Peer::new(self.host.clone());
        for peer in self.known_external_peers() {
            if let Err(err) = self.net.send_peer(&peer, &announce).await {
                warn!(host = %peer.host, %err, "announce failed");
            }
        }
    }

    /// Shares a transaction with every external peer, best effort.
    pub async fn send_tx_to_peers(&self, tx: &BlockTx) {
        for peer in self.known_external_peers() {
            if let Err(err) = self.net.send_tx(&peer, tx).await {
                warn!(host = %peer.host, %err, "transaction share failed");
            }
        }
    }

    /// Proposes a freshly mined block to every external peer. Only called
    /// after the local validate-and-apply succeeded.
    pub async fn send_block_to_peers(&self, block: &Block) -> Result<(), StateError> {
        let data = block.to_data();
        for peer in self.known_external_peers() {
            self.net
                .send_block(&peer, &data)
                .await
                .map_err(|err| StateError::Net(NetError::Response(format!(
                    "{}: {err}",
                    peer.host
                ))))?;
        }
        Ok(())
    }
}
