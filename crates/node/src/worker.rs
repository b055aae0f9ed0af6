//! Background loops: mining (PoW or PoA), peer upkeep, and transaction
//! sharing, all wired to one shutdown watch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ledgerd_consensus::Consensus;
use ledgerd_pow::mine::MineError;
use ledgerd_pow::observer::MiningObserver;
use ledgerd_primitives::transaction::BlockTx;
use ledgerd_storage::BlockStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::peer_book::Peer;
use crate::state::{NodeState, StateError};

/// Share requests queued beyond this are dropped, best effort.
const MAX_TX_SHARE_REQUESTS: usize = 100;

const PEER_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// PoA nodes mine on ticks aligned to this cycle so every node evaluates
/// the same election at roughly the same time.
const POA_CYCLE: Duration = Duration::from_secs(5);

/// The signalling surface the state holds. Channel-backed, so the worker
/// owns its receivers and no back-pointer between the two is needed.
#[derive(Clone)]
pub struct WorkerHandle {
    start_mining: mpsc::Sender<()>,
    cancel_mining: mpsc::Sender<()>,
    tx_share: mpsc::Sender<BlockTx>,
    shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Requests a mining run. A signal already pending means one will start
    /// anyway, so this never blocks.
    pub fn signal_start_mining(&self) {
        let _ = self.start_mining.try_send(());
    }

    /// Tells the active mining run to abandon its candidate.
    pub fn signal_cancel_mining(&self) {
        let _ = self.cancel_mining.try_send(());
    }

    pub fn signal_share_tx(&self, tx: BlockTx) {
        if self.tx_share.try_send(tx).is_err() {
            warn!("tx share queue full, transaction will not be shared");
        }
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The receiver halves, consumed by [`start`].
pub struct WorkerChannels {
    start_mining: mpsc::Receiver<()>,
    cancel_mining: mpsc::Receiver<()>,
    tx_share: mpsc::Receiver<BlockTx>,
    shutdown: watch::Receiver<bool>,
}

pub fn channels() -> (WorkerHandle, WorkerChannels) {
    let (start_tx, start_rx) = mpsc::channel(1);
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    let (share_tx, share_rx) = mpsc::channel(MAX_TX_SHARE_REQUESTS);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    (
        WorkerHandle {
            start_mining: start_tx,
            cancel_mining: cancel_tx,
            tx_share: share_tx,
            shutdown: shutdown_tx,
        },
        WorkerChannels {
            start_mining: start_rx,
            cancel_mining: cancel_rx,
            tx_share: share_rx,
            shutdown: shutdown_rx,
        },
    )
}

pub struct Worker {
    handle: WorkerHandle,
    tasks: JoinSet<()>,
}

/// Catches the node up against its peers, then spawns the background
/// loops. Exactly one mining loop runs, picked by the consensus mode.
pub async fn start<S: BlockStore + 'static>(
    state: Arc<NodeState<S>>,
    channels: WorkerChannels,
) -> Worker {
    sync(&state).await;

    let handle = state.worker();
    let mut tasks = JoinSet::new();

    match state.consensus() {
        Consensus::Pow => {
            tasks.spawn(pow_operations(
                Arc::clone(&state),
                channels.start_mining,
                channels.cancel_mining,
                channels.shutdown.clone(),
            ));
        }
        Consensus::Poa => {
            tasks.spawn(poa_operations(
                Arc::clone(&state),
                channels.cancel_mining,
                channels.shutdown.clone(),
            ));
        }
    }
    tasks.spawn(peer_operations(
        Arc::clone(&state),
        channels.shutdown.clone(),
    ));
    tasks.spawn(share_tx_operations(
        state,
        channels.tx_share,
        channels.shutdown,
    ));

    Worker { handle, tasks }
}

impl Worker {
    /// Stops every loop: cancels any active mining run, flips the shutdown
    /// watch, and drains the task set within the given window.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("worker shutdown started");
        self.handle.signal_cancel_mining();
        self.handle.signal_shutdown();

        let drained = tokio::time::timeout(timeout, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("worker tasks did not stop before the shutdown timeout");
            self.tasks.abort_all();
        }
        info!("worker shutdown complete");
    }
}

/// One pass of the startup catch-up: adopt peers, pull their mempools, and
/// replay the blocks this node is missing, then announce availability.
async fn sync<S: BlockStore>(state: &Arc<NodeState<S>>) {
    info!("sync with known peers started");

    for peer in state.known_external_peers() {
        let status = match state.request_peer_status(&peer).await {
            Ok(status) => status,
            Err(err) => {
                warn!(host = %peer.host, %err, "peer status failed during sync");
                continue;
            }
        };
        info!(
            host = %peer.host,
            latest_block_number = status.latest_block_number,
            "peer status"
        );
        add_new_peers(state, status.known_peers);

        match state.request_peer_mempool(&peer).await {
            Ok(txs) => {
                for tx in txs {
                    if let Err(err) = state.upsert_node_tx(tx) {
                        debug!(%err, "skipping peer mempool transaction");
                    }
                }
            }
            Err(err) => warn!(host = %peer.host, %err, "peer mempool failed during sync"),
        }

        if let Err(err) = state.request_peer_blocks(&peer).await {
            warn!(host = %peer.host, %err, "peer block sync failed");
        }
    }

    state.send_node_available_to_peers().await;
    info!("sync with known peers complete");
}

// Mining loop, PoW mode: wait for a start signal, mine, and re-signal when
// transactions remain in the pool.
async fn pow_operations<S: BlockStore + 'static>(
    state: Arc<NodeState<S>>,
    mut start_rx: mpsc::Receiver<()>,
    mut cancel_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("pow operations started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("pow operations stopped");
                    return;
                }
            }
            signal = start_rx.recv() => {
                if signal.is_none() {
                    return;
                }
                run_mining_cycle(&state, &mut cancel_rx).await;
                if state.mempool_len() > 0 {
                    state.worker().signal_start_mining();
                }
            }
        }
    }
}

// Mining loop, PoA mode: on every aligned tick, run the leader election
// and mine only when this node wins.
async fn poa_operations<S: BlockStore + 'static>(
    state: Arc<NodeState<S>>,
    mut cancel_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("poa operations started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("poa operations stopped");
                    return;
                }
            }
            _ = tokio::time::sleep(delay_to_next_cycle(POA_CYCLE)) => {
                let Some(leader) = selection(&state) else {
                    continue;
                };
                debug!(%leader, "poa selection");
                if leader != state.host() {
                    continue;
                }
                if state.mempool_len() == 0 {
                    debug!("poa leader with no transactions to mine");
                    continue;
                }
                run_mining_cycle(&state, &mut cancel_rx).await;
            }
        }
    }
}

// One mining run: drain stale cancel signals, mine on a blocking thread
// with a shared token, and race the result against a cancel request. The
// block is broadcast only after the local apply succeeded inside
// mine_new_block.
async fn run_mining_cycle<S: BlockStore + 'static>(
    state: &Arc<NodeState<S>>,
    cancel_rx: &mut mpsc::Receiver<()>,
) {
    if state.mempool_len() == 0 {
        debug!("no transactions to mine");
        return;
    }

    while cancel_rx.try_recv().is_ok() {}

    let cancel = Arc::new(AtomicBool::new(false));
    let miner_state = Arc::clone(state);
    let token = Arc::clone(&cancel);
    let started = Instant::now();
    let mut mining = tokio::task::spawn_blocking(move || {
        miner_state.mine_new_block(&token, &MiningEvents)
    });

    let result = tokio::select! {
        _ = cancel_rx.recv() => {
            cancel.store(true, Ordering::Relaxed);
            (&mut mining).await
        }
        result = &mut mining => result,
    };
    debug!(elapsed = ?started.elapsed(), "mining cycle finished");

    match result {
        Ok(Ok(block)) => {
            info!(
                hash = %block.hash(),
                number = block.header.number,
                "block mined and applied"
            );
            if let Err(err) = state.send_block_to_peers(&block).await {
                warn!(%err, "block broadcast failed");
            }
        }
        Ok(Err(StateError::NoTransactions)) => debug!("no transactions to mine"),
        Ok(Err(StateError::Mining(MineError::Cancelled))) => {
            info!("mining cancelled");
        }
        Ok(Err(err)) => warn!(%err, "mining failed"),
        Err(err) => error!(%err, "mining task panicked"),
    }
}

// Peer loop: probe every known peer, drop the unreachable, adopt the
// newly discovered, and re-announce this node.
async fn peer_operations<S: BlockStore + 'static>(
    state: Arc<NodeState<S>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("peer operations started");
    let mut ticker = tokio::time::interval(PEER_UPDATE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("peer operations stopped");
                    return;
                }
            }
            _ = ticker.tick() => run_peer_update(&state).await,
        }
    }
}

async fn run_peer_update<S: BlockStore>(state: &Arc<NodeState<S>>) {
    for peer in state.known_external_peers() {
        match state.request_peer_status(&peer).await {
            Ok(status) => add_new_peers(state, status.known_peers),
            Err(err) => {
                info!(host = %peer.host, %err, "peer unreachable, removing");
                state.remove_known_peer(&peer);
            }
        }
    }
    state.send_node_available_to_peers().await;
}

fn add_new_peers<S: BlockStore>(state: &Arc<NodeState<S>>, peers: Vec<Peer>) {
    for peer in peers {
        if peer.matches(state.host()) {
            continue;
        }
        if state.add_known_peer(peer.clone()) {
            info!(host = %peer.host, "adding peer");
        }
    }
}

// Tx-share loop: every queued transaction goes out to all external peers.
async fn share_tx_operations<S: BlockStore + 'static>(
    state: Arc<NodeState<S>>,
    mut tx_rx: mpsc::Receiver<BlockTx>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("share tx operations started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("share tx operations stopped");
                    return;
                }
            }
            maybe_tx = tx_rx.recv() => {
                match maybe_tx {
                    Some(tx) => state.send_tx_to_peers(&tx).await,
                    None => return,
                }
            }
        }
    }
}

/// Deterministic PoA leader election: the sorted host list indexed by the
/// FNV-1a hash of the latest block hash, so every node that agrees on the
/// tip agrees on the leader.
fn selection<S: BlockStore>(state: &Arc<NodeState<S>>) -> Option<String> {
    let mut hosts: Vec<String> = state
        .known_peers()
        .into_iter()
        .map(|peer| peer.host)
        .collect();
    if hosts.is_empty() {
        return None;
    }
    hosts.sort();

    let digest = fnv32a(state.latest_block().hash().as_bytes());
    let index = digest as usize % hosts.len();
    hosts.get(index).cloned()
}

fn fnv32a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn delay_to_next_cycle(cycle: Duration) -> Duration {
    let cycle_ms = cycle.as_millis() as u64;
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);
    Duration::from_millis(cycle_ms - now_ms % cycle_ms)
}

// Mining progress formatted for the node's log stream.
struct MiningEvents;

impl MiningObserver for MiningEvents {
    fn mining_started(&self, tx_count: usize) {
        info!(tx_count, "mining started");
    }

    fn mining_progress(&self, attempts: u64) {
        info!(attempts, "mining running");
    }

    fn mining_solved(&self, hash: &str, attempts: u64) {
        info!(hash, attempts, "mining solved");
    }

    fn mining_cancelled(&self) {
        info!("mining run cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::{delay_to_next_cycle, fnv32a, POA_CYCLE};

    #[test]
    fn fnv32a_matches_reference_values() {
        // Published FNV-1a test vectors.
        assert_eq!(fnv32a(b""), 0x811c_9dc5);
        assert_eq!(fnv32a(b"a"), 0xe40c_292c);
        assert_eq!(fnv32a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn leader_index_is_stable_for_a_given_tip() {
        let hosts = ["a:9080", "b:9080", "c:9080"];
        let digest = fnv32a(b"0xabc");
        let index = digest as usize % hosts.len();
        assert_eq!(index, digest as usize % hosts.len());
        assert!(index < hosts.len());
    }

    #[test]
    fn cycle_delay_stays_within_one_cycle() {
        let delay = delay_to_next_cycle(POA_CYCLE);
        assert!(delay <= POA_CYCLE);
        assert!(delay > std::time::Duration::ZERO);
    }
}
