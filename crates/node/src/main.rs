//! The ledgerd node: an account-balance blockchain that mines signed
//! value-transfer transactions into proof-of-work blocks and keeps in step
//! with its peers over HTTP-JSON.

mod mempool;
mod nameservice;
mod net;
mod peer_book;
mod rpc;
mod state;
mod wallet;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ledgerd_chainstate::ChainState;
use ledgerd_consensus::{Consensus, Genesis};
use ledgerd_primitives::account::AccountId;
use ledgerd_storage::disk::DiskStore;
use ledgerd_storage::memory::MemoryStore;
use ledgerd_storage::BlockStore;
use secp256k1::{PublicKey, Secp256k1};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::mempool::SelectStrategy;
use crate::nameservice::NameService;
use crate::net::NetClient;
use crate::peer_book::Peer;
use crate::state::{NodeState, StateConfig};

const BLOCKS_FILE_NAME: &str = "blocks.json";

#[derive(Clone, Debug)]
struct Config {
    public_host: String,
    private_host: String,
    read_timeout: Duration,
    write_timeout: Duration,
    shutdown_timeout: Duration,
    beneficiary: String,
    select_strategy: String,
    consensus: String,
    origin_peers: Vec<String>,
    nameservice_folder: String,
    genesis_path: String,
    data_dir: Option<PathBuf>,
}

fn usage() -> String {
    [
        "usage: ledgerd [flags]",
        "       ledgerd send [flags]   (sign and submit a transaction)",
        "",
        "flags (each also reads the environment variable in brackets):",
        "  --public-host <ip:port>      wallet API bind address          [NODE_WEB_PUBLIC_HOST, default 0.0.0.0:8080]",
        "  --private-host <ip:port>     node-to-node bind address        [NODE_WEB_PRIVATE_HOST, default 0.0.0.0:9080]",
        "  --read-timeout <secs>        request read timeout             [NODE_WEB_READ_TIMEOUT, default 5]",
        "  --write-timeout <secs>       response write timeout           [NODE_WEB_WRITE_TIMEOUT, default 10]",
        "  --shutdown-timeout <secs>    worker drain timeout             [NODE_WEB_SHUTDOWN_TIMEOUT, default 20]",
        "  --beneficiary <name>         key name credited with rewards   [NODE_STATE_BENEFICIARY, default miner1]",
        "  --select-strategy <name>     mempool selection strategy       [NODE_STATE_SELECT_STRATEGY, default Tip]",
        "  --consensus <POW|POA>        mining discipline                [NODE_STATE_CONSENSUS, default POW]",
        "  --origin-peers <hosts>       comma-separated origin nodes     [NODE_STATE_ORIGIN_PEERS, default 0.0.0.0:9080]",
        "  --accounts <folder>          ECDSA key folder                 [NODE_NAMESERVICE_FOLDER, default zblock/accounts/]",
        "  --genesis <path>             genesis file                     [NODE_STATE_GENESIS, default zblock/genesis.json]",
        "  --data-dir <folder>          block log folder, empty = memory [NODE_STATE_DATA_DIR, default empty]",
    ]
    .join("\n")
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_config(args: &[String]) -> Result<Config, String> {
    let mut public_host = env_or("NODE_WEB_PUBLIC_HOST", "0.0.0.0:8080");
    let mut private_host = env_or("NODE_WEB_PRIVATE_HOST", "0.0.0.0:9080");
    let mut read_timeout = env_or("NODE_WEB_READ_TIMEOUT", "5");
    let mut write_timeout = env_or("NODE_WEB_WRITE_TIMEOUT", "10");
    let mut shutdown_timeout = env_or("NODE_WEB_SHUTDOWN_TIMEOUT", "20");
    let mut beneficiary = env_or("NODE_STATE_BENEFICIARY", "miner1");
    let mut select_strategy = env_or("NODE_STATE_SELECT_STRATEGY", "Tip");
    let mut consensus = env_or("NODE_STATE_CONSENSUS", "POW");
    let mut origin_peers = env_or("NODE_STATE_ORIGIN_PEERS", "0.0.0.0:9080");
    let mut nameservice_folder = env_or("NODE_NAMESERVICE_FOLDER", "zblock/accounts/");
    let mut genesis_path = env_or("NODE_STATE_GENESIS", "zblock/genesis.json");
    let mut data_dir = env_or("NODE_STATE_DATA_DIR", "");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut take = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))
        };
        match arg.as_str() {
            "--public-host" => public_host = take("--public-host")?,
            "--private-host" => private_host = take("--private-host")?,
            "--read-timeout" => read_timeout = take("--read-timeout")?,
            "--write-timeout" => write_timeout = take("--write-timeout")?,
            "--shutdown-timeout" => shutdown_timeout = take("--shutdown-timeout")?,
            "--beneficiary" => beneficiary = take("--beneficiary")?,
            "--select-strategy" => select_strategy = take("--select-strategy")?,
            "--consensus" => consensus = take("--consensus")?,
            "--origin-peers" => origin_peers = take("--origin-peers")?,
            "--accounts" => nameservice_folder = take("--accounts")?,
            "--genesis" => genesis_path = take("--genesis")?,
            "--data-dir" => data_dir = take("--data-dir")?,
            "--help" | "-h" => return Err(usage()),
            other => return Err(format!("unknown flag {other:?}\n{}", usage())),
        }
    }

    let parse_secs = |raw: &str, flag: &str| {
        raw.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("invalid seconds value for {flag}: {raw:?}"))
    };

    Ok(Config {
        public_host,
        private_host,
        read_timeout: parse_secs(&read_timeout, "--read-timeout")?,
        write_timeout: parse_secs(&write_timeout, "--write-timeout")?,
        shutdown_timeout: parse_secs(&shutdown_timeout, "--shutdown-timeout")?,
        beneficiary,
        select_strategy,
        consensus,
        origin_peers: origin_peers
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect(),
        nameservice_folder,
        genesis_path,
        data_dir: if data_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(data_dir))
        },
    })
}

fn banner() {
    println!(
        r"
 _          _                     _
| | ___  __| | __ _  ___ _ __ __| |
| |/ _ \/ _` |/ _` |/ _ \ '__/ _` |
| |  __/ (_| | (_| |  __/ | | (_| |
|_|\___|\__,_|\__, |\___|_|  \__,_|
              |___/
"
    );
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("send") {
        if let Err(err) = wallet::run_send(&args[1..]).await {
            eprintln!("{err}");
            std::process::exit(1);
        }
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match parse_config(&args) {
        Ok(cfg) => cfg,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(cfg).await {
        error!(%err, "startup failed");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<(), String> {
    banner();
    info!(?cfg, "starting node");

    let genesis =
        Genesis::load(Path::new(&cfg.genesis_path)).map_err(|err| err.to_string())?;

    let ns = NameService::new(Path::new(&cfg.nameservice_folder)).map_err(|err| err.to_string())?;
    for (account, name) in ns.copy() {
        info!(%account, %name, "nameservice account");
    }

    // The beneficiary key both names the miner and receives fees and tips.
    let key_path =
        Path::new(&cfg.nameservice_folder).join(format!("{}.ecdsa", cfg.beneficiary));
    let private_key = wallet::load_private_key(&key_path)
        .map_err(|err| format!("load beneficiary key {}: {err}", key_path.display()))?;
    let secp = Secp256k1::new();
    let beneficiary = AccountId::from_public_key(&PublicKey::from_secret_key(&secp, &private_key));
    info!(%beneficiary, name = %cfg.beneficiary, "beneficiary");

    let storage: Arc<dyn BlockStore> = match &cfg.data_dir {
        Some(dir) => {
            let path = dir.join(BLOCKS_FILE_NAME);
            info!(path = %path.display(), "using disk block storage");
            Arc::new(DiskStore::open(&path).map_err(|err| err.to_string())?)
        }
        None => {
            info!("using in-memory block storage");
            Arc::new(MemoryStore::new())
        }
    };

    let db = ChainState::new(genesis, storage).map_err(|err| err.to_string())?;
    for account in db.accounts().values() {
        info!(account = %account.account_id, balance = account.balance, "account loaded");
    }
    info!(
        latest_block = db.latest_block().header.number,
        "chain state ready"
    );

    let select_strategy: SelectStrategy = cfg.select_strategy.parse()?;
    let consensus: Consensus = cfg.consensus.parse()?;
    let (handle, channels) = worker::channels();

    let state = Arc::new(NodeState::new(StateConfig {
        beneficiary,
        host: cfg.private_host.clone(),
        consensus,
        select_strategy,
        known_peers: cfg
            .origin_peers
            .iter()
            .map(|host| Peer::new(host.as_str()))
            .collect(),
        db,
        net: NetClient::new().map_err(|err| err.to_string())?,
        worker: handle.clone(),
    }));

    let worker = worker::start(Arc::clone(&state), channels).await;

    let timeouts = rpc::Timeouts {
        read: cfg.read_timeout,
        write: cfg.write_timeout,
    };
    let mut public_api = tokio::spawn(rpc::serve_public(
        cfg.public_host.clone(),
        Arc::clone(&state),
        Arc::new(ns),
        timeouts,
        handle.subscribe_shutdown(),
    ));
    let mut private_api = tokio::spawn(rpc::serve_private(
        cfg.private_host.clone(),
        Arc::clone(&state),
        timeouts,
        handle.subscribe_shutdown(),
    ));

    info!(consensus = %consensus, "node is running");

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
        result = &mut public_api => flatten_server("public api", result),
        result = &mut private_api => flatten_server("private api", result),
    };

    worker.shutdown(cfg.shutdown_timeout).await;
    public_api.abort();
    private_api.abort();

    outcome
}

fn flatten_server(
    name: &str,
    result: Result<Result<(), String>, tokio::task::JoinError>,
) -> Result<(), String> {
    match result {
        Ok(Ok(())) => Err(format!("{name} stopped unexpectedly")),
        Ok(Err(err)) => Err(format!("{name}: {err}")),
        Err(err) => Err(format!("{name} panicked: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_config;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_cover_a_runnable_origin_node() {
        let cfg = parse_config(&[]).expect("parse");
        assert_eq!(cfg.public_host, "0.0.0.0:8080");
        assert_eq!(cfg.private_host, "0.0.0.0:9080");
        assert_eq!(cfg.beneficiary, "miner1");
        assert_eq!(cfg.consensus, "POW");
        assert_eq!(cfg.origin_peers, vec!["0.0.0.0:9080".to_string()]);
        assert!(cfg.data_dir.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = parse_config(&args(&[
            "--private-host",
            "0.0.0.0:9081",
            "--beneficiary",
            "miner2",
            "--origin-peers",
            "a:9080, b:9080",
            "--data-dir",
            "zblock/miner2",
        ]))
        .expect("parse");

        assert_eq!(cfg.private_host, "0.0.0.0:9081");
        assert_eq!(cfg.beneficiary, "miner2");
        assert_eq!(
            cfg.origin_peers,
            vec!["a:9080".to_string(), "b:9080".to_string()]
        );
        assert_eq!(cfg.data_dir.as_deref().and_then(|d| d.to_str()), Some("zblock/miner2"));
    }

    #[test]
    fn unknown_flags_and_bad_values_error() {
        assert!(parse_config(&args(&["--bogus"])).is_err());
        assert!(parse_config(&args(&["--read-timeout", "abc"])).is_err());
    }
}
