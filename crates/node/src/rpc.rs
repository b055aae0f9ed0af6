//! Hand-rolled HTTP/1.1 servers for the wallet-facing (public) and
//! node-to-node (private) APIs. Bodies are UTF-8 JSON; responses close the
//! connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ledgerd_consensus::QUERY_LATEST;
use ledgerd_primitives::account::{Account, AccountId};
use ledgerd_primitives::block::{Block, BlockData};
use ledgerd_primitives::transaction::{BlockTx, SignedTx};
use ledgerd_storage::BlockStore;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::nameservice::NameService;
use crate::peer_book::Peer;
use crate::state::NodeState;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Per-request limits: `read` bounds the request parse, `read + write`
/// bounds the whole exchange.
#[derive(Clone, Copy)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    fn deadline(&self) -> Duration {
        self.read + self.write
    }
}

struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Wallet-facing endpoints: genesis, accounts, uncommitted transactions,
/// and transaction submission.
pub async fn serve_public<S: BlockStore + 'static>(
    host: String,
    state: Arc<NodeState<S>>,
    nameservice: Arc<NameService>,
    timeouts: Timeouts,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&host)
        .await
        .map_err(|err| format!("public api bind {host}: {err}"))?;
    info!(%host, "public api started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("public api stopped");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|err| format!("public api accept: {err}"))?;
                let state = Arc::clone(&state);
                let nameservice = Arc::clone(&nameservice);
                tokio::spawn(async move {
                    let served = tokio::time::timeout(
                        timeouts.deadline(),
                        handle_public(stream, state, nameservice, timeouts.read),
                    )
                    .await;
                    match served {
                        Ok(Err(err)) => error!(%err, "public api request failed"),
                        Err(_) => error!("public api request deadline exceeded"),
                        Ok(Ok(())) => {}
                    }
                });
            }
        }
    }
}

/// Node-to-node endpoints: status, mempool, block ranges, peer announce,
/// transaction forwarding, and block proposals.
pub async fn serve_private<S: BlockStore + 'static>(
    host: String,
    state: Arc<NodeState<S>>,
    timeouts: Timeouts,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&host)
        .await
        .map_err(|err| format!("private api bind {host}: {err}"))?;
    info!(%host, "private api started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("private api stopped");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|err| format!("private api accept: {err}"))?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let served = tokio::time::timeout(
                        timeouts.deadline(),
                        handle_private(stream, state, timeouts.read),
                    )
                    .await;
                    match served {
                        Ok(Err(err)) => error!(%err, "private api request failed"),
                        Err(_) => error!("private api request deadline exceeded"),
                        Ok(Ok(())) => {}
                    }
                });
            }
        }
    }
}

async fn handle_public<S: BlockStore>(
    mut stream: TcpStream,
    state: Arc<NodeState<S>>,
    nameservice: Arc<NameService>,
    read_timeout: Duration,
) -> Result<(), String> {
    let request = read_request(&mut stream, read_timeout).await?;
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["v1", "genesis", "list"]) => {
            respond_json(&mut stream, "200 OK", state.genesis()).await
        }
        ("GET", ["v1", "accounts", "list"]) => {
            respond_json(&mut stream, "200 OK", &state.accounts()).await
        }
        ("GET", ["v1", "accounts", "list", account]) => {
            let account_id = match AccountId::parse(account) {
                Ok(account_id) => account_id,
                Err(err) => return respond_error(&mut stream, "400 Bad Request", &err.to_string()).await,
            };
            match state.query_account(&account_id) {
                Ok(account) => {
                    let single: HashMap<AccountId, Account> =
                        HashMap::from([(account_id, account)]);
                    respond_json(&mut stream, "200 OK", &single).await
                }
                Err(err) => respond_error(&mut stream, "400 Bad Request", &err.to_string()).await,
            }
        }
        ("GET", ["v1", "tx", "uncommitted", "list"]) => {
            let views = tx_views(&state.mempool(), None, &nameservice);
            respond_json(&mut stream, "200 OK", &views).await
        }
        ("GET", ["v1", "tx", "uncommitted", "list", account]) => {
            let views = tx_views(&state.mempool(), Some(*account), &nameservice);
            respond_json(&mut stream, "200 OK", &views).await
        }
        ("POST", ["v1", "tx", "submit"]) => {
            let signed: SignedTx = match serde_json::from_slice(&request.body) {
                Ok(signed) => signed,
                Err(err) => {
                    return respond_error(
                        &mut stream,
                        "400 Bad Request",
                        &format!("unable to decode payload: {err}"),
                    )
                    .await
                }
            };
            debug!(tx = %signed, "wallet transaction received");
            match state.upsert_wallet_tx(signed) {
                Ok(()) => {
                    let resp = json!({"status": "transaction added to mempool"});
                    respond_json(&mut stream, "200 OK", &resp).await
                }
                Err(err) => respond_error(&mut stream, "400 Bad Request", &err.to_string()).await,
            }
        }
        _ => respond_error(&mut stream, "404 Not Found", "not found").await,
    }
}

async fn handle_private<S: BlockStore>(
    mut stream: TcpStream,
    state: Arc<NodeState<S>>,
    read_timeout: Duration,
) -> Result<(), String> {
    let request = read_request(&mut stream, read_timeout).await?;
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["v1", "node", "status"]) => {
            respond_json(&mut stream, "200 OK", &state.status()).await
        }
        ("GET", ["v1", "node", "tx", "list"]) => {
            respond_json(&mut stream, "200 OK", &state.mempool()).await
        }
        ("GET", ["v1", "node", "block", "list", from, to]) => {
            let (from, to) = match (parse_block_number(from), parse_block_number(to)) {
                (Ok(from), Ok(to)) => (from, to),
                (Err(err), _) | (_, Err(err)) => {
                    return respond_error(&mut stream, "400 Bad Request", &err).await
                }
            };
            if from > to {
                return respond_error(&mut stream, "400 Bad Request", "from greater than to").await;
            }
            match state.query_blocks_by_number(from, to) {
                Ok(blocks) if blocks.is_empty() => respond_empty(&mut stream).await,
                Ok(blocks) => respond_json(&mut stream, "200 OK", &blocks).await,
                Err(err) => {
                    respond_error(&mut stream, "500 Internal Server Error", &err.to_string()).await
                }
            }
        }
        ("POST", ["v1", "node", "peers"]) => {
            let peer: Peer = match serde_json::from_slice(&request.body) {
                Ok(peer) => peer,
                Err(err) => {
                    return respond_error(
                        &mut stream,
                        "400 Bad Request",
                        &format!("unable to decode payload: {err}"),
                    )
                    .await
                }
            };
            if state.add_known_peer(peer.clone()) {
                info!(host = %peer.host, "adding peer");
            }
            respond_json(&mut stream, "200 OK", &serde_json::Value::Null).await
        }
        ("POST", ["v1", "node", "tx", "submit"]) => {
            let tx: BlockTx = match serde_json::from_slice(&request.body) {
                Ok(tx) => tx,
                Err(err) => {
                    return respond_error(
                        &mut stream,
                        "400 Bad Request",
                        &format!("unable to decode payload: {err}"),
                    )
                    .await
                }
            };
            debug!(%tx, "node transaction received");
            match state.upsert_node_tx(tx) {
                Ok(()) => {
                    let resp = json!({"status": "transactions added to mempool"});
                    respond_json(&mut stream, "200 OK", &resp).await
                }
                Err(err) => respond_error(&mut stream, "400 Bad Request", &err.to_string()).await,
            }
        }
        ("POST", ["v1", "node", "block", "propose"]) => {
            let data: BlockData = match serde_json::from_slice(&request.body) {
                Ok(data) => data,
                Err(err) => {
                    return respond_error(
                        &mut stream,
                        "400 Bad Request",
                        &format!("unable to decode payload: {err}"),
                    )
                    .await
                }
            };
            let block = Block::from_data(data);
            match state.process_proposed_block(&block) {
                Ok(()) => {
                    info!(hash = %block.hash(), number = block.header.number, "block accepted");
                    let resp = json!({"status": "block accepted"});
                    respond_json(&mut stream, "200 OK", &resp).await
                }
                Err(err) => {
                    info!(%err, "proposed block rejected");
                    respond_error(&mut stream, "406 Not Acceptable", "block not accepted").await
                }
            }
        }
        _ => respond_error(&mut stream, "404 Not Found", "not found").await,
    }
}

/// The wallet view of an uncommitted transaction, with resolved account
/// names and the signature folded into one string.
#[derive(Serialize)]
struct TxView {
    from: AccountId,
    from_name: String,
    to: AccountId,
    to_name: String,
    chain_id: u16,
    nonce: u64,
    value: u64,
    tip: u64,
    data: String,
    timestamp: u64,
    gas_price: u64,
    gas_units: u64,
    sig: String,
}

fn tx_views(mempool: &[BlockTx], account: Option<&str>, nameservice: &NameService) -> Vec<TxView> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    mempool
        .iter()
        .filter(|tx| match account {
            Some(account) => {
                tx.from_id().as_str() == account || tx.to_id().as_str() == account
            }
            None => true,
        })
        .map(|tx| TxView {
            from: tx.from_id().clone(),
            from_name: nameservice.lookup(tx.from_id()),
            to: tx.to_id().clone(),
            to_name: nameservice.lookup(tx.to_id()),
            chain_id: tx.signed.tx.chain_id,
            nonce: tx.nonce(),
            value: tx.value(),
            tip: tx.tip(),
            data: STANDARD.encode(&tx.signed.tx.data),
            timestamp: tx.timestamp,
            gas_price: tx.gas_price,
            gas_units: tx.gas_units,
            sig: tx.signed.signature_string(),
        })
        .collect()
}

fn parse_block_number(raw: &str) -> Result<u64, String> {
    if raw == "latest" || raw.is_empty() {
        return Ok(QUERY_LATEST);
    }
    raw.parse::<u64>()
        .map_err(|_| format!("invalid block number {raw:?}"))
}

async fn read_request(
    stream: &mut TcpStream,
    read_timeout: Duration,
) -> Result<HttpRequest, String> {
    match tokio::time::timeout(read_timeout, read_http_request(stream)).await {
        Ok(result) => result,
        Err(_) => Err("request read timed out".to_string()),
    }
}

async fn read_http_request(stream: &mut TcpStream) -> Result<HttpRequest, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut header_end = None;
    while buffer.len() < MAX_REQUEST_BYTES {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = find_header_end(&buffer) {
            header_end = Some(pos);
            break;
        }
    }

    let header_end = header_end.ok_or_else(|| "invalid http request".to_string())?;
    let header_bytes = &buffer[..header_end];
    let mut lines = header_bytes.split(|byte| *byte == b'\n');
    let request_line = lines
        .next()
        .ok_or_else(|| "invalid http request".to_string())?;
    let request_line = String::from_utf8_lossy(request_line);
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let raw_path = parts.next().unwrap_or("/");
    let path = raw_path
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(raw_path)
        .to_string();

    let mut content_length = None;
    for line in lines {
        let line = String::from_utf8_lossy(line).trim().to_string();
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }

    let mut body = buffer[header_end..].to_vec();
    let content_length = content_length.unwrap_or(body.len());
    if content_length > MAX_REQUEST_BYTES {
        return Err("request too large".to_string());
    }
    while body.len() < content_length {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, path, body })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

async fn respond_json<T: Serialize + ?Sized>(
    stream: &mut TcpStream,
    status: &str,
    value: &T,
) -> Result<(), String> {
    let body = serde_json::to_string(value).map_err(|err| format!("encode response: {err}"))?;
    write_response(stream, status, "application/json", &body).await
}

async fn respond_error(stream: &mut TcpStream, status: &str, message: &str) -> Result<(), String> {
    let body = serde_json::to_string(&json!({ "error": message }))
        .map_err(|err| format!("encode response: {err}"))?;
    write_response(stream, status, "application/json", &body).await
}

async fn respond_empty(stream: &mut TcpStream) -> Result<(), String> {
    write_response(stream, "204 No Content", "application/json", "").await
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), String> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::{find_header_end, parse_block_number};
    use ledgerd_consensus::QUERY_LATEST;

    #[test]
    fn block_numbers_parse_with_latest_sentinel() {
        assert_eq!(parse_block_number("latest").expect("latest"), QUERY_LATEST);
        assert_eq!(parse_block_number("").expect("empty"), QUERY_LATEST);
        assert_eq!(parse_block_number("42").expect("number"), 42);
        assert!(parse_block_number("abc").is_err());
    }

    #[test]
    fn header_end_detection() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
