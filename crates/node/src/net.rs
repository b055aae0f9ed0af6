//! HTTP-JSON client for the node-to-node endpoints.

use std::fmt;
use std::time::Duration;

use ledgerd_primitives::block::BlockData;
use ledgerd_primitives::transaction::BlockTx;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::peer_book::{Peer, PeerStatus};

/// A peer that does not answer within this window counts as down for the
/// current sweep.
const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum NetError {
    Transport(reqwest::Error),
    Response(String),
    EmptyBody,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Transport(err) => write!(f, "{err}"),
            NetError::Response(message) => write!(f, "{message}"),
            NetError::EmptyBody => write!(f, "peer answered with an empty body"),
        }
    }
}

impl std::error::Error for NetError {}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        NetError::Transport(err)
    }
}

/// Typed calls against `http://<host>/v1/node/...`.
pub struct NetClient {
    http: reqwest::Client,
}

impl NetClient {
    pub fn new() -> Result<Self, NetError> {
        let http = reqwest::Client::builder()
            .timeout(PEER_REQUEST_TIMEOUT)
            .build()?;
        Ok(NetClient { http })
    }

    pub async fn peer_status(&self, peer: &Peer) -> Result<PeerStatus, NetError> {
        let response = self
            .http
            .get(format!("{}/status", base_url(peer)))
            .send()
            .await?;
        decode(response).await?.ok_or(NetError::EmptyBody)
    }

    pub async fn peer_mempool(&self, peer: &Peer) -> Result<Vec<BlockTx>, NetError> {
        let response = self
            .http
            .get(format!("{}/tx/list", base_url(peer)))
            .send()
            .await?;
        Ok(decode(response).await?.unwrap_or_default())
    }

    /// Blocks `[from, latest]` held by the peer.
    pub async fn peer_blocks(&self, peer: &Peer, from: u64) -> Result<Vec<BlockData>, NetError> {
        let response = self
            .http
            .get(format!("{}/block/list/{from}/latest", base_url(peer)))
            .send()
            .await?;
        Ok(decode(response).await?.unwrap_or_default())
    }

    pub async fn send_peer(&self, peer: &Peer, announce: &Peer) -> Result<(), NetError> {
        let response = self
            .http
            .post(format!("{}/peers", base_url(peer)))
            .json(announce)
            .send()
            .await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn send_tx(&self, peer: &Peer, tx: &BlockTx) -> Result<(), NetError> {
        let response = self
            .http
            .post(format!("{}/tx/submit", base_url(peer)))
            .json(tx)
            .send()
            .await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn send_block(&self, peer: &Peer, block: &BlockData) -> Result<(), NetError> {
        let response = self
            .http
            .post(format!("{}/block/propose", base_url(peer)))
            .json(block)
            .send()
            .await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }
}

fn base_url(peer: &Peer) -> String {
    format!("http://{}/v1/node", peer.host)
}

// 204 means success with nothing to decode, 200 carries a JSON body, and
// anything else is an error whose body is the message.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<Option<T>, NetError> {
    match response.status() {
        StatusCode::NO_CONTENT => Ok(None),
        StatusCode::OK => Ok(Some(response.json().await?)),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(NetError::Response(message))
        }
    }
}
