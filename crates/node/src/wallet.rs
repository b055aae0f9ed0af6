//! Key-file loading and the `send` command that signs and submits a
//! transaction to a node's public API.

use std::fmt;
use std::path::{Path, PathBuf};

use ledgerd_primitives::account::AccountId;
use ledgerd_primitives::hash::hex_decode;
use ledgerd_primitives::transaction::Tx;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

const DEFAULT_NODE_URL: &str = "http://localhost:8080";
const DEFAULT_ACCOUNTS_FOLDER: &str = "zblock/accounts";
const DEFAULT_CHAIN_ID: u16 = 1;

#[derive(Debug)]
pub enum KeyError {
    Io(std::io::Error),
    NotHex,
    InvalidKey(secp256k1::Error),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Io(err) => write!(f, "{err}"),
            KeyError::NotHex => write!(f, "key file is not 32 bytes of hex"),
            KeyError::InvalidKey(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Loads a raw-hex ECDSA private key file.
pub fn load_private_key(path: &Path) -> Result<SecretKey, KeyError> {
    let contents = std::fs::read_to_string(path).map_err(KeyError::Io)?;
    let bytes = hex_decode(contents.trim()).ok_or(KeyError::NotHex)?;
    if bytes.len() != 32 {
        return Err(KeyError::NotHex);
    }
    SecretKey::from_slice(&bytes).map_err(KeyError::InvalidKey)
}

struct SendArgs {
    url: String,
    from: String,
    accounts_folder: String,
    chain_id: u16,
    to: String,
    value: u64,
    nonce: u64,
    tip: u64,
    data: Vec<u8>,
}

fn send_usage() -> String {
    [
        "usage: ledgerd send [flags]",
        "  --from <name|path>    key name under the accounts folder, or a key file path (required)",
        "  --to <account>        recipient account id (required)",
        "  --nonce <n>           next nonce for the sending account (required)",
        "  --value <n>           units to transfer (default 0)",
        "  --tip <n>             units to tip the miner (default 0)",
        "  --data <hex>          payload bytes as hex (default empty)",
        "  --url <url>           node public API (default http://localhost:8080)",
        "  --accounts <folder>   accounts folder (default zblock/accounts)",
        "  --chain-id <n>        chain id (default 1)",
    ]
    .join("\n")
}

fn parse_send_args(args: &[String]) -> Result<SendArgs, String> {
    let mut url = DEFAULT_NODE_URL.to_string();
    let mut accounts_folder = DEFAULT_ACCOUNTS_FOLDER.to_string();
    let mut chain_id = DEFAULT_CHAIN_ID;
    let mut from = None;
    let mut to = None;
    let mut nonce = None;
    let mut value = 0u64;
    let mut tip = 0u64;
    let mut data = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut take = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("missing value for {flag}\n{}", send_usage()))
        };
        match arg.as_str() {
            "--url" => url = take("--url")?,
            "--accounts" => accounts_folder = take("--accounts")?,
            "--from" => from = Some(take("--from")?),
            "--to" => to = Some(take("--to")?),
            "--chain-id" => {
                chain_id = take("--chain-id")?
                    .parse()
                    .map_err(|_| "invalid --chain-id".to_string())?;
            }
            "--nonce" => {
                nonce = Some(
                    take("--nonce")?
                        .parse()
                        .map_err(|_| "invalid --nonce".to_string())?,
                );
            }
            "--value" => {
                value = take("--value")?
                    .parse()
                    .map_err(|_| "invalid --value".to_string())?;
            }
            "--tip" => {
                tip = take("--tip")?
                    .parse()
                    .map_err(|_| "invalid --tip".to_string())?;
            }
            "--data" => {
                let raw = take("--data")?;
                data = hex_decode(&raw).ok_or_else(|| "invalid --data hex".to_string())?;
            }
            "--help" | "-h" => return Err(send_usage()),
            other => return Err(format!("unknown flag {other:?}\n{}", send_usage())),
        }
    }

    Ok(SendArgs {
        url,
        accounts_folder,
        chain_id,
        from: from.ok_or_else(|| format!("missing --from\n{}", send_usage()))?,
        to: to.ok_or_else(|| format!("missing --to\n{}", send_usage()))?,
        nonce: nonce.ok_or_else(|| format!("missing --nonce\n{}", send_usage()))?,
        value,
        tip,
        data,
    })
}

fn key_path(args: &SendArgs) -> PathBuf {
    let direct = PathBuf::from(&args.from);
    if direct.extension().is_some() || direct.exists() {
        return direct;
    }
    PathBuf::from(&args.accounts_folder).join(format!("{}.ecdsa", args.from))
}

/// Signs and posts a transaction built from the command line.
pub async fn run_send(args: &[String]) -> Result<(), String> {
    let args = parse_send_args(args)?;

    let private_key = load_private_key(&key_path(&args)).map_err(|err| err.to_string())?;
    let secp = Secp256k1::new();
    let from_id = AccountId::from_public_key(&PublicKey::from_secret_key(&secp, &private_key));
    let to_id = AccountId::parse(&args.to).map_err(|err| format!("invalid --to: {err}"))?;

    let signed = Tx::new(
        args.chain_id,
        from_id,
        to_id,
        args.value,
        args.nonce,
        args.tip,
        args.data,
    )
    .sign(&private_key)
    .map_err(|err| err.to_string())?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/tx/submit", args.url))
        .json(&signed)
        .send()
        .await
        .map_err(|err| err.to_string())?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(format!("node rejected the transaction: {status}: {body}"));
    }
    println!("{body}");
    Ok(())
}
