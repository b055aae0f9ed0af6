//! The genesis record: immutable chain parameters plus initial balances.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum GenesisError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for GenesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenesisError::Io(err) => write!(f, "read genesis file: {err}"),
            GenesisError::Parse(err) => write!(f, "parse genesis file: {err}"),
        }
    }
}

impl std::error::Error for GenesisError {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genesis {
    pub date: DateTime<Utc>,
    pub chain_id: u16,
    pub trans_per_block: u16,
    pub difficulty: u16,
    pub miner_reward: u64,
    pub gas_price: u64,
    pub balances: HashMap<String, u64>,
}

impl Genesis {
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let contents = fs::read_to_string(path).map_err(GenesisError::Io)?;
        serde_json::from_str(&contents).map_err(GenesisError::Parse)
    }
}
