//! Name lookups for accounts whose key files live in the accounts folder.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use ledgerd_primitives::account::AccountId;
use secp256k1::{PublicKey, Secp256k1};

use crate::wallet::{load_private_key, KeyError};

#[derive(Debug)]
pub enum NameServiceError {
    Io(std::io::Error),
    Key(String, KeyError),
}

impl fmt::Display for NameServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameServiceError::Io(err) => write!(f, "read accounts folder: {err}"),
            NameServiceError::Key(name, err) => write!(f, "load key {name}: {err}"),
        }
    }
}

impl std::error::Error for NameServiceError {}

/// Maps account ids to the stem of the `.ecdsa` key file they came from.
pub struct NameService {
    accounts: HashMap<AccountId, String>,
}

impl NameService {
    pub fn new(folder: &Path) -> Result<Self, NameServiceError> {
        let secp = Secp256k1::new();
        let mut accounts = HashMap::new();

        for entry in std::fs::read_dir(folder).map_err(NameServiceError::Io)? {
            let entry = entry.map_err(NameServiceError::Io)?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("ecdsa") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let private_key = load_private_key(&path)
                .map_err(|err| NameServiceError::Key(name.to_string(), err))?;
            let account_id =
                AccountId::from_public_key(&PublicKey::from_secret_key(&secp, &private_key));
            accounts.insert(account_id, name.to_string());
        }

        Ok(NameService { accounts })
    }

    /// The name for the account, or the id itself when unknown.
    pub fn lookup(&self, account_id: &AccountId) -> String {
        self.accounts
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| account_id.to_string())
    }

    pub fn copy(&self) -> HashMap<AccountId, String> {
        self.accounts.clone()
    }
}
