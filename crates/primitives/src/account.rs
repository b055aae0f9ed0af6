use std::fmt;

use secp256k1::PublicKey;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hash::{hex_encode, keccak256};

const ADDRESS_LENGTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountError {
    InvalidFormat,
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountError::InvalidFormat => write!(f, "invalid account id format"),
        }
    }
}

impl std::error::Error for AccountError {}

/// A 20-byte address derived from the last 20 bytes of the Keccak-256 hash
/// of the signer's public key, rendered as lowercase hex with a 0x prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(value: &str) -> Result<Self, AccountError> {
        let hex = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        if hex.len() != ADDRESS_LENGTH * 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AccountError::InvalidFormat);
        }
        Ok(AccountId(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn from_public_key(key: &PublicKey) -> Self {
        let uncompressed = key.serialize_uncompressed();
        // Skip the 0x04 tag byte, hash the raw 64-byte point.
        let digest = keccak256(&uncompressed[1..]);
        AccountId(format!(
            "0x{}",
            hex_encode(&digest[digest.len() - ADDRESS_LENGTH..])
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        AccountId::parse(&value).map_err(DeError::custom)
    }
}

/// Per-account ledger entry. Unknown accounts materialize with a zero nonce
/// and balance on first reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub nonce: u64,
    pub balance: u64,
}

impl Account {
    pub fn new(account_id: AccountId, balance: u64) -> Self {
        Account {
            account_id,
            nonce: 0,
            balance,
        }
    }
}

/// Orders accounts by id so state hashing sees a stable sequence.
pub fn sort_accounts(accounts: &mut [Account]) {
    accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
}

#[cfg(test)]
mod tests {
    use super::{sort_accounts, Account, AccountId};

    #[test]
    fn parse_normalizes_case_and_prefix() {
        let id = AccountId::parse("0xF01813E4B85e178A83e29B8E7bF26BD830a25f32").expect("parse");
        assert_eq!(id.as_str(), "0xf01813e4b85e178a83e29b8e7bf26bd830a25f32");

        let bare = AccountId::parse("F01813E4B85e178A83e29B8E7bF26BD830a25f32").expect("parse");
        assert_eq!(bare, id);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(AccountId::parse("0x1234").is_err());
        assert!(AccountId::parse("0xzz1813e4b85e178a83e29b8e7bf26bd830a25f32").is_err());
        assert!(AccountId::parse("").is_err());
    }

    #[test]
    fn json_form_is_the_plain_string() {
        let id = AccountId::parse("0xf01813e4b85e178a83e29b8e7bf26bd830a25f32").expect("parse");
        let encoded = serde_json::to_string(&id).expect("encode");
        assert_eq!(encoded, "\"0xf01813e4b85e178a83e29b8e7bf26bd830a25f32\"");
        let decoded: AccountId = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, id);
    }

    #[test]
    fn accounts_sort_by_id() {
        let a = AccountId::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").expect("parse");
        let b = AccountId::parse("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").expect("parse");
        let mut accounts = vec![Account::new(b.clone(), 1), Account::new(a.clone(), 2)];
        sort_accounts(&mut accounts);
        assert_eq!(accounts[0].account_id, a);
        assert_eq!(accounts[1].account_id, b);
    }
}
