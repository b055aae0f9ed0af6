//! Value-transfer transactions in their three lifecycle forms: unsigned,
//! signed by a wallet, and stamped for inclusion in a block.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use primitive_types::U256;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::hash::sha256;
use crate::merkle::MerkleHash;
use crate::signature::{self, SignatureError};

#[derive(Debug)]
pub enum TransactionError {
    InvalidChainId { got: u16, want: u16 },
    SameFromTo,
    Signature(SignatureError),
    FromMismatch,
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::InvalidChainId { got, want } => {
                write!(f, "invalid chain id: got {got}, expected {want}")
            }
            TransactionError::SameFromTo => write!(f, "from and to accounts are the same"),
            TransactionError::Signature(err) => write!(f, "invalid signature: {err}"),
            TransactionError::FromMismatch => {
                write!(f, "from account does not match the signature")
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<SignatureError> for TransactionError {
    fn from(err: SignatureError) -> Self {
        TransactionError::Signature(err)
    }
}

/// The unsigned transfer a wallet constructs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub chain_id: u16,
    pub from_id: AccountId,
    pub to_id: AccountId,
    pub value: u64,
    pub nonce: u64,
    pub tip: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Tx {
    pub fn new(
        chain_id: u16,
        from_id: AccountId,
        to_id: AccountId,
        value: u64,
        nonce: u64,
        tip: u64,
        data: Vec<u8>,
    ) -> Self {
        Tx {
            chain_id,
            from_id,
            to_id,
            value,
            nonce,
            tip,
            data,
        }
    }

    pub fn sign(self, private_key: &SecretKey) -> Result<SignedTx, SignatureError> {
        let (v, r, s) = signature::sign(&self, private_key)?;
        Ok(SignedTx {
            tx: self,
            v,
            r,
            s,
        })
    }
}

/// A transaction carrying its ECDSA signature in (v, r, s) form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    #[serde(flatten)]
    pub tx: Tx,
    #[serde(with = "u256_dec")]
    pub v: U256,
    #[serde(with = "u256_dec")]
    pub r: U256,
    #[serde(with = "u256_dec")]
    pub s: U256,
}

impl SignedTx {
    /// Verifies the signature conforms to the range rules, that the chain id
    /// matches, that from and to differ, and that the from account is the
    /// one that signed the transaction.
    pub fn validate(&self, chain_id: u16) -> Result<(), TransactionError> {
        if self.tx.chain_id != chain_id {
            return Err(TransactionError::InvalidChainId {
                got: self.tx.chain_id,
                want: chain_id,
            });
        }
        if self.tx.from_id == self.tx.to_id {
            return Err(TransactionError::SameFromTo);
        }

        signature::verify_signature(&self.v, &self.r, &self.s)?;

        let address = signature::from_address(&self.tx, &self.v, &self.r, &self.s)?;
        if address != self.tx.from_id {
            return Err(TransactionError::FromMismatch);
        }

        Ok(())
    }

    /// The signature in 0x-prefixed [R|S|V] form.
    pub fn signature_string(&self) -> String {
        signature::signature_string(&self.v, &self.r, &self.s)
    }
}

impl fmt::Display for SignedTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tx.from_id, self.tx.nonce)
    }
}

/// A transaction as recorded inside a block: the signed transfer plus the
/// admission timestamp and the gas terms it was accepted under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    #[serde(flatten)]
    pub signed: SignedTx,
    pub timestamp: u64,
    pub gas_price: u64,
    pub gas_units: u64,
}

impl BlockTx {
    pub fn new(signed: SignedTx, gas_price: u64, gas_units: u64) -> Self {
        BlockTx {
            signed,
            timestamp: now_millis(),
            gas_price,
            gas_units,
        }
    }

    pub fn from_id(&self) -> &AccountId {
        &self.signed.tx.from_id
    }

    pub fn to_id(&self) -> &AccountId {
        &self.signed.tx.to_id
    }

    pub fn nonce(&self) -> u64 {
        self.signed.tx.nonce
    }

    pub fn value(&self) -> u64 {
        self.signed.tx.value
    }

    pub fn tip(&self) -> u64 {
        self.signed.tx.tip
    }

    /// The fixed fee charged when this transaction is applied.
    pub fn gas_fee(&self) -> u64 {
        self.gas_price.saturating_mul(self.gas_units)
    }
}

impl fmt::Display for BlockTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signed)
    }
}

impl MerkleHash for BlockTx {
    fn merkle_hash(&self) -> [u8; 32] {
        match serde_json::to_vec(self) {
            Ok(data) => sha256(&data),
            Err(_) => [0u8; 32],
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

mod u256_dec {
    use primitive_types::U256;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = String::deserialize(deserializer)?;
        U256::from_dec_str(&value).map_err(DeError::custom)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(value) => STANDARD.decode(value.as_bytes()).map_err(DeError::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use primitive_types::U256;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    use super::{BlockTx, SignedTx, Tx};
    use crate::account::AccountId;

    const CHAIN_ID: u16 = 1;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).expect("secret key")
    }

    fn address_of(key: &SecretKey) -> AccountId {
        let secp = Secp256k1::new();
        AccountId::from_public_key(&PublicKey::from_secret_key(&secp, key))
    }

    fn other_account() -> AccountId {
        AccountId::parse("0x6fe6ccf0d379567c1a10e7eaa5e535b533db3bd9").expect("account")
    }

    fn signed_tx(key_byte: u8, nonce: u64) -> SignedTx {
        let key = key(key_byte);
        Tx::new(
            CHAIN_ID,
            address_of(&key),
            other_account(),
            100,
            nonce,
            0,
            Vec::new(),
        )
        .sign(&key)
        .expect("sign")
    }

    #[test]
    fn signed_tx_validates() {
        signed_tx(0x42, 0).validate(CHAIN_ID).expect("validate");
    }

    #[test]
    fn validate_rejects_wrong_chain_id() {
        assert!(signed_tx(0x42, 0).validate(CHAIN_ID + 1).is_err());
    }

    #[test]
    fn validate_rejects_self_transfer() {
        let key = key(0x42);
        let me = address_of(&key);
        let signed = Tx::new(CHAIN_ID, me.clone(), me, 5, 1, 0, Vec::new())
            .sign(&key)
            .expect("sign");
        assert!(signed.validate(CHAIN_ID).is_err());
    }

    #[test]
    fn validate_rejects_forged_from() {
        let mut signed = signed_tx(0x42, 0);
        signed.tx.from_id = other_account();
        assert!(signed.validate(CHAIN_ID).is_err());
    }

    #[test]
    fn wire_json_round_trips_with_decimal_components() {
        let signed = signed_tx(0x42, 7);
        let encoded = serde_json::to_string(&signed).expect("encode");

        // v/r/s travel as decimal strings, data as base64.
        let raw: serde_json::Value = serde_json::from_str(&encoded).expect("raw");
        assert!(raw["v"].is_string());
        assert!(raw["r"].is_string());
        assert!(raw["s"].is_string());
        assert_eq!(raw["data"], "");
        assert_eq!(raw["nonce"], 7);

        let decoded: SignedTx = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, signed);
        decoded.validate(CHAIN_ID).expect("validate decoded");
    }

    #[test]
    fn block_tx_stamps_gas_terms() {
        let tx = BlockTx::new(signed_tx(0x42, 1), 15, 1);
        assert_eq!(tx.gas_fee(), 15);
        assert!(tx.timestamp > 0);
        assert_eq!(tx.nonce(), 1);
    }

    #[test]
    fn data_decodes_from_null() {
        let signed = signed_tx(0x42, 1);
        let mut raw = serde_json::to_value(&signed).expect("value");
        raw["data"] = serde_json::Value::Null;
        let decoded: SignedTx = serde_json::from_value(raw).expect("decode");
        assert!(decoded.tx.data.is_empty());
    }

    #[test]
    fn signature_string_is_sixty_five_bytes_hex() {
        let signed = signed_tx(0x42, 1);
        let rendered = signed.signature_string();
        assert_eq!(rendered.len(), 2 + 130);
        assert!(U256::from(1u8) < signed.r);
    }
}
