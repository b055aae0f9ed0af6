//! Low-level signing support: domain-separated hashing, ECDSA sign and
//! recover over secp256k1, and the (v, r, s) component encoding.

use std::fmt;

use primitive_types::U256;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::Serialize;

use crate::account::AccountId;
use crate::hash::{hex_encode, keccak256, sha256};

/// The hash value reserved for block zero and empty trees.
pub const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Arbitrary offset added to the recovery id so v is recognizably ours,
/// similar to Ethereum and Bitcoin.
pub const QID: u64 = 29;

const SIGNATURE_LENGTH: usize = 65;

#[derive(Debug)]
pub enum SignatureError {
    Serialize(serde_json::Error),
    InvalidRecoveryId,
    InvalidSignatureValues,
    VerifyFailed,
    Recover(secp256k1::Error),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::Serialize(err) => write!(f, "serialize for signing: {err}"),
            SignatureError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            SignatureError::InvalidSignatureValues => write!(f, "invalid signature values"),
            SignatureError::VerifyFailed => write!(f, "signature verification failed"),
            SignatureError::Recover(err) => write!(f, "public key recovery: {err}"),
        }
    }
}

impl std::error::Error for SignatureError {}

impl From<secp256k1::Error> for SignatureError {
    fn from(err: secp256k1::Error) -> Self {
        SignatureError::Recover(err)
    }
}

/// Returns a unique hash for any serializable value: canonical JSON bytes,
/// SHA-256, 0x-prefixed hex. Falls back to [`ZERO_HASH`] when the value
/// cannot be serialized.
pub fn hash<T: Serialize>(value: &T) -> String {
    match serde_json::to_vec(value) {
        Ok(data) => format!("0x{}", hex_encode(&sha256(&data))),
        Err(_) => ZERO_HASH.to_string(),
    }
}

// The stamp marks the digest as belonging to this chain's signing scheme.
// Both the signing and the recovery path must apply it, otherwise
// signatures could be replayed across protocols.
fn stamp<T: Serialize>(value: &T) -> Result<[u8; 32], SignatureError> {
    let data = serde_json::to_vec(value).map_err(SignatureError::Serialize)?;
    let mut stamped = format!("\x19Q Signed Message:\n{}", data.len()).into_bytes();
    stamped.extend_from_slice(&data);
    Ok(keccak256(&stamped))
}

/// Signs the value with the private key and returns the (v, r, s) signature
/// components, where v carries the recovery id offset by [`QID`].
pub fn sign<T: Serialize>(
    value: &T,
    private_key: &SecretKey,
) -> Result<(U256, U256, U256), SignatureError> {
    let digest = stamp(value)?;
    let secp = Secp256k1::new();
    let message = Message::from_digest(digest);

    let signature = secp.sign_ecdsa_recoverable(&message, private_key);
    let (recovery_id, bytes) = signature.serialize_compact();

    // Round-trip check against the recovered public key before handing the
    // signature out.
    let recovered = secp.recover_ecdsa(&message, &signature)?;
    if recovered != PublicKey::from_secret_key(&secp, private_key) {
        return Err(SignatureError::VerifyFailed);
    }

    let r = U256::from_big_endian(&bytes[..32]);
    let s = U256::from_big_endian(&bytes[32..]);
    let v = U256::from(recovery_id.to_i32() as u64 + QID);
    Ok((v, r, s))
}

/// Checks the signature components conform to the expected ranges: the
/// recovery id must be 0 or 1 after removing [`QID`], and r and s must lie
/// inside the curve group order. Low-s normalization is not required.
pub fn verify_signature(v: &U256, r: &U256, s: &U256) -> Result<(), SignatureError> {
    let qid = U256::from(QID);
    if *v < qid || *v > qid + U256::one() {
        return Err(SignatureError::InvalidRecoveryId);
    }

    let order = U256::from_big_endian(&secp256k1::constants::CURVE_ORDER);
    if r.is_zero() || s.is_zero() || *r >= order || *s >= order {
        return Err(SignatureError::InvalidSignatureValues);
    }

    Ok(())
}

/// Extracts the account that signed the value from the (v, r, s) components.
pub fn from_address<T: Serialize>(
    value: &T,
    v: &U256,
    r: &U256,
    s: &U256,
) -> Result<AccountId, SignatureError> {
    let digest = stamp(value)?;
    let bytes = to_signature_bytes(v, r, s);

    let recovery_id =
        RecoveryId::from_i32(bytes[64] as i32).map_err(|_| SignatureError::InvalidRecoveryId)?;
    let signature = RecoverableSignature::from_compact(&bytes[..64], recovery_id)?;

    let secp = Secp256k1::new();
    let public_key = secp.recover_ecdsa(&Message::from_digest(digest), &signature)?;
    Ok(AccountId::from_public_key(&public_key))
}

/// Converts the components into the 65-byte [R|S|V] form with the raw
/// recovery id in the final byte.
pub fn to_signature_bytes(v: &U256, r: &U256, s: &U256) -> [u8; SIGNATURE_LENGTH] {
    let mut bytes = [0u8; SIGNATURE_LENGTH];
    r.to_big_endian(&mut bytes[..32]);
    s.to_big_endian(&mut bytes[32..64]);
    bytes[64] = v.low_u64().wrapping_sub(QID) as u8;
    bytes
}

/// Converts the components into the 65-byte [R|S|V] form keeping the QID
/// offset in the final byte.
pub fn to_signature_bytes_with_qid(v: &U256, r: &U256, s: &U256) -> [u8; SIGNATURE_LENGTH] {
    let mut bytes = to_signature_bytes(v, r, s);
    bytes[64] = v.low_u64() as u8;
    bytes
}

/// Renders the signature as a 0x-prefixed hex string in [R|S|V] order.
pub fn signature_string(v: &U256, r: &U256, s: &U256) -> String {
    format!("0x{}", hex_encode(&to_signature_bytes_with_qid(v, r, s)))
}

#[cfg(test)]
mod tests {
    use primitive_types::U256;
    use secp256k1::SecretKey;
    use serde::Serialize;

    use super::{
        from_address, hash, sign, signature_string, to_signature_bytes, verify_signature, QID,
        ZERO_HASH,
    };
    use crate::account::AccountId;

    #[derive(Serialize)]
    struct Payload {
        message: String,
        amount: u64,
    }

    fn test_key() -> SecretKey {
        SecretKey::from_slice(&[0x42u8; 32]).expect("secret key")
    }

    fn payload() -> Payload {
        Payload {
            message: "transfer".to_string(),
            amount: 100,
        }
    }

    #[test]
    fn hash_is_stable_and_prefixed() {
        let first = hash(&payload());
        let second = hash(&payload());
        assert_eq!(first, second);
        assert_eq!(first.len(), 66);
        assert!(first.starts_with("0x"));
        assert_ne!(first, ZERO_HASH);
    }

    #[test]
    fn sign_then_recover_yields_signer_address() {
        let key = test_key();
        let (v, r, s) = sign(&payload(), &key).expect("sign");
        verify_signature(&v, &r, &s).expect("verify");

        let secp = secp256k1::Secp256k1::new();
        let expected = AccountId::from_public_key(&secp256k1::PublicKey::from_secret_key(
            &secp, &key,
        ));
        let recovered = from_address(&payload(), &v, &r, &s).expect("recover");
        assert_eq!(recovered, expected);
    }

    #[test]
    fn recovery_fails_for_tampered_payload() {
        let key = test_key();
        let (v, r, s) = sign(&payload(), &key).expect("sign");

        let tampered = Payload {
            message: "transfer".to_string(),
            amount: 101,
        };
        let secp = secp256k1::Secp256k1::new();
        let signer = AccountId::from_public_key(&secp256k1::PublicKey::from_secret_key(
            &secp, &key,
        ));
        // Recovery still produces an address, just not the signer's.
        let recovered = from_address(&tampered, &v, &r, &s).expect("recover");
        assert_ne!(recovered, signer);
    }

    #[test]
    fn verify_signature_checks_ranges() {
        let (v, r, s) = sign(&payload(), &test_key()).expect("sign");

        assert!(verify_signature(&U256::from(QID + 2), &r, &s).is_err());
        assert!(verify_signature(&U256::from(QID - 1), &r, &s).is_err());
        assert!(verify_signature(&v, &U256::zero(), &s).is_err());
        assert!(verify_signature(&v, &r, &U256::MAX).is_err());
    }

    #[test]
    fn signature_bytes_round_trip_components() {
        let (v, r, s) = sign(&payload(), &test_key()).expect("sign");
        let bytes = to_signature_bytes(&v, &r, &s);

        let r2 = U256::from_big_endian(&bytes[..32]);
        let s2 = U256::from_big_endian(&bytes[32..64]);
        let v2 = U256::from(bytes[64] as u64 + QID);
        assert_eq!((v2, r2, s2), (v, r, s));
    }

    #[test]
    fn signature_string_keeps_qid_in_final_byte() {
        let (v, r, s) = sign(&payload(), &test_key()).expect("sign");
        let rendered = signature_string(&v, &r, &s);
        assert_eq!(rendered.len(), 2 + 65 * 2);
        let last_byte = u8::from_str_radix(&rendered[rendered.len() - 2..], 16).expect("hex");
        assert_eq!(last_byte as u64, v.low_u64());
    }
}
