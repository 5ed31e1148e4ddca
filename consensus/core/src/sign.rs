//! secp256k1 ECDSA helpers for `PayToPubKey` outputs and authority header signatures.

use std::sync::OnceLock;

use secp256k1::{ecdsa::Signature, All, Message, Secp256k1};

pub use secp256k1::{PublicKey, SecretKey};

use crate::Hash;

/// Size of a compact (r || s) signature
pub const SIGNATURE_SIZE: usize = 64;

fn context() -> &'static Secp256k1<All> {
    static CONTEXT: OnceLock<Secp256k1<All>> = OnceLock::new();
    CONTEXT.get_or_init(Secp256k1::new)
}

/// Signs `hash` and returns the compact 64-byte signature
pub fn sign_hash(secret: &SecretKey, hash: &Hash) -> Result<Vec<u8>, secp256k1::Error> {
    let message = Message::from_slice(hash.as_bytes())?;
    Ok(context().sign_ecdsa(&message, secret).serialize_compact().to_vec())
}

/// Verifies a compact signature of `hash` made by the serialized `public_key`.
/// Malformed keys or signatures verify as false.
pub fn verify_signature(public_key: &[u8], hash: &Hash, signature: &[u8]) -> bool {
    let Ok(key) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_compact(signature) else {
        return false;
    };
    let Ok(message) = Message::from_slice(hash.as_bytes()) else {
        return false;
    };
    context().verify_ecdsa(&message, &signature, &key).is_ok()
}

/// Compressed public key of `secret`
pub fn public_key(secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(context(), secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let key = public_key(&secret).serialize();
        let hash = Hash::from_u64_word(42);
        let signature = sign_hash(&secret, &hash).unwrap();
        assert_eq!(signature.len(), SIGNATURE_SIZE);
        assert!(verify_signature(&key, &hash, &signature));
        assert!(!verify_signature(&key, &Hash::from_u64_word(43), &signature));
        assert!(!verify_signature(&[1, 2, 3], &hash, &signature));
    }
}
