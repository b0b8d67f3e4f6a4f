//! Conventional signature scheme wrapping Ed25519.
//!
//! Authorization tokens are signed with rotating epoch keys under this
//! scheme. Keys serialize as raw bytes; verification is infallible and
//! reports bad signatures as `false`.

use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use std::fmt;

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SECRET_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("ed25519: expected {expected} key bytes, received {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("ed25519: malformed key material")]
    Malformed,
}

/// An Ed25519 keypair. The secret half never leaves this struct except
/// through [`Keys::secret_key_bytes`].
pub struct Keys {
    keypair: Keypair,
}

impl Keys {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from raw secret key bytes.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, KeyError> {
        if secret.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidLength {
                expected: SECRET_KEY_LENGTH,
                actual: secret.len(),
            });
        }
        let secret = SecretKey::from_bytes(secret).map_err(|_| KeyError::Malformed)?;
        let public = PublicKey::from(&secret);
        Ok(Self {
            keypair: Keypair { secret, public },
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.keypair.public.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.keypair.secret.to_bytes()
    }

    /// Detached signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.keypair.sign(msg).to_bytes()
    }
}

impl Clone for Keys {
    fn clone(&self) -> Self {
        // SecretKey is deliberately non-Clone upstream; round-trip through
        // bytes, which cannot fail for a key we already hold.
        Self::from_secret_bytes(self.keypair.secret.as_bytes())
            .expect("reconstructing a held ed25519 key")
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keys({})", hex::encode(self.public_key_bytes()))
    }
}

pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, KeyError> {
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(KeyError::InvalidLength {
            expected: PUBLIC_KEY_LENGTH,
            actual: bytes.len(),
        });
    }
    PublicKey::from_bytes(bytes).map_err(|_| KeyError::Malformed)
}

/// Verify a detached signature. Malformed or mismatched signatures return
/// `false`; this never errors.
pub fn verify(public: &PublicKey, msg: &[u8], signature: &[u8]) -> bool {
    let signature = match Signature::try_from(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    public.verify(msg, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let keys = Keys::generate();
        let msg = b"this is a message!";
        let signature = keys.sign(msg);
        assert!(verify(keys.public_key(), msg, &signature));
    }

    #[test]
    fn verify_rejects_any_single_bit_flip() {
        let keys = Keys::generate();
        let msg = b"\x4d\x48\xac\xe0\x88\xe9\x07\x16".to_vec();
        let signature = keys.sign(&msg);

        let mut bad_msg = msg.clone();
        bad_msg[0] ^= 0x01;
        assert!(!verify(keys.public_key(), &bad_msg, &signature));

        let mut bad_sig = signature;
        bad_sig[17] ^= 0x80;
        assert!(!verify(keys.public_key(), &msg, &bad_sig));

        let other = Keys::generate();
        assert!(!verify(other.public_key(), &msg, &signature));
    }

    #[test]
    fn cross_product_of_keys_and_messages() {
        // Only the signing (key, msg) pair verifies; every other
        // combination fails.
        let keys = [Keys::generate(), Keys::generate()];
        let msgs: [&[u8]; 2] = [b"first payload", b"second payload"];
        let signatures: Vec<Vec<[u8; SIGNATURE_LENGTH]>> = keys
            .iter()
            .map(|k| msgs.iter().map(|m| k.sign(m)).collect())
            .collect();

        for (ki, keypair) in keys.iter().enumerate() {
            for (mi, msg) in msgs.iter().enumerate() {
                for (si, signed_key) in signatures.iter().enumerate() {
                    for (sj, signature) in signed_key.iter().enumerate() {
                        let expected = ki == si && mi == sj;
                        assert_eq!(
                            verify(keypair.public_key(), msg, signature),
                            expected,
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn secret_bytes_roundtrip() {
        let keys = Keys::generate();
        let rebuilt = Keys::from_secret_bytes(&keys.secret_key_bytes()).unwrap();
        assert_eq!(keys.public_key_bytes(), rebuilt.public_key_bytes());

        let msg = b"stable across reconstruction";
        assert!(verify(rebuilt.public_key(), msg, &keys.sign(msg)));
    }

    #[test]
    fn rejects_wrong_length_keys() {
        assert!(matches!(
            public_key_from_bytes(&[0u8; 31]),
            Err(KeyError::InvalidLength { .. })
        ));
        assert!(Keys::from_secret_bytes(&[0u8; 64]).is_err());
    }
}
