//! Test-only signing support.
//!
//! The production server never signs anything; this module exists purely so
//! that `parsec-certs`, `parsec-realm`, `parsec-vlob` and `parsec-invite`
//! test suites can produce certificates a real client would have produced.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::keys::VerifyKey;

pub struct SigningKeyPair(SigningKey);

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(SigningKey::from_bytes(&seed))
    }

    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey::from_bytes(&self.0.verifying_key().to_bytes())
            .expect("verifying key bytes are always valid")
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.0.sign(message).to_bytes().to_vec()
    }
}
