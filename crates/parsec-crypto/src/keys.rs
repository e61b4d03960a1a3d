//! Ed25519 verify keys and raw signature checking.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// A device or organization root verify key, as stored by the datamodel.
///
/// Wire form is the raw 32-byte public key; wrapped so it can never be
/// confused with an arbitrary byte string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_bytes::ByteBuf", into = "serde_bytes::ByteBuf")]
pub struct VerifyKey(VerifyingKey);

impl VerifyKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> CryptoResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Verify a 64-byte raw Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature_bytes: &[u8]) -> CryptoResult<()> {
        if signature_bytes.len() != 64 {
            return Err(CryptoError::MalformedPayload);
        }
        let mut sig_arr = [0u8; 64];
        sig_arr.copy_from_slice(signature_bytes);
        let signature = Signature::from_bytes(&sig_arr);
        self.0
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl TryFrom<serde_bytes::ByteBuf> for VerifyKey {
    type Error = CryptoError;
    fn try_from(buf: serde_bytes::ByteBuf) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = buf
            .into_vec()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyFormat("expected 32 bytes".into()))?;
        Self::from_bytes(&bytes)
    }
}

impl From<VerifyKey> for serde_bytes::ByteBuf {
    fn from(key: VerifyKey) -> Self {
        serde_bytes::ByteBuf::from(key.to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SigningKeyPair;

    #[test]
    fn verify_accepts_matching_signature() {
        let pair = SigningKeyPair::generate();
        let msg = b"hello parsec";
        let sig = pair.sign(msg);
        assert!(pair.verify_key().verify(msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"hello parsec");
        assert!(pair.verify_key().verify(b"hello world", &sig).is_err());
    }

    #[test]
    fn verify_key_serde_round_trips() {
        let pair = SigningKeyPair::generate();
        let key = pair.verify_key();
        let json = serde_json::to_string(&key).unwrap();
        let back: VerifyKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
