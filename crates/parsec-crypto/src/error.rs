//! Cryptographic errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("malformed signed payload")]
    MalformedPayload,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
