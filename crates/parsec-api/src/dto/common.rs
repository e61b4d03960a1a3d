//! Wire substructures shared across multiple commands.

use std::collections::BTreeMap;

use parsec_types::{SequesterServiceId, Timestamp};
use serde::{Deserialize, Serialize};

/// A certificate as it travels on the wire: the raw encoded payload plus a
/// detached Ed25519 signature. Decoded via `parsec_certs::verify_and_load`
/// against the signing device's verify key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedCertificate {
    #[serde(with = "serde_bytes")]
    pub raw: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// `TIMESTAMP_OUT_OF_BALLPARK`'s payload: both timestamps and both
/// configured offsets, so the client can correct its clock (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallparkMismatch {
    pub client_timestamp: Timestamp,
    pub server_timestamp: Timestamp,
    pub ballpark_client_early_offset_seconds: i64,
    pub ballpark_client_late_offset_seconds: i64,
}

impl From<parsec_certs::CertificateError> for BallparkMismatch {
    fn from(err: parsec_certs::CertificateError) -> Self {
        match err {
            parsec_certs::CertificateError::TimestampOutOfBallpark {
                client_timestamp,
                server_timestamp,
                ballpark_client_early_offset,
                ballpark_client_late_offset,
            } => BallparkMismatch {
                client_timestamp,
                server_timestamp,
                ballpark_client_early_offset_seconds: ballpark_client_early_offset,
                ballpark_client_late_offset_seconds: ballpark_client_late_offset,
            },
            other => unreachable!("BallparkMismatch built from a non-ballpark error: {other}"),
        }
    }
}

pub type SequesterBlob = BTreeMap<SequesterServiceId, Vec<u8>>;
