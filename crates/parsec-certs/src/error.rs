//! Certificate validation errors (spec.md §4.3, §7).

use parsec_types::Timestamp;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CertificateError {
    #[error("invalid certificate")]
    InvalidCertificate,

    #[error("author mismatch")]
    AuthorMismatch,

    #[error(
        "timestamp out of ballpark: client={client_timestamp}, server={server_timestamp}, \
         ballpark_client_early_offset={ballpark_client_early_offset}, \
         ballpark_client_late_offset={ballpark_client_late_offset}"
    )]
    TimestampOutOfBallpark {
        client_timestamp: Timestamp,
        server_timestamp: Timestamp,
        ballpark_client_early_offset: i64,
        ballpark_client_late_offset: i64,
    },

    #[error("timestamp must be strictly greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
}

pub type CertResult<T> = Result<T, CertificateError>;
