//! Vlob & block engine errors (spec.md §4.5, §4.8).

use parsec_certs::CertificateError;
use parsec_types::SequesterServiceId;
use thiserror::Error;

pub type VlobResult<T> = Result<T, VlobError>;

#[derive(Debug, Error)]
pub enum VlobError {
    // =========================================================================
    // Authorization
    // =========================================================================
    #[error("author not allowed")]
    AuthorNotAllowed,

    // =========================================================================
    // vlob_create / vlob_update
    // =========================================================================
    #[error("realm not found")]
    RealmNotFound,

    #[error("vlob already exists")]
    VlobAlreadyExists,

    #[error("vlob not found")]
    VlobNotFound,

    #[error("key bundle targets the wrong key index")]
    BadKeyIndex,

    #[error("version must equal the stored latest version + 1")]
    BadVlobVersion,

    // =========================================================================
    // Sequester pipeline
    // =========================================================================
    #[error("organization is not sequestered")]
    OrganizationNotSequestered,

    #[error("sequester_blob keys do not match the set of active sequester services")]
    SequesterInconsistency,

    #[error("rejected by sequester service {service_id}: {reason}")]
    RejectedBySequesterService { service_id: SequesterServiceId, reason: String },

    #[error("sequester service {service_id} unavailable")]
    SequesterServiceUnavailable { service_id: SequesterServiceId },

    // =========================================================================
    // Batch reads
    // =========================================================================
    #[error("too many elements requested in a single batch")]
    TooManyElements,

    // =========================================================================
    // Block path
    // =========================================================================
    #[error("block not found")]
    BlockNotFound,

    #[error("block store unavailable")]
    StoreUnavailable,

    // =========================================================================
    // Shared certificate/datamodel validation
    // =========================================================================
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Db(#[from] parsec_db::DbError),
}

/// Tests only ever compare the discriminant, never payload equality on
/// `Certificate`/`Db` (neither of their inner error types is `PartialEq`).
impl PartialEq for VlobError {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
