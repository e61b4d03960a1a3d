//! Realm & role engine errors (spec.md §4.4).

use parsec_certs::CertificateError;
use thiserror::Error;

pub type RealmResult<T> = Result<T, RealmError>;

#[derive(Debug, Error)]
pub enum RealmError {
    // =========================================================================
    // realm_create
    // =========================================================================
    #[error("realm already exists")]
    RealmAlreadyExists,

    #[error("author not allowed")]
    AuthorNotAllowed,

    #[error("invalid certificate")]
    InvalidCertificate,

    // =========================================================================
    // realm_share / realm_unshare
    // =========================================================================
    #[error("role already granted")]
    RoleAlreadyGranted,

    #[error("user already unshared")]
    UserAlreadyUnshared,

    #[error("role incompatible with outsider profile")]
    RoleIncompatibleWithOutsider,

    #[error("cannot share a role with oneself")]
    CannotSelfShare,

    #[error("cannot unshare a role with oneself")]
    CannotSelfUnshare,

    #[error("key bundle targets the wrong key index")]
    BadKeyIndex,

    #[error("user not found")]
    UserNotFound,

    #[error("user has been revoked")]
    UserRevoked,

    #[error("author does not hold a sufficient role to make this change")]
    AuthorNotAllowedToGrant,

    // =========================================================================
    // realm_rotate_key
    // =========================================================================
    #[error("per-participant key bundle access does not exactly cover current non-revoked members")]
    ParticipantMismatch,

    #[error("realm is archived")]
    RealmArchived,

    // =========================================================================
    // Lookup
    // =========================================================================
    #[error("realm not found")]
    RealmNotFound,

    // =========================================================================
    // Shared certificate validation
    // =========================================================================
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Db(#[from] parsec_db::DbError),
}

/// `sqlx`/transport errors carried in `Db`/`Certificate` don't implement
/// `PartialEq`; tests only ever compare the discriminant, never payload
/// equality on those two variants.
impl PartialEq for RealmError {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
