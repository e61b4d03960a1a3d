//! Protocol-level authentication errors (spec.md §4.1, §4.2).
//!
//! These map 1:1 onto the dispatcher's documented failure modes and, at the
//! surface layer, onto the HTTP status codes listed in spec.md §6.

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    // =========================================================================
    // Organization-level
    // =========================================================================
    #[error("organization not found")]
    OrganizationNotFound,

    #[error("organization has expired")]
    OrganizationExpired,

    // =========================================================================
    // Authenticated context
    // =========================================================================
    #[error("invalid authentication")]
    InvalidAuthentication,

    #[error("author not found")]
    AuthorNotFound,

    #[error("author has been revoked")]
    AuthorRevoked,

    #[error("user is frozen")]
    UserFrozen,

    // =========================================================================
    // Invited context
    // =========================================================================
    #[error("invitation is invalid, cancelled, or already used")]
    InvitationInvalid,

    // =========================================================================
    // Dispatch-level
    // =========================================================================
    #[error("incompatible API version")]
    IncompatibleApiVersion,

    #[error("unacceptable Accept/Content-Type header")]
    BadAcceptType,
}
