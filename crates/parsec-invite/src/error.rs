//! Invitation & conduit engine errors (spec.md §4.6).

use thiserror::Error;

pub type InviteResult<T> = Result<T, InviteError>;

#[derive(Debug, Error)]
pub enum InviteError {
    // =========================================================================
    // new_for_user
    // =========================================================================
    #[error("author not allowed to invite a new user")]
    AuthorNotAllowed,

    #[error("this email already belongs to a member of the organization")]
    ClaimerEmailAlreadyEnrolled,

    // =========================================================================
    // Lookup / lifecycle
    // =========================================================================
    #[error("invitation not found")]
    InvitationNotFound,

    #[error("invitation already deleted")]
    InvitationAlreadyDeleted,

    #[error("invitation has been cancelled")]
    InvitationDeleted,

    #[error("invitation has already been used")]
    InvitationAlreadyUsed,

    // =========================================================================
    // conduit_exchange
    // =========================================================================
    #[error("conduit is not at the expected phase")]
    EnrollmentWrongState,

    #[error(transparent)]
    Db(#[from] parsec_db::DbError),
}

/// `Db` carries `sqlx::Error`, which isn't `PartialEq`; tests only ever
/// compare the discriminant, never payload equality on that variant.
impl PartialEq for InviteError {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
