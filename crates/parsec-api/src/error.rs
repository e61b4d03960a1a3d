//! Protocol-level errors (spec.md §4.1, §6).
//!
//! These are the dispatcher's abort conditions: they short-circuit before a
//! command handler ever runs and are reported as a bare HTTP status with an
//! empty body, never mixed with a typed `Rep` (validation/authorization
//! failures are `Rep` variants returned with HTTP 200, constructed directly
//! by each handler instead of through this type).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error, PartialEq)]
pub enum ApiError {
    #[error("incompatible API version")]
    IncompatibleApiVersion,

    #[error("unacceptable Accept header")]
    BadAcceptType,

    #[error("unacceptable Content-Type header")]
    BadContentType,

    #[error("malformed request body")]
    InvalidMessage,

    #[error("invalid authentication")]
    InvalidAuthentication,

    #[error("organization not found")]
    OrganizationNotFound,

    #[error("organization has expired")]
    OrganizationExpired,

    #[error("author not found")]
    AuthorNotFound,

    #[error("author has been revoked")]
    AuthorRevoked,

    #[error("user is frozen")]
    UserFrozen,

    #[error("invitation is invalid, cancelled, or already used")]
    InvitationInvalid,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidMessage => StatusCode::BAD_REQUEST,
            ApiError::InvalidAuthentication => StatusCode::UNAUTHORIZED,
            ApiError::OrganizationExpired | ApiError::AuthorRevoked | ApiError::UserFrozen => {
                StatusCode::FORBIDDEN
            }
            ApiError::OrganizationNotFound | ApiError::AuthorNotFound => StatusCode::NOT_FOUND,
            ApiError::BadAcceptType => StatusCode::NOT_ACCEPTABLE,
            ApiError::InvitationInvalid => StatusCode::GONE,
            ApiError::BadContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::IncompatibleApiVersion => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

impl From<parsec_auth::AuthError> for ApiError {
    fn from(err: parsec_auth::AuthError) -> Self {
        match err {
            parsec_auth::AuthError::OrganizationNotFound => ApiError::OrganizationNotFound,
            parsec_auth::AuthError::OrganizationExpired => ApiError::OrganizationExpired,
            parsec_auth::AuthError::InvalidAuthentication => ApiError::InvalidAuthentication,
            parsec_auth::AuthError::AuthorNotFound => ApiError::AuthorNotFound,
            parsec_auth::AuthError::AuthorRevoked => ApiError::AuthorRevoked,
            parsec_auth::AuthError::UserFrozen => ApiError::UserFrozen,
            parsec_auth::AuthError::InvitationInvalid => ApiError::InvitationInvalid,
            parsec_auth::AuthError::IncompatibleApiVersion => ApiError::IncompatibleApiVersion,
            parsec_auth::AuthError::BadAcceptType => ApiError::BadAcceptType,
        }
    }
}
