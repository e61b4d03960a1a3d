//! Wire codec, schema registry, dispatch table, and HTTP surface for the
//! authenticated server engine (spec.md §4.1, §6).
//!
//! [`dispatcher`] is the one place that ties the pieces together: header
//! parsing ([`extractors`]), client-context construction (`parsec_auth`),
//! command-name extraction and codec ([`wire`]), and handler lookup
//! ([`dispatch`]).

pub mod dispatch;
pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod wire;

use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use parsec_types::OrganizationId;

use crate::error::ApiError;
use crate::handlers::ClientContext;
use crate::state::AppState;
use crate::wire::Family;

pub use routes::create_router;

/// Handle one `POST /<family>/<org>` request: negotiate the API version,
/// build the client context for `family`, decode just enough of the body to
/// pick a handler, run it, and encode its `Rep`.
///
/// Header/context failures abort with a bare HTTP status and an empty body
/// (spec.md §4.1); a looked-up handler always returns `200 OK` with a typed
/// `Rep` body, even when that `Rep` describes a failure.
pub async fn dispatcher(
    state: AppState,
    family: Family,
    org: OrganizationId,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: Vec<u8>,
) -> Response {
    match dispatch_inner(state, family, org, method, path, headers, body).await {
        Ok(bytes) => {
            ([(header::CONTENT_TYPE, HeaderValue::from_static("application/msgpack"))], bytes).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn dispatch_inner(
    state: AppState,
    family: Family,
    org: OrganizationId,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: Vec<u8>,
) -> Result<Vec<u8>, ApiError> {
    let requested_version = extractors::parse_api_version(&headers)?;
    let version = wire::negotiate(requested_version)?;

    let ctx = match family {
        Family::Anonymous => {
            ClientContext::Anonymous(parsec_auth::anonymous_context(&state.db, &org).await?)
        }
        Family::Invited => {
            let token = extractors::parse_invitation_token(&headers)?;
            ClientContext::Invited(parsec_auth::invited_context(&state.db, &org, &token).await?)
        }
        Family::Authenticated => {
            let parsed = extractors::parse_authenticated_headers(&headers)?;
            let signed = extractors::signed_payload(method.as_str(), path, &parsed.timestamp_header, &body);
            let request = parsec_auth::AuthenticatedRequest {
                device_id: parsed.device_id,
                signature: &parsed.signature,
                body: &signed,
            };
            ClientContext::Authenticated(parsec_auth::authenticated_context(&state.db, &org, request).await?)
        }
    };

    let command = wire::peek_command(&body)?;
    let handler = dispatch::lookup(family, version.major, &command).ok_or(ApiError::InvalidMessage)?;
    Ok(handler(state, ctx, body).await)
}
