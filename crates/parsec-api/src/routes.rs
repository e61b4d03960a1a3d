//! HTTP routes (spec.md §4.1): one POST endpoint per command family, plus
//! the authenticated SSE events stream.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use parsec_types::OrganizationId;
use tower_http::cors::CorsLayer;

use crate::dispatcher;
use crate::handlers::sse;
use crate::handlers::ClientContext;
use crate::middleware;
use crate::state::AppState;
use crate::wire::Family;
use crate::{error::ApiError, extractors};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/anonymous/:org", post(anonymous))
        .route("/invited/:org", post(invited))
        .route("/authenticated/:org", post(authenticated))
        .route("/authenticated/:org/events", get(events))
        .layer(middleware::trace_layer())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_org(org: &str) -> Result<OrganizationId, Response> {
    OrganizationId::parse(org).map_err(|_| StatusCode::NOT_FOUND.into_response())
}

async fn anonymous(
    State(state): State<AppState>,
    Path(org): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let org = match parse_org(&org) {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let path = format!("/anonymous/{}", org);
    dispatcher(state, Family::Anonymous, org, method, &path, headers, body.to_vec()).await
}

async fn invited(
    State(state): State<AppState>,
    Path(org): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let org = match parse_org(&org) {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let path = format!("/invited/{}", org);
    dispatcher(state, Family::Invited, org, method, &path, headers, body.to_vec()).await
}

async fn authenticated(
    State(state): State<AppState>,
    Path(org): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let org = match parse_org(&org) {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let path = format!("/authenticated/{}", org);
    dispatcher(state, Family::Authenticated, org, method, &path, headers, body.to_vec()).await
}

/// `GET /authenticated/<org>/events` doesn't go through [`dispatcher`]: it
/// carries no body to sign, authenticates via the same `Author`/`Signature`/
/// `Timestamp` headers but over an empty canonical payload, and returns a
/// long-lived SSE stream instead of one `Rep` (spec.md §4.7).
async fn events(
    State(state): State<AppState>,
    Path(org): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let org = match parse_org(&org) {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let path = format!("/authenticated/{}/events", org);

    let parsed = match extractors::parse_authenticated_headers(&headers) {
        Ok(parsed) => parsed,
        Err(err) => return err.into_response(),
    };
    let signed = extractors::signed_payload(method.as_str(), &path, &parsed.timestamp_header, &[]);
    let request = parsec_auth::AuthenticatedRequest {
        device_id: parsed.device_id,
        signature: &parsed.signature,
        body: &signed,
    };
    let ctx = match parsec_auth::authenticated_context(&state.db, &org, request).await {
        Ok(ctx) => ClientContext::Authenticated(ctx),
        Err(err) => return ApiError::from(err).into_response(),
    };

    let last_event_id = match extractors::parse_last_event_id(&headers) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };

    sse::events(state, ctx, last_event_id).await.into_response()
}
