//! End-to-end tests of the HTTP surface: real requests through
//! `parsec_api::create_router`, backed by an in-memory `AppState` (spec.md
//! §4.1, §6).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parsec_api::state::AppState;
use tower::ServiceExt;

fn router() -> axum::Router {
    parsec_api::create_router(AppState::test())
}

async fn status_for(request: Request<Body>) -> StatusCode {
    router().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn anonymous_request_without_api_version_header_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/anonymous/AcmeCorp")
        .body(Body::from(b"\x81\xa3cmd\xa9whatever".to_vec()))
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn anonymous_request_with_unsupported_api_version_is_unprocessable() {
    let request = Request::builder()
        .method("POST")
        .uri("/anonymous/AcmeCorp")
        .header("Api-Version", "99.0")
        .body(Body::from(b"\x81\xa3cmd\xa9whatever".to_vec()))
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn anonymous_request_for_unknown_organization_is_not_found() {
    let request = Request::builder()
        .method("POST")
        .uri("/anonymous/DoesNotExist")
        .header("Api-Version", "4.0")
        .body(Body::from(b"\x81\xa3cmd\xa9whatever".to_vec()))
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invited_request_without_invitation_token_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/invited/AcmeCorp")
        .header("Api-Version", "4.0")
        .body(Body::from(b"\x81\xa3cmd\xa9whatever".to_vec()))
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authenticated_request_without_author_header_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/authenticated/AcmeCorp")
        .header("Api-Version", "4.0")
        .body(Body::from(b"\x81\xa3cmd\xa9whatever".to_vec()))
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authenticated_events_stream_without_author_header_is_bad_request() {
    let request = Request::builder()
        .method("GET")
        .uri("/authenticated/AcmeCorp/events")
        .header("Api-Version", "4.0")
        .body(Body::empty())
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let request = Request::builder()
        .method("GET")
        .uri("/nonexistent")
        .body(Body::empty())
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_on_a_post_route_is_method_not_allowed() {
    let request = Request::builder()
        .method("GET")
        .uri("/anonymous/AcmeCorp")
        .body(Body::empty())
        .unwrap();

    assert_eq!(status_for(request).await, StatusCode::METHOD_NOT_ALLOWED);
}
