//! Cross-cutting HTTP layers (spec.md §4.9: CORS for web clients, request
//! tracing for observability). Authentication and authorization happen in
//! [`crate::dispatcher`] itself, not as a layer, since building a client
//! context needs the raw body and picks one of three distinct shapes.

use axum::http::Request;
use tower_http::trace::TraceLayer;

pub fn trace_layer() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
        )
    })
}
