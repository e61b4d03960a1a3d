//! Header parsing for the three command families (spec.md §6).
//!
//! These are plain functions rather than `axum` `FromRequestParts`
//! extractors: building an `AuthenticatedClientContext` needs the raw
//! request body (the signature covers it), which isn't available until the
//! dispatcher has already read it, so header parsing and context
//! construction happen together in one place (`lib.rs`'s dispatcher) rather
//! than as an independent extraction step.

use axum::http::HeaderMap;
use parsec_types::{DeviceId, EventId, InvitationToken, UserId};

use crate::error::{ApiError, ApiResult};
use crate::wire::ApiVersion;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .ok_or(ApiError::InvalidMessage)?
        .to_str()
        .map_err(|_| ApiError::InvalidMessage)
}

/// Mandatory on every request (spec.md §4.1).
pub fn parse_api_version(headers: &HeaderMap) -> ApiResult<ApiVersion> {
    ApiVersion::parse(header_str(headers, "Api-Version")?)
}

/// Mandatory on `/invited/<org>` requests.
pub fn parse_invitation_token(headers: &HeaderMap) -> ApiResult<InvitationToken> {
    let raw = header_str(headers, "Invitation-Token")?;
    InvitationToken::from_hex(raw).map_err(|_| ApiError::InvalidMessage)
}

/// The three headers required on `/authenticated/<org>` requests, parsed
/// but not yet verified (verification needs the body and a device lookup,
/// both only available once the dispatcher has the engine state in hand).
pub struct AuthenticatedHeaders {
    pub device_id: DeviceId,
    pub signature: Vec<u8>,
    pub timestamp_header: String,
}

pub fn parse_authenticated_headers(headers: &HeaderMap) -> ApiResult<AuthenticatedHeaders> {
    let author = header_str(headers, "Author")?;
    let (user_id_hex, device_name) = author.split_once('@').ok_or(ApiError::InvalidMessage)?;
    let user_id = UserId::from_hex(user_id_hex).map_err(|_| ApiError::InvalidMessage)?;
    let device_id = DeviceId::new(user_id, device_name);

    let signature_b64 = header_str(headers, "Signature")?;
    let signature = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature_b64)
        .map_err(|_| ApiError::InvalidMessage)?;

    let timestamp_header = header_str(headers, "Timestamp")?.to_string();
    // Parsed only to reject malformed headers early; the signature check
    // covers the raw header string verbatim (spec.md §6), not the parsed
    // value, so it is kept around too.
    chrono::DateTime::parse_from_rfc3339(&timestamp_header).map_err(|_| ApiError::InvalidMessage)?;

    Ok(AuthenticatedHeaders { device_id, signature, timestamp_header })
}

/// Optional SSE resume header.
pub fn parse_last_event_id(headers: &HeaderMap) -> ApiResult<Option<EventId>> {
    match headers.get("Last-Event-ID") {
        None => Ok(None),
        Some(value) => {
            let raw = value.to_str().map_err(|_| ApiError::InvalidMessage)?;
            EventId::from_hex(raw).map(Some).map_err(|_| ApiError::InvalidMessage)
        }
    }
}

/// The canonical string the `Signature` header covers: `"<method>\n<path>\n
/// <timestamp>\n"` followed directly by the raw request body bytes
/// (spec.md §6).
pub fn signed_payload(method: &str, path: &str, timestamp_header: &str, body: &[u8]) -> Vec<u8> {
    let mut buf = format!("{method}\n{path}\n{timestamp_header}\n").into_bytes();
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn signed_payload_concatenates_canonical_string_and_body() {
        let payload = signed_payload("POST", "/authenticated/Acme", "2024-01-01T00:00:00Z", b"body");
        let mut expected = b"POST\n/authenticated/Acme\n2024-01-01T00:00:00Z\n".to_vec();
        expected.extend_from_slice(b"body");
        assert_eq!(payload, expected);
    }

    #[test]
    fn parse_api_version_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert_eq!(parse_api_version(&headers).unwrap_err(), ApiError::InvalidMessage);
    }

    #[test]
    fn parse_api_version_accepts_well_formed_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Api-Version", HeaderValue::from_static("4.0"));
        let version = parse_api_version(&headers).unwrap();
        assert_eq!(version, ApiVersion { major: 4, minor: 0 });
    }
}
