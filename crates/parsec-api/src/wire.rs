//! The wire codec (spec.md §4.1, §6).
//!
//! `Req`/`Rep` values are plain `serde`-derived enums/structs; `encode`/
//! `decode` run them through `rmp-serde` (MessagePack), the closest
//! pure-Rust, serde-native analogue of spec.md's "compact self-describing
//! binary object" (map of field-name → value, unknown fields ignored on
//! decode — `rmp_serde::to_vec_named` always writes field names, which is
//! what makes that forward-compatibility rule possible).

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ApiError, ApiResult};

/// One of the three command families, each routed through its own HTTP path
/// and its own client-context kind (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Anonymous,
    Invited,
    Authenticated,
}

/// `<major>.<minor>`, as carried by the mandatory `Api-Version` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub fn parse(header: &str) -> ApiResult<Self> {
        let (major, minor) = header.split_once('.').ok_or(ApiError::IncompatibleApiVersion)?;
        let major = major.parse().map_err(|_| ApiError::IncompatibleApiVersion)?;
        let minor = minor.parse().map_err(|_| ApiError::IncompatibleApiVersion)?;
        Ok(Self { major, minor })
    }
}

/// Server-supported versions, highest first. A client negotiates the
/// highest compatible major version and the highest minor at or below what
/// it asked for.
pub const SUPPORTED_VERSIONS: &[ApiVersion] = &[ApiVersion { major: 4, minor: 0 }];

pub fn negotiate(requested: ApiVersion) -> ApiResult<ApiVersion> {
    SUPPORTED_VERSIONS
        .iter()
        .find(|v| v.major == requested.major && v.minor <= requested.minor)
        .copied()
        .ok_or(ApiError::IncompatibleApiVersion)
}

/// Encode a `Req` or `Rep` value. Same logical value always produces the
/// same bytes (msgpack's map encoding is deterministic per serde's field
/// order, which never varies for a given Rust type).
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    rmp_serde::to_vec_named(value).expect("wire types always serialize")
}

/// Decode a `Req`. Any missing required field, unknown tag, or type
/// mismatch surfaces as `INVALID_MESSAGE`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ApiResult<T> {
    rmp_serde::from_slice(bytes).map_err(|_| ApiError::InvalidMessage)
}

#[derive(serde::Deserialize)]
struct CommandEnvelope {
    cmd: String,
}

/// Every request body carries a `cmd` field naming the command alongside
/// its own fields; the dispatcher reads just that field to pick a handler,
/// then hands the whole body to that handler to decode as its own `Req`
/// (unknown fields, including `cmd` itself, are ignored by every `Req`'s
/// derived `Deserialize`).
pub fn peek_command(bytes: &[u8]) -> ApiResult<String> {
    rmp_serde::from_slice::<CommandEnvelope>(bytes)
        .map(|envelope| envelope.cmd)
        .map_err(|_| ApiError::InvalidMessage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Example {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_a_struct() {
        let value = Example { a: 1, b: "hi".into() };
        let decoded: Example = decode(&encode(&value)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode::<Example>(b"\xff\xff\xff").unwrap_err();
        assert_eq!(err, ApiError::InvalidMessage);
    }

    #[test]
    fn negotiate_picks_highest_minor_at_or_below_request() {
        let version = negotiate(ApiVersion { major: 4, minor: 7 }).unwrap();
        assert_eq!(version, ApiVersion { major: 4, minor: 0 });
    }

    #[test]
    fn negotiate_rejects_unknown_major() {
        let err = negotiate(ApiVersion { major: 99, minor: 0 }).unwrap_err();
        assert_eq!(err, ApiError::IncompatibleApiVersion);
    }
}
