//! Parsec Crypto - verify-key handling for the server engine.
//!
//! The server is zero-knowledge: it never generates certificates and never
//! holds a signing key for a user or device. It only verifies Ed25519
//! signatures against a `VerifyKey` it was handed at device/organization
//! creation time.
//!
//! The `testing` module is the one exception: it wraps a signing key so the
//! test suites of every other `parsec-*` crate can produce well-formed
//! signed certificates to feed into `verify_and_load`. Nothing under
//! `testing` is reachable from the request-handling path.

pub mod error;
pub mod keys;
pub mod testing;

pub use error::{CryptoError, CryptoResult};
pub use keys::VerifyKey;
