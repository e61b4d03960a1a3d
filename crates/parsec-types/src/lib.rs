//! Parsec Types - canonical wire and domain types for the authenticated server engine
//!
//! Zero dependencies on other `parsec-*` crates. Defines:
//!
//! - Opaque 128-bit identifiers (user/device/realm/vlob/block/invitation/...),
//!   rendered as lowercase hex on the wire.
//! - `Timestamp`, a microsecond-precision instant with a reversible wire form.
//! - The enums shared across the certificate chain and the realm/role/vlob
//!   engines (`UserProfile`, `RealmRole`, `InvitationType`, ...).

pub mod error;
pub mod ids;
pub mod profile;
pub mod timestamp;

pub use error::*;
pub use ids::*;
pub use profile::*;
pub use timestamp::*;
