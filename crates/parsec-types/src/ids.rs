//! Opaque identifiers
//!
//! Every entity identifier in Parsec is either a short printable organization
//! name or an opaque 128-bit value rendered as lowercase hex on the wire.
//! This module defines both families with strongly-typed wrappers so the
//! engines can never accidentally mix, say, a `VlobId` and a `RealmId`.

use std::fmt;
use std::str::FromStr;

/// Macro to generate opaque 128-bit ID types with a common hex representation.
macro_rules! define_hex_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u128);

        impl $name {
            /// Generate a new random ID.
            pub fn new() -> Self {
                Self(rand::random())
            }

            /// Render as lowercase hex (the wire representation).
            pub fn to_hex(&self) -> String {
                hex::encode(self.0.to_be_bytes())
            }

            /// Parse from lowercase (or mixed-case) hex.
            pub fn from_hex(s: &str) -> Result<Self, crate::error::IdParseError> {
                let bytes = hex::decode(s).map_err(|_| crate::error::IdParseError::InvalidHex)?;
                if bytes.len() != 16 {
                    return Err(crate::error::IdParseError::WrongLength);
                }
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                Ok(Self(u128::from_be_bytes(arr)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = crate::error::IdParseError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(&self.0.to_be_bytes())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let bytes: serde_bytes::ByteBuf = serde::Deserialize::deserialize(deserializer)?;
                if bytes.len() != 16 {
                    return Err(serde::de::Error::custom("expected a 16-byte identifier"));
                }
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                Ok(Self(u128::from_be_bytes(arr)))
            }
        }
    };
}

define_hex_id!(UserId, "Unique identifier for a user");
define_hex_id!(RealmId, "Unique identifier for a realm");
define_hex_id!(VlobId, "Unique identifier for a vlob");
define_hex_id!(BlockId, "Unique identifier for a block");
define_hex_id!(InvitationToken, "Unique token identifying an invitation");
define_hex_id!(SequesterServiceId, "Unique identifier for a sequester service");
define_hex_id!(EventId, "Unique identifier for a dispatched event");

/// Short printable organization identifier, e.g. `"AcmeCorp"`.
///
/// Organization IDs are operator-chosen at bootstrap time, not random, so
/// they are modeled as a validated string rather than a hex blob.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    const MAX_LEN: usize = 32;

    /// Validate and wrap a candidate organization id.
    pub fn parse(s: impl Into<String>) -> Result<Self, crate::error::IdParseError> {
        let s = s.into();
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(crate::error::IdParseError::WrongLength);
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(crate::error::IdParseError::InvalidHex);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite device identifier: a device is scoped to exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceId {
    pub user_id: UserId,
    pub device_name: String,
}

impl DeviceId {
    pub fn new(user_id: UserId, device_name: impl Into<String>) -> Self {
        Self {
            user_id,
            device_name: device_name.into(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.device_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_id_round_trips() {
        let id = VlobId::new();
        let hex = id.to_hex();
        let parsed = VlobId::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn hex_id_rejects_wrong_length() {
        assert!(VlobId::from_hex("deadbeef").is_err());
    }

    #[test]
    fn organization_id_rejects_empty_and_overlong() {
        assert!(OrganizationId::parse("").is_err());
        assert!(OrganizationId::parse("x".repeat(64)).is_err());
        assert!(OrganizationId::parse("AcmeCorp").is_ok());
    }

    #[test]
    fn serde_round_trip_via_json_uses_byte_array() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
