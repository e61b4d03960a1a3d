//! Microsecond-precision timestamps.
//!
//! Internal representation is integer microseconds since the Unix epoch. The
//! wire form is an IEEE-754 double of seconds (`round(micros / 1e6, 6)`); the
//! conversion is total and reversible for any value a real client clock can
//! produce, which is the property P5 in spec.md §8 requires.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch");
        Self(d.as_micros() as i64)
    }

    pub fn checked_add_seconds(&self, secs: i64) -> Self {
        Self(self.0 + secs * 1_000_000)
    }

    pub fn checked_sub_seconds(&self, secs: i64) -> Self {
        Self(self.0 - secs * 1_000_000)
    }

    /// Absolute difference in seconds as a float, for ballpark comparisons.
    pub fn diff_seconds(&self, other: &Timestamp) -> f64 {
        (self.0 - other.0) as f64 / 1_000_000.0
    }

    pub fn as_wire_seconds(&self) -> f64 {
        let seconds = self.0 as f64 / 1_000_000.0;
        (seconds * 1_000_000.0).round() / 1_000_000.0
    }

    pub fn from_wire_seconds(seconds: f64) -> Self {
        Self((seconds * 1_000_000.0).round() as i64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

impl serde::Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_f64(self.as_wire_seconds())
    }
}

impl<'de> serde::Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let seconds: f64 = serde::Deserialize::deserialize(deserializer)?;
        Ok(Self::from_wire_seconds(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_microseconds() {
        let t = Timestamp::from_micros(1_700_000_123_456);
        let wire = t.as_wire_seconds();
        let back = Timestamp::from_wire_seconds(wire);
        assert_eq!(t, back);
    }

    #[test]
    fn encode_decode_encode_is_stable() {
        let t = Timestamp::from_micros(42);
        let json1 = serde_json::to_string(&t).unwrap();
        let back: Timestamp = serde_json::from_str(&json1).unwrap();
        let json2 = serde_json::to_string(&back).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn ordering_is_strictly_increasing() {
        let a = Timestamp::from_micros(100);
        let b = Timestamp::from_micros(101);
        assert!(a < b);
    }
}
