//! Causal clock invariant (spec.md §4.3).
//!
//! Deliberately coarse: any realm certificate or vlob/block write advances
//! the org-wide clock too, so the engines never need pairwise precedence
//! analysis, only two monotonic counters per organization (one of them
//! further split per realm).

use parsec_types::Timestamp;

use crate::error::{CertResult, CertificateError};

/// Scope a new certificate/vlob/block write is checked against.
pub enum ClockScope {
    /// Common certificates: user create/update/revoke, device create.
    Common { last_certificate_timestamp: Option<Timestamp> },
    /// Realm certificates, vlob create/update, block create: checked
    /// against both the org-wide and the per-realm clock, stricter wins.
    Realm {
        last_certificate_timestamp: Option<Timestamp>,
        last_realm_certificate_timestamp: Timestamp,
    },
    /// Sequester certificates: checked against the sequester authority's
    /// timestamp and all existing service certificates.
    Sequester { last_sequester_timestamp: Option<Timestamp> },
}

/// Require `timestamp` to be strictly greater than whatever the scope's
/// "last" timestamp(s) are. Returns the binding timestamp on success so the
/// caller can bump the relevant counter(s) atomically afterwards.
pub fn require_strictly_greater(scope: &ClockScope, timestamp: Timestamp) -> CertResult<()> {
    let floor = match scope {
        ClockScope::Common { last_certificate_timestamp } => *last_certificate_timestamp,
        ClockScope::Realm {
            last_certificate_timestamp,
            last_realm_certificate_timestamp,
        } => Some(
            last_certificate_timestamp
                .map(|org_ts| org_ts.max(*last_realm_certificate_timestamp))
                .unwrap_or(*last_realm_certificate_timestamp),
        ),
        ClockScope::Sequester { last_sequester_timestamp } => *last_sequester_timestamp,
    };

    match floor {
        Some(floor) if timestamp <= floor => {
            Err(CertificateError::RequireGreaterTimestamp { strictly_greater_than: floor })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_certificate_of_an_organization_always_passes() {
        let scope = ClockScope::Common { last_certificate_timestamp: None };
        assert!(require_strictly_greater(&scope, Timestamp::now()).is_ok());
    }

    #[test]
    fn equal_timestamp_is_rejected() {
        let t = Timestamp::from_micros(1_000_000);
        let scope = ClockScope::Common { last_certificate_timestamp: Some(t) };
        let err = require_strictly_greater(&scope, t).unwrap_err();
        assert!(matches!(err, CertificateError::RequireGreaterTimestamp { .. }));
    }

    #[test]
    fn realm_scope_uses_the_stricter_of_org_and_realm_clocks() {
        let org_ts = Timestamp::from_micros(2_000_000);
        let realm_ts = Timestamp::from_micros(1_000_000);
        let scope = ClockScope::Realm {
            last_certificate_timestamp: Some(org_ts),
            last_realm_certificate_timestamp: realm_ts,
        };
        // Between realm_ts and org_ts: rejected because org_ts is stricter.
        let candidate = Timestamp::from_micros(1_500_000);
        let err = require_strictly_greater(&scope, candidate).unwrap_err();
        assert_eq!(err, CertificateError::RequireGreaterTimestamp { strictly_greater_than: org_ts });
    }

    #[test]
    fn strictly_greater_timestamp_passes() {
        let scope = ClockScope::Common { last_certificate_timestamp: Some(Timestamp::from_micros(100)) };
        assert!(require_strictly_greater(&scope, Timestamp::from_micros(101)).is_ok());
    }
}
