//! Shared enums for the certificate chain and the realm/role engine.

use serde::{Deserialize, Serialize};

/// A user's organization-wide profile, as set at creation and amended by
/// `user_update` certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserProfile {
    Admin,
    Standard,
    Outsider,
}

/// A user's role within a single realm.
///
/// `None` (the absence of a role) is represented separately, since a realm
/// role certificate with no role means "unshare"; see [`RealmRole`] vs.
/// `Option<RealmRole>` in `parsec-realm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RealmRole {
    Reader,
    Contributor,
    Manager,
    Owner,
}

impl RealmRole {
    /// Writer roles may create/update vlobs and blocks.
    pub fn can_write(&self) -> bool {
        !matches!(self, RealmRole::Reader)
    }

    /// Roles that may grant/revoke `Reader`/`Contributor`.
    pub fn can_manage_low_roles(&self) -> bool {
        matches!(self, RealmRole::Owner | RealmRole::Manager)
    }

    /// Only `Owner` may grant/revoke `Manager`/`Owner` or rotate keys.
    pub fn is_owner(&self) -> bool {
        matches!(self, RealmRole::Owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationType {
    User,
    Device,
    ShamirRecovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    Pending,
    Ready,
    Cancelled,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequesterServiceType {
    Storage,
    Webhook,
}

/// The six-phase conduit rendezvous state (spec.md §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConduitState {
    State1WaitPeers,
    State21ClaimerHashedNonce,
    State22GreeterNonce,
    State23ClaimerNonce,
    State31ClaimerTrust,
    State32GreeterTrust,
    State4Communicate,
}

impl ConduitState {
    /// Advance to the next phase once both peers have deposited a payload.
    /// Phase 4 is a fixed point: communication can loop until the greeter
    /// marks the exchange as the last one.
    pub fn next(self) -> Self {
        use ConduitState::*;
        match self {
            State1WaitPeers => State21ClaimerHashedNonce,
            State21ClaimerHashedNonce => State22GreeterNonce,
            State22GreeterNonce => State23ClaimerNonce,
            State23ClaimerNonce => State31ClaimerTrust,
            State31ClaimerTrust => State32GreeterTrust,
            State32GreeterTrust => State4Communicate,
            State4Communicate => State4Communicate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_role_ordering_matches_privilege() {
        assert!(RealmRole::Owner > RealmRole::Manager);
        assert!(RealmRole::Manager > RealmRole::Contributor);
        assert!(RealmRole::Contributor > RealmRole::Reader);
    }

    #[test]
    fn conduit_state_advances_linearly_and_saturates() {
        let mut s = ConduitState::State1WaitPeers;
        for _ in 0..6 {
            s = s.next();
        }
        assert_eq!(s, ConduitState::State4Communicate);
        assert_eq!(s.next(), ConduitState::State4Communicate);
    }
}
