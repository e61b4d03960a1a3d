//! The event types dispatched on the bus (spec.md §4.7).

use parsec_types::{
    DeviceId, EventId, InvitationToken, OrganizationId, RealmId, RealmRole, SequesterServiceId,
    Timestamp, UserId, VlobId,
};
use serde::{Deserialize, Serialize};

/// Vlob blobs larger than this are dropped from the emitted [`Event`]; the
/// subscriber must `vlob_read` to get the content. Keeps a single huge write
/// from blowing up SSE fan-out cost across every subscriber on the realm.
pub const EVENT_VLOB_MAX_BLOB_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Invitation {
        token: InvitationToken,
        greeter: UserId,
        status: parsec_types::InvitationStatus,
    },
    EnrollmentConduit {
        token: InvitationToken,
        state: parsec_types::ConduitState,
    },
    CommonCertificate {
        timestamp: Timestamp,
    },
    RealmCertificate {
        realm_id: RealmId,
        timestamp: Timestamp,
        user_id: UserId,
        role_removed: bool,
    },
    SequesterCertificate {
        service_id: SequesterServiceId,
        timestamp: Timestamp,
    },
    ShamirRecoveryCertificate {
        timestamp: Timestamp,
    },
    Vlob {
        realm_id: RealmId,
        vlob_id: VlobId,
        version: u32,
        author: DeviceId,
        timestamp: Timestamp,
        blob: Option<Vec<u8>>,
        last_common_certificate_timestamp: Timestamp,
        last_realm_certificate_timestamp: Timestamp,
    },
    Pinged,
    OrganizationExpired,
    OrganizationTosUpdated,
}

/// A dispatched event: a unique id, the owning organization, and a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    event_id: EventId,
    organization_id: OrganizationId,
    payload: EventPayload,
}

impl Event {
    pub fn new(organization_id: OrganizationId, payload: EventPayload) -> Self {
        Self {
            event_id: EventId::new(),
            organization_id,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

/// Build an `EventPayload::Vlob`, applying the `EVENT_VLOB_MAX_BLOB_SIZE`
/// truncation rule.
#[allow(clippy::too_many_arguments)]
pub fn vlob_event_payload(
    realm_id: RealmId,
    vlob_id: VlobId,
    version: u32,
    author: DeviceId,
    timestamp: Timestamp,
    blob: Vec<u8>,
    last_common_certificate_timestamp: Timestamp,
    last_realm_certificate_timestamp: Timestamp,
    max_blob_size: usize,
) -> EventPayload {
    let blob = if blob.len() > max_blob_size { None } else { Some(blob) };
    EventPayload::Vlob {
        realm_id,
        vlob_id,
        version,
        author,
        timestamp,
        blob,
        last_common_certificate_timestamp,
        last_realm_certificate_timestamp,
    }
}

/// The organization-config handshake frame sent before any events, per the
/// SSE endpoint description in spec.md §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfigFrame {
    pub profile: parsec_types::UserProfile,
    pub user_profile_outsider_allowed: bool,
    pub active_users_limit: Option<u64>,
    pub allowed_client_agent: AllowedClientAgentWire,
    pub account_vault_strategy: AccountVaultStrategyWire,
    pub current_realms: Vec<(RealmId, RealmRole)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedClientAgentWire {
    NativeOnly,
    NativeOrWeb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountVaultStrategyWire {
    Allowed,
    Forbidden,
}
