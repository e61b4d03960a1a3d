//! Entity structs, shared by the in-memory and SQL datamodel implementations.
//!
//! These mirror spec.md §3 exactly; the SQL backend maps table rows into
//! these same structs rather than exposing its own row types, so engine code
//! never has to care which backend it is talking to.

use std::collections::BTreeMap;

use parsec_crypto::VerifyKey;
use parsec_types::{
    DeviceId, InvitationStatus, InvitationToken, InvitationType, OrganizationId, RealmId,
    RealmRole, SequesterServiceId, SequesterServiceType, Timestamp, UserId, UserProfile, VlobId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveUsersLimit {
    Unbounded,
    Limited(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TosUrls {
    pub per_locale: BTreeMap<String, String>,
    pub updated_on: Timestamp,
}

#[derive(Debug, Clone)]
pub struct SequesterAuthority {
    pub verify_key_der: Vec<u8>,
    pub created_on: Timestamp,
}

#[derive(Debug, Clone)]
pub struct Organization {
    pub id: OrganizationId,
    pub root_verify_key: Option<VerifyKey>,
    pub is_expired: bool,
    pub bootstrap_token: String,
    pub active_users_limit: ActiveUsersLimit,
    pub user_profile_outsider_allowed: bool,
    pub minimum_archiving_period: i64,
    pub allowed_client_agent: AllowedClientAgent,
    pub account_vault_strategy: AccountVaultStrategy,
    pub sequester_authority: Option<SequesterAuthority>,
    pub tos: Option<TosUrls>,
    /// max timestamp over every common + realm + sequester + shamir
    /// certificate stored for this organization. `None` until bootstrap.
    pub last_certificate_timestamp: Option<Timestamp>,
}

impl Organization {
    pub fn is_bootstrapped(&self) -> bool {
        self.root_verify_key.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedClientAgent {
    NativeOnly,
    NativeOrWeb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountVaultStrategy {
    Allowed,
    Forbidden,
}

#[derive(Debug, Clone)]
pub struct HumanHandle {
    pub email: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub profile: UserProfile,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: UserId,
    pub human_handle: HumanHandle,
    pub initial_profile: UserProfile,
    pub profile_updates: Vec<ProfileUpdate>,
    pub created_on: Timestamp,
    pub revoked_on: Option<Timestamp>,
    pub frozen: bool,
}

impl User {
    pub fn is_revoked(&self) -> bool {
        self.revoked_on.is_some()
    }

    pub fn current_profile(&self) -> UserProfile {
        self.profile_updates
            .last()
            .map(|u| u.profile)
            .unwrap_or(self.initial_profile)
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: DeviceId,
    pub verify_key: VerifyKey,
    pub certificate: Vec<u8>,
    pub created_on: Timestamp,
    pub device_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmUserRoleEntry {
    pub user_id: UserId,
    pub role: Option<RealmRole>,
    pub certificate: Vec<u8>,
    pub granted_by: DeviceId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRotationEntry {
    pub key_index: u32,
    pub certificate: Vec<u8>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone)]
pub struct Realm {
    pub realm_id: RealmId,
    pub created_on: Timestamp,
    pub roles: Vec<RealmUserRoleEntry>,
    pub key_rotations: Vec<KeyRotationEntry>,
    /// per-realm monotonic vlob-write checkpoint (spec.md §4.5).
    pub checkpoint: u64,
    /// max timestamp over this realm's certificates and vlobs.
    pub last_realm_certificate_timestamp: Timestamp,
    pub archived_on: Option<Timestamp>,
    pub archiving_configured_by: Option<UserId>,
}

impl Realm {
    pub fn current_role_for(&self, user_id: UserId) -> Option<RealmRole> {
        self.roles
            .iter()
            .rev()
            .find(|r| r.user_id == user_id)
            .and_then(|r| r.role)
    }

    pub fn current_key_index(&self) -> u32 {
        self.key_rotations.last().map(|k| k.key_index).unwrap_or(0)
    }

    pub fn current_members(&self) -> Vec<UserId> {
        let mut seen = BTreeMap::new();
        for entry in &self.roles {
            match entry.role {
                Some(role) => {
                    seen.insert(entry.user_id, role);
                }
                None => {
                    seen.remove(&entry.user_id);
                }
            }
        }
        seen.into_keys().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlobVersion {
    pub version: u32,
    pub blob: Vec<u8>,
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub key_index: u32,
    pub sequester_blob: Option<BTreeMap<SequesterServiceId, Vec<u8>>>,
}

#[derive(Debug, Clone)]
pub struct Vlob {
    pub vlob_id: VlobId,
    pub realm_id: RealmId,
    pub versions: Vec<VlobVersion>,
}

impl Vlob {
    pub fn latest(&self) -> &VlobVersion {
        self.versions.last().expect("a vlob always has >=1 version")
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub block_id: VlobId,
    pub realm_id: RealmId,
    pub key_index: u32,
    pub size: u64,
    pub author: DeviceId,
}

#[derive(Debug, Clone)]
pub struct Invitation {
    pub token: InvitationToken,
    pub invitation_type: InvitationType,
    pub created_by_device_id: DeviceId,
    pub created_on: Timestamp,
    pub claimer_email: Option<String>,
    pub claimer_user_id: Option<UserId>,
    pub status: InvitationStatus,
}

#[derive(Debug, Clone)]
pub struct SequesterService {
    pub service_id: SequesterServiceId,
    pub service_type: SequesterServiceType,
    pub certificate: Vec<u8>,
    pub created_on: Timestamp,
    pub disabled_on: Option<Timestamp>,
    pub webhook_url: Option<String>,
}

impl SequesterService {
    pub fn is_active(&self) -> bool {
        self.disabled_on.is_none()
    }
}
