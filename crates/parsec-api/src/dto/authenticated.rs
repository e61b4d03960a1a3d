//! `/authenticated/<org>` family (spec.md §4.4–§4.6): every command that
//! requires a signed-in device. One `Req`/`Rep` pair per operation exposed
//! by `parsec-realm`, `parsec-vlob`, and `parsec-invite`.

use std::collections::BTreeMap;

use parsec_types::{InvitationToken, InvitationType, RealmId, RealmRole, Timestamp, UserId, VlobId};
use serde::{Deserialize, Serialize};

use super::common::{BallparkMismatch, SequesterBlob, SignedCertificate};

// =============================================================================
// realm_create
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmCreateReq {
    pub realm_role_certificate: SignedCertificate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmCreateRep {
    Ok,
    RealmAlreadyExists,
    AuthorNotAllowed,
    InvalidCertificate,
    TimestampOutOfBallpark(BallparkMismatch),
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
    RepUnknownStatus,
}

// =============================================================================
// realm_share / realm_unshare (role == None)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmShareReq {
    pub realm_role_certificate: SignedCertificate,
    #[serde(with = "serde_bytes")]
    pub recipient_keys_bundle_access: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmShareRep {
    Ok,
    RealmNotFound,
    RoleAlreadyGranted,
    UserAlreadyUnshared,
    RoleIncompatibleWithOutsider,
    CannotSelfShare,
    CannotSelfUnshare,
    BadKeyIndex,
    UserNotFound,
    UserRevoked,
    AuthorNotAllowed,
    InvalidCertificate,
    TimestampOutOfBallpark(BallparkMismatch),
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
    RepUnknownStatus,
}

// =============================================================================
// realm_rotate_key
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmRotateKeyReq {
    pub realm_key_rotation_certificate: SignedCertificate,
    #[serde(with = "serde_bytes")]
    pub keys_bundle: Vec<u8>,
    pub per_participant_keys_bundle_access: BTreeMap<UserId, Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmRotateKeyRep {
    Ok,
    RealmNotFound,
    RealmArchived,
    BadKeyIndex,
    AuthorNotAllowed,
    ParticipantMismatch,
    InvalidCertificate,
    TimestampOutOfBallpark(BallparkMismatch),
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
    RepUnknownStatus,
}

// =============================================================================
// realm_get_stats / realm_get_stats_as_user
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmGetStatsReq {
    pub realm_id: RealmId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmGetStatsRep {
    Ok { blocks_size: u64, vlobs_size: u64 },
    RealmNotFound,
    AuthorNotAllowed,
    RepUnknownStatus,
}

// =============================================================================
// get_current_realms_for_user
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCurrentRealmsForUserReq {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GetCurrentRealmsForUserRep {
    Ok { realms: BTreeMap<RealmId, RealmRole> },
    UserNotFound,
    RepUnknownStatus,
}

// =============================================================================
// vlob_create
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlobCreateReq {
    pub realm_id: RealmId,
    pub vlob_id: VlobId,
    pub key_index: u32,
    pub timestamp: Timestamp,
    #[serde(with = "serde_bytes")]
    pub blob: Vec<u8>,
    pub sequester_blob: Option<SequesterBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobCreateRep {
    Ok,
    AuthorNotAllowed,
    RealmNotFound,
    VlobAlreadyExists,
    BadKeyIndex { last_realm_certificate_timestamp: Timestamp },
    OrganizationNotSequestered,
    SequesterInconsistency,
    RejectedBySequesterService { service_id: parsec_types::SequesterServiceId, reason: String },
    SequesterServiceUnavailable { service_id: parsec_types::SequesterServiceId },
    TimestampOutOfBallpark(BallparkMismatch),
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
    RepUnknownStatus,
}

// =============================================================================
// vlob_update
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlobUpdateReq {
    pub vlob_id: VlobId,
    pub version: u32,
    pub timestamp: Timestamp,
    #[serde(with = "serde_bytes")]
    pub blob: Vec<u8>,
    pub sequester_blob: Option<SequesterBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobUpdateRep {
    Ok,
    AuthorNotAllowed,
    VlobNotFound,
    RealmNotFound,
    BadVlobVersion,
    BadKeyIndex { last_realm_certificate_timestamp: Timestamp },
    OrganizationNotSequestered,
    SequesterInconsistency,
    RejectedBySequesterService { service_id: parsec_types::SequesterServiceId, reason: String },
    SequesterServiceUnavailable { service_id: parsec_types::SequesterServiceId },
    TimestampOutOfBallpark(BallparkMismatch),
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
    RepUnknownStatus,
}

// =============================================================================
// vlob_read_as_user
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlobReadAsUserReq {
    pub realm_id: RealmId,
    pub vlob_ids: Vec<VlobId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlobReadItem {
    pub vlob_id: VlobId,
    pub version: u32,
    pub author: parsec_types::DeviceId,
    pub timestamp: Timestamp,
    #[serde(with = "serde_bytes")]
    pub blob: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobReadAsUserRep {
    Ok {
        items: Vec<VlobReadItem>,
        last_common_certificate_timestamp: Timestamp,
        last_realm_certificate_timestamp: Timestamp,
    },
    RealmNotFound,
    TooManyElements,
    RepUnknownStatus,
}

// =============================================================================
// vlob_poll_changes_as_user
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlobPollChangesAsUserReq {
    pub realm_id: RealmId,
    pub last_checkpoint: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobPollChangesAsUserRep {
    Ok { current_checkpoint: u64, changes: Vec<(VlobId, u32)> },
    RealmNotFound,
    RepUnknownStatus,
}

// =============================================================================
// block_create / block_read
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCreateReq {
    pub realm_id: RealmId,
    pub block_id: VlobId,
    pub key_index: u32,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockCreateRep {
    Ok,
    AuthorNotAllowed,
    RealmNotFound,
    BadKeyIndex,
    StoreUnavailable,
    TimestampOutOfBallpark(BallparkMismatch),
    RequireGreaterTimestamp { strictly_greater_than: Timestamp },
    RepUnknownStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReadReq {
    pub realm_id: RealmId,
    pub block_id: VlobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockReadRep {
    Ok {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
        key_index: u32,
        needed_realm_certificate_timestamp: Timestamp,
    },
    RealmNotFound,
    BlockNotFound,
    StoreUnavailable,
    RepUnknownStatus,
}

// =============================================================================
// invite_new_user / invite_new_device / invite_cancel / invite_list
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteNewUserReq {
    pub claimer_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteNewUserRep {
    Ok { token: InvitationToken },
    AuthorNotAllowed,
    ClaimerEmailAlreadyEnrolled,
    RepUnknownStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteNewDeviceReq {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteNewDeviceRep {
    Ok { token: InvitationToken },
    RepUnknownStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCancelReq {
    pub token: InvitationToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteCancelRep {
    Ok,
    InvitationNotFound,
    InvitationAlreadyDeleted,
    RepUnknownStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteListReq {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteListItem {
    pub token: InvitationToken,
    pub r#type: InvitationType,
    pub created_on: Timestamp,
    pub status: parsec_types::InvitationStatus,
    pub claimer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteListRep {
    Ok { invitations: Vec<InviteListItem> },
    RepUnknownStatus,
}

// =============================================================================
// ping (trivial liveness / event-bus smoke test, spec.md §4.7 EventPinged)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReq {
    pub ping: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PingRep {
    Ok { pong: String },
    RepUnknownStatus,
}
