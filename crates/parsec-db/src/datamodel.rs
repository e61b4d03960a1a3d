//! The abstract transactional datamodel (spec.md §4.9).
//!
//! Engines consume only this trait; `memory::MemoryDatamodel` and
//! `sql::SqlDatamodel` are the two required concrete backends.

use async_trait::async_trait;

use parsec_types::{
    DeviceId, InvitationStatus, InvitationToken, OrganizationId, RealmId, Timestamp, UserId,
    VlobId,
};

use crate::error::DbResult;
use crate::locks::{LockGuard, LockTopic};
use crate::model::{
    Block, Device, Invitation, KeyRotationEntry, Organization, ProfileUpdate, Realm,
    RealmUserRoleEntry, SequesterService, User, Vlob, VlobVersion,
};

#[async_trait]
pub trait Datamodel: Send + Sync {
    // -- organization -------------------------------------------------
    async fn get_organization(&self, org: &OrganizationId) -> DbResult<Option<Organization>>;
    async fn insert_organization(&self, org: Organization) -> DbResult<()>;
    async fn bootstrap_organization(
        &self,
        org: &OrganizationId,
        root_verify_key: parsec_crypto::VerifyKey,
    ) -> DbResult<()>;

    // -- users ----------------------------------------------------------
    async fn get_user(&self, org: &OrganizationId, user_id: &UserId) -> DbResult<Option<User>>;
    async fn find_user_by_email(&self, org: &OrganizationId, email: &str) -> DbResult<Option<User>>;
    async fn insert_user(&self, org: &OrganizationId, user: User) -> DbResult<()>;
    async fn update_user_profile(
        &self,
        org: &OrganizationId,
        user_id: &UserId,
        update: ProfileUpdate,
    ) -> DbResult<()>;
    async fn revoke_user(
        &self,
        org: &OrganizationId,
        user_id: &UserId,
        revoked_on: Timestamp,
    ) -> DbResult<()>;
    async fn set_user_frozen(&self, org: &OrganizationId, user_id: &UserId, frozen: bool) -> DbResult<()>;

    // -- devices ----------------------------------------------------------
    async fn get_device(&self, org: &OrganizationId, device_id: &DeviceId) -> DbResult<Option<Device>>;
    async fn insert_device(&self, org: &OrganizationId, device: Device) -> DbResult<()>;

    // -- realms -----------------------------------------------------------
    async fn get_realm(&self, org: &OrganizationId, realm_id: &RealmId) -> DbResult<Option<Realm>>;
    async fn list_realms(&self, org: &OrganizationId) -> DbResult<Vec<Realm>>;
    async fn insert_realm(&self, org: &OrganizationId, realm: Realm) -> DbResult<()>;
    async fn append_realm_role(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        entry: RealmUserRoleEntry,
    ) -> DbResult<()>;
    async fn append_key_rotation(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        entry: KeyRotationEntry,
    ) -> DbResult<()>;
    async fn bump_realm_certificate_timestamp(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        ts: Timestamp,
    ) -> DbResult<()>;

    // -- vlobs & blocks -----------------------------------------------------
    async fn get_vlob(&self, org: &OrganizationId, vlob_id: &VlobId) -> DbResult<Option<Vlob>>;
    async fn insert_vlob(&self, org: &OrganizationId, vlob: Vlob) -> DbResult<u64>;
    async fn append_vlob_version(
        &self,
        org: &OrganizationId,
        vlob_id: &VlobId,
        version: VlobVersion,
    ) -> DbResult<u64>;
    /// Returns `(current_checkpoint, [(vlob_id, latest_version_past_checkpoint)])`.
    async fn poll_vlob_changes(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        since_checkpoint: u64,
    ) -> DbResult<(u64, Vec<(VlobId, u32)>)>;

    async fn insert_block(&self, org: &OrganizationId, block: Block) -> DbResult<()>;
    async fn get_block(&self, org: &OrganizationId, block_id: &VlobId) -> DbResult<Option<Block>>;
    /// Returns `(blocks_size, vlobs_size)` summed across every block/vlob
    /// version belonging to `realm_id`.
    async fn get_realm_stats(&self, org: &OrganizationId, realm_id: &RealmId) -> DbResult<(u64, u64)>;

    // -- invitations --------------------------------------------------------
    async fn get_invitation(
        &self,
        org: &OrganizationId,
        token: &InvitationToken,
    ) -> DbResult<Option<Invitation>>;
    async fn find_pending_user_invitation(
        &self,
        org: &OrganizationId,
        email: &str,
    ) -> DbResult<Option<Invitation>>;
    async fn insert_invitation(&self, org: &OrganizationId, invitation: Invitation) -> DbResult<()>;
    async fn set_invitation_status(
        &self,
        org: &OrganizationId,
        token: &InvitationToken,
        status: InvitationStatus,
    ) -> DbResult<()>;
    /// All invitations ever created in the organization, most recent first.
    async fn list_invitations(&self, org: &OrganizationId) -> DbResult<Vec<Invitation>>;

    // -- sequester ------------------------------------------------------------
    async fn get_sequester_services(&self, org: &OrganizationId) -> DbResult<Vec<SequesterService>>;
    async fn insert_sequester_service(
        &self,
        org: &OrganizationId,
        service: SequesterService,
    ) -> DbResult<()>;

    // -- causal clock -----------------------------------------------------------
    async fn get_last_certificate_timestamp(&self, org: &OrganizationId) -> DbResult<Option<Timestamp>>;
    async fn bump_last_certificate_timestamp(&self, org: &OrganizationId, ts: Timestamp) -> DbResult<()>;

    // -- advisory locking --------------------------------------------------------
    async fn lock_topic(&self, org: &OrganizationId, topic: LockTopic) -> DbResult<LockGuard>;
}
