//! Realm & role engine (spec.md §4.4).
//!
//! Mirrors the original implementation's `RealmOperations` class
//! (`parsec/components/realm.py`): a thin layer over [`parsec_db::Datamodel`]
//! that enforces the role-transition authorization matrix and the P3/P10
//! invariants before persisting a certificate.

pub mod error;

use std::collections::BTreeMap;
use std::sync::Arc;

use parsec_certs::{
    require_strictly_greater, timestamps_in_the_ballpark, BallparkConfig, ClockScope,
    RealmKeyRotationCertificate, RealmRoleCertificate,
};
use parsec_db::model::{KeyRotationEntry, Realm, RealmUserRoleEntry};
use parsec_db::Datamodel;
use parsec_events::{Event, EventBus, EventPayload};
use parsec_types::{OrganizationId, RealmId, RealmRole, Timestamp, UserId, UserProfile};

pub use error::{RealmError, RealmResult};

pub struct RealmOps {
    db: Arc<dyn Datamodel>,
    events: EventBus,
    ballpark: BallparkConfig,
}

/// Everything the engine needs to know about the certificate's author,
/// gathered by the caller from the authenticated context plus a user lookup.
pub struct Author {
    pub user_id: UserId,
    pub profile: UserProfile,
}

impl RealmOps {
    pub fn new(db: Arc<dyn Datamodel>, events: EventBus) -> Self {
        Self::with_ballpark(db, events, BallparkConfig::default())
    }

    /// Same as [`RealmOps::new`], but with a caller-chosen ballpark window
    /// (spec.md §2 Configuration: ballpark offsets).
    pub fn with_ballpark(db: Arc<dyn Datamodel>, events: EventBus, ballpark: BallparkConfig) -> Self {
        Self { db, events, ballpark }
    }

    /// `realm_create`: the certificate must be a self-signed `Owner` grant.
    pub async fn realm_create(
        &self,
        org: &OrganizationId,
        author: &Author,
        realm_id: RealmId,
        certificate: RealmRoleCertificate,
        server_now: Timestamp,
    ) -> RealmResult<()> {
        if certificate.user_id != author.user_id || certificate.role != Some(RealmRole::Owner) {
            return Err(RealmError::InvalidCertificate);
        }
        if author.profile == UserProfile::Outsider {
            return Err(RealmError::AuthorNotAllowed);
        }

        let _lock = self.db.lock_topic(org, parsec_db::LockTopic::Realm(realm_id)).await?;

        if self.db.get_realm(org, &realm_id).await?.is_some() {
            return Err(RealmError::RealmAlreadyExists);
        }

        timestamps_in_the_ballpark(certificate.timestamp, server_now, &self.ballpark)?;
        let last_certificate_timestamp = self.db.get_last_certificate_timestamp(org).await?;
        require_strictly_greater(
            &ClockScope::Common { last_certificate_timestamp },
            certificate.timestamp,
        )?;

        let raw = rmp_serde::to_vec_named(&certificate).expect("certificate always serializes");
        self.db
            .insert_realm(
                org,
                Realm {
                    realm_id,
                    created_on: certificate.timestamp,
                    roles: vec![RealmUserRoleEntry {
                        user_id: certificate.user_id,
                        role: certificate.role,
                        certificate: raw,
                        granted_by: certificate.author.clone(),
                        timestamp: certificate.timestamp,
                    }],
                    key_rotations: vec![],
                    checkpoint: 0,
                    last_realm_certificate_timestamp: certificate.timestamp,
                    archived_on: None,
                    archiving_configured_by: None,
                },
            )
            .await?;
        self.db.bump_last_certificate_timestamp(org, certificate.timestamp).await?;

        self.publish_role_event(org, realm_id, certificate.timestamp, certificate.user_id, false)
            .await;
        Ok(())
    }

    /// `realm_share`: grant (or change) a role. `realm_unshare` is the same
    /// operation with `certificate.role == None`.
    pub async fn realm_share(
        &self,
        org: &OrganizationId,
        author: &Author,
        realm_id: RealmId,
        certificate: RealmRoleCertificate,
        recipient_current_profile: UserProfile,
        server_now: Timestamp,
    ) -> RealmResult<()> {
        let _lock = self.db.lock_topic(org, parsec_db::LockTopic::Realm(realm_id)).await?;

        if certificate.user_id == author.user_id {
            return Err(if certificate.role.is_none() {
                RealmError::CannotSelfUnshare
            } else {
                RealmError::CannotSelfShare
            });
        }

        let realm = self.db.get_realm(org, &realm_id).await?.ok_or(RealmError::RealmNotFound)?;

        let author_role = realm.current_role_for(author.user_id);
        authorize_role_change(author_role, certificate.role)?;

        if let Some(new_role) = certificate.role {
            if recipient_current_profile == UserProfile::Outsider
                && matches!(new_role, RealmRole::Manager | RealmRole::Owner)
            {
                return Err(RealmError::RoleIncompatibleWithOutsider);
            }
        }

        let current_role = realm.current_role_for(certificate.user_id);
        if certificate.role.is_none() && current_role.is_none() {
            return Err(RealmError::UserAlreadyUnshared);
        }
        if certificate.role == current_role {
            return Err(RealmError::RoleAlreadyGranted);
        }

        timestamps_in_the_ballpark(certificate.timestamp, server_now, &self.ballpark)?;
        let last_certificate_timestamp = self.db.get_last_certificate_timestamp(org).await?;
        require_strictly_greater(
            &ClockScope::Realm {
                last_certificate_timestamp,
                last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp,
            },
            certificate.timestamp,
        )?;

        let raw = rmp_serde::to_vec_named(&certificate).expect("certificate always serializes");
        self.db
            .append_realm_role(
                org,
                &realm_id,
                RealmUserRoleEntry {
                    user_id: certificate.user_id,
                    role: certificate.role,
                    certificate: raw,
                    granted_by: certificate.author.clone(),
                    timestamp: certificate.timestamp,
                },
            )
            .await?;
        self.db.bump_realm_certificate_timestamp(org, &realm_id, certificate.timestamp).await?;
        self.db.bump_last_certificate_timestamp(org, certificate.timestamp).await?;

        self.publish_role_event(
            org,
            realm_id,
            certificate.timestamp,
            certificate.user_id,
            certificate.role.is_none(),
        )
        .await;
        Ok(())
    }

    /// `realm_rotate_key`: issues `key_index = previous + 1`. The caller
    /// (the surface layer) is responsible for validating that
    /// `per_participant_keys_bundle_access` covers exactly
    /// `current_members()` before calling this; the engine re-checks the
    /// set for defense in depth.
    pub async fn realm_rotate_key(
        &self,
        org: &OrganizationId,
        author: &Author,
        realm_id: RealmId,
        certificate: RealmKeyRotationCertificate,
        per_participant_keys_bundle_access: &BTreeMap<UserId, Vec<u8>>,
        server_now: Timestamp,
    ) -> RealmResult<()> {
        let _lock = self.db.lock_topic(org, parsec_db::LockTopic::Realm(realm_id)).await?;

        let realm = self.db.get_realm(org, &realm_id).await?.ok_or(RealmError::RealmNotFound)?;

        if realm.archived_on.is_some() {
            return Err(RealmError::RealmArchived);
        }
        if realm.current_role_for(author.user_id) != Some(RealmRole::Owner) {
            return Err(RealmError::AuthorNotAllowedToGrant);
        }
        if certificate.key_index != realm.current_key_index() + 1 {
            return Err(RealmError::BadKeyIndex);
        }

        let members: std::collections::BTreeSet<UserId> = realm.current_members().into_iter().collect();
        let covered: std::collections::BTreeSet<UserId> =
            per_participant_keys_bundle_access.keys().copied().collect();
        if members != covered {
            return Err(RealmError::ParticipantMismatch);
        }

        timestamps_in_the_ballpark(certificate.timestamp, server_now, &self.ballpark)?;
        let last_certificate_timestamp = self.db.get_last_certificate_timestamp(org).await?;
        require_strictly_greater(
            &ClockScope::Realm {
                last_certificate_timestamp,
                last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp,
            },
            certificate.timestamp,
        )?;

        let raw = rmp_serde::to_vec_named(&certificate).expect("certificate always serializes");
        self.db
            .append_key_rotation(
                org,
                &realm_id,
                KeyRotationEntry { key_index: certificate.key_index, certificate: raw, timestamp: certificate.timestamp },
            )
            .await?;
        self.db.bump_realm_certificate_timestamp(org, &realm_id, certificate.timestamp).await?;
        self.db.bump_last_certificate_timestamp(org, certificate.timestamp).await?;
        Ok(())
    }

    /// `(blocks_size, vlobs_size)` summed across the realm.
    pub async fn realm_get_stats(
        &self,
        org: &OrganizationId,
        realm_id: RealmId,
    ) -> RealmResult<RealmStats> {
        self.db.get_realm(org, &realm_id).await?.ok_or(RealmError::RealmNotFound)?;
        let (blocks_size, vlobs_size) = self.db.get_realm_stats(org, &realm_id).await?;
        Ok(RealmStats { blocks_size, vlobs_size })
    }

    pub async fn get_current_realms_for_user(
        &self,
        org: &OrganizationId,
        user_id: UserId,
    ) -> RealmResult<BTreeMap<RealmId, RealmRole>> {
        let realms = self.db.list_realms(org).await?;
        Ok(realms
            .into_iter()
            .filter_map(|realm| realm.current_role_for(user_id).map(|role| (realm.realm_id, role)))
            .collect())
    }

    async fn publish_role_event(
        &self,
        org: &OrganizationId,
        realm_id: RealmId,
        timestamp: Timestamp,
        user_id: UserId,
        role_removed: bool,
    ) {
        self.events.publish(
            org,
            Event::new(
                org.clone(),
                EventPayload::RealmCertificate { realm_id, timestamp, user_id, role_removed },
            ),
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealmStats {
    pub blocks_size: u64,
    pub vlobs_size: u64,
}

/// P3: a `Manager`/`Owner` grant or revoke requires the author to currently
/// hold `Owner`; a `Reader`/`Contributor` change requires `Owner` or
/// `Manager`.
fn authorize_role_change(author_role: Option<RealmRole>, new_role: Option<RealmRole>) -> RealmResult<()> {
    let touches_high_role = matches!(new_role, Some(RealmRole::Manager) | Some(RealmRole::Owner));
    let author_is_owner = author_role == Some(RealmRole::Owner);
    let author_is_manager_or_owner = matches!(author_role, Some(RealmRole::Manager) | Some(RealmRole::Owner));

    let allowed = if touches_high_role { author_is_owner } else { author_is_manager_or_owner };
    if allowed {
        Ok(())
    } else {
        Err(RealmError::AuthorNotAllowedToGrant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_types::DeviceId;

    fn cert(user_id: UserId, role: Option<RealmRole>, author: DeviceId, ts: Timestamp) -> RealmRoleCertificate {
        RealmRoleCertificate { author, timestamp: ts, realm_id: RealmId::new(), user_id, role }
    }

    fn author(user_id: UserId, profile: UserProfile) -> Author {
        Author { user_id, profile }
    }

    async fn ops() -> (RealmOps, Arc<dyn Datamodel>) {
        let db: Arc<dyn Datamodel> = Arc::new(parsec_db::MemoryDatamodel::default());
        let events = EventBus::new();
        (RealmOps::new(db.clone(), events), db)
    }

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[tokio::test]
    async fn realm_create_accepts_self_owner_grant() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let certificate = RealmRoleCertificate {
            author: device,
            timestamp: ts(1_000_000),
            realm_id,
            user_id: owner,
            role: Some(RealmRole::Owner),
        };
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, certificate, ts(1_000_001))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn realm_create_rejects_outsider_profile() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let certificate = cert(owner, Some(RealmRole::Owner), device, ts(1_000_000));
        let err = ops
            .realm_create(&org, &author(owner, UserProfile::Outsider), realm_id, certificate, ts(1_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::AuthorNotAllowed);
    }

    #[tokio::test]
    async fn realm_create_rejects_duplicate() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let certificate1 = cert(owner, Some(RealmRole::Owner), device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, certificate1, ts(1_000_001))
            .await
            .unwrap();

        let certificate2 = cert(owner, Some(RealmRole::Owner), device, ts(2_000_000));
        let err = ops
            .realm_create(&org, &author(owner, UserProfile::Standard), realm_id, certificate2, ts(2_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::RealmAlreadyExists);
    }

    #[tokio::test]
    async fn realm_share_rejects_outsider_manager_grant() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let mallory = UserId::new();
        let share_cert = RealmRoleCertificate {
            author: device,
            timestamp: ts(2_000_000),
            realm_id,
            user_id: mallory,
            role: Some(RealmRole::Manager),
        };
        let err = ops
            .realm_share(&org, &author(owner, UserProfile::Standard), realm_id, share_cert, UserProfile::Outsider, ts(2_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::RoleIncompatibleWithOutsider);
    }

    #[tokio::test]
    async fn realm_share_rejects_manager_granting_owner() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let bob = UserId::new();
        let bob_device = DeviceId::new(bob, "dev1");
        let grant_manager = RealmRoleCertificate {
            author: owner_device,
            timestamp: ts(2_000_000),
            realm_id,
            user_id: bob,
            role: Some(RealmRole::Manager),
        };
        ops.realm_share(&org, &author(owner, UserProfile::Standard), realm_id, grant_manager, UserProfile::Standard, ts(2_000_001))
            .await
            .unwrap();

        let carol = UserId::new();
        let bob_grants_owner = RealmRoleCertificate {
            author: bob_device,
            timestamp: ts(3_000_000),
            realm_id,
            user_id: carol,
            role: Some(RealmRole::Owner),
        };
        let err = ops
            .realm_share(&org, &author(bob, UserProfile::Standard), realm_id, bob_grants_owner, UserProfile::Standard, ts(3_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::AuthorNotAllowedToGrant);
    }

    #[tokio::test]
    async fn realm_unshare_twice_rejects_second_attempt() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let bob = UserId::new();
        let grant = RealmRoleCertificate {
            author: owner_device.clone(),
            timestamp: ts(2_000_000),
            realm_id,
            user_id: bob,
            role: Some(RealmRole::Reader),
        };
        ops.realm_share(&org, &author(owner, UserProfile::Standard), realm_id, grant, UserProfile::Standard, ts(2_000_001))
            .await
            .unwrap();

        let unshare = RealmRoleCertificate {
            author: owner_device.clone(),
            timestamp: ts(3_000_000),
            realm_id,
            user_id: bob,
            role: None,
        };
        ops.realm_share(&org, &author(owner, UserProfile::Standard), realm_id, unshare, UserProfile::Standard, ts(3_000_001))
            .await
            .unwrap();

        let unshare_again = RealmRoleCertificate {
            author: owner_device,
            timestamp: ts(4_000_000),
            realm_id,
            user_id: bob,
            role: None,
        };
        let err = ops
            .realm_share(&org, &author(owner, UserProfile::Standard), realm_id, unshare_again, UserProfile::Standard, ts(4_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::UserAlreadyUnshared);
    }

    #[tokio::test]
    async fn realm_rotate_key_requires_owner_and_increments_index() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let mut access = BTreeMap::new();
        access.insert(owner, vec![1, 2, 3]);
        let rotate = RealmKeyRotationCertificate {
            author: owner_device,
            timestamp: ts(2_000_000),
            realm_id,
            key_index: 1,
        };
        ops.realm_rotate_key(&org, &author(owner, UserProfile::Standard), realm_id, rotate, &access, ts(2_000_001))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_current_realms_for_user_reports_current_roles() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device, ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let realms = ops.get_current_realms_for_user(&org, owner).await.unwrap();
        assert_eq!(realms.get(&realm_id), Some(&RealmRole::Owner));
    }

    #[tokio::test]
    async fn realm_share_rejects_self_share() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let self_grant = RealmRoleCertificate {
            author: owner_device,
            timestamp: ts(2_000_000),
            realm_id,
            user_id: owner,
            role: Some(RealmRole::Manager),
        };
        let err = ops
            .realm_share(&org, &author(owner, UserProfile::Standard), realm_id, self_grant, UserProfile::Standard, ts(2_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::CannotSelfShare);
    }

    #[tokio::test]
    async fn realm_share_rejects_self_unshare() {
        let (ops, _db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        let self_unshare = RealmRoleCertificate {
            author: owner_device,
            timestamp: ts(2_000_000),
            realm_id,
            user_id: owner,
            role: None,
        };
        let err = ops
            .realm_share(&org, &author(owner, UserProfile::Standard), realm_id, self_unshare, UserProfile::Standard, ts(2_000_001))
            .await
            .unwrap_err();
        assert_eq!(err, RealmError::CannotSelfUnshare);
    }

    #[tokio::test]
    async fn realm_get_stats_sums_blocks_and_vlobs_in_the_realm() {
        let (ops, db) = ops().await;
        let org = OrganizationId::parse("Acme").unwrap();
        let owner = UserId::new();
        let owner_device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        let create_cert = cert(owner, Some(RealmRole::Owner), owner_device.clone(), ts(1_000_000));
        ops.realm_create(&org, &author(owner, UserProfile::Standard), realm_id, create_cert, ts(1_000_001))
            .await
            .unwrap();

        db.insert_vlob(
            &org,
            parsec_db::model::Vlob {
                vlob_id: parsec_types::VlobId::new(),
                realm_id,
                versions: vec![parsec_db::model::VlobVersion {
                    version: 1,
                    blob: vec![0u8; 10],
                    author: owner_device.clone(),
                    timestamp: ts(2_000_000),
                    key_index: 0,
                    sequester_blob: None,
                }],
            },
        )
        .await
        .unwrap();
        db.insert_block(
            &org,
            parsec_db::model::Block {
                block_id: parsec_types::VlobId::new(),
                realm_id,
                key_index: 0,
                size: 42,
                author: owner_device,
            },
        )
        .await
        .unwrap();

        let stats = ops.realm_get_stats(&org, realm_id).await.unwrap();
        assert_eq!(stats.blocks_size, 42);
        assert_eq!(stats.vlobs_size, 10);
    }
}
