//! Vlob & block engine (spec.md §4.5, §4.8).
//!
//! Mirrors the original implementation's `VlobOperations`/`BlockOperations`
//! classes (`parsec/components/vlob.py`, `block.py`): authorization against
//! the realm's current role, causal-clock enforcement, the sequester
//! pipeline, and change-notification via the event bus.

pub mod error;
pub mod sequester;

use std::collections::BTreeMap;
use std::sync::Arc;

use parsec_certs::{require_strictly_greater, timestamps_in_the_ballpark, BallparkConfig, ClockScope};
use parsec_db::model::{Block, Vlob, VlobVersion};
use parsec_db::{Blockstore, Datamodel};
use parsec_events::{event::vlob_event_payload, Event, EventBus, EVENT_VLOB_MAX_BLOB_SIZE};
use parsec_types::{DeviceId, OrganizationId, RealmId, SequesterServiceId, Timestamp, VlobId};

pub use error::{VlobError, VlobResult};

/// Maximum number of ids a single `vlob_read_as_user` batch may request.
pub const MAX_BATCH_SIZE: usize = 1000;

pub struct VlobOps {
    db: Arc<dyn Datamodel>,
    blockstore: Arc<dyn Blockstore>,
    events: EventBus,
    http_client: reqwest::Client,
    ballpark: BallparkConfig,
}

/// The write author, as resolved by the caller from the realm/role engine.
pub struct Author {
    pub device_id: DeviceId,
    pub role: Option<parsec_types::RealmRole>,
}

impl VlobOps {
    pub fn new(db: Arc<dyn Datamodel>, blockstore: Arc<dyn Blockstore>, events: EventBus) -> Self {
        Self::with_ballpark(db, blockstore, events, BallparkConfig::default())
    }

    /// Same as [`VlobOps::new`], but with a caller-chosen ballpark window
    /// (spec.md §2 Configuration: ballpark offsets).
    pub fn with_ballpark(
        db: Arc<dyn Datamodel>,
        blockstore: Arc<dyn Blockstore>,
        events: EventBus,
        ballpark: BallparkConfig,
    ) -> Self {
        Self { db, blockstore, events, http_client: reqwest::Client::new(), ballpark }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn vlob_create(
        &self,
        org: &OrganizationId,
        author: &Author,
        realm_id: RealmId,
        vlob_id: VlobId,
        key_index: u32,
        timestamp: Timestamp,
        blob: Vec<u8>,
        sequester_blob: Option<BTreeMap<SequesterServiceId, Vec<u8>>>,
        server_now: Timestamp,
    ) -> VlobResult<()> {
        require_writer(author.role)?;

        let _lock = self.db.lock_topic(org, parsec_db::LockTopic::Realm(realm_id)).await?;

        let realm = self.db.get_realm(org, &realm_id).await?.ok_or(VlobError::RealmNotFound)?;
        if self.db.get_vlob(org, &vlob_id).await?.is_some() {
            return Err(VlobError::VlobAlreadyExists);
        }
        if key_index != realm.current_key_index() {
            return Err(VlobError::BadKeyIndex);
        }

        timestamps_in_the_ballpark(timestamp, server_now, &self.ballpark)?;
        let last_certificate_timestamp = self.db.get_last_certificate_timestamp(org).await?;
        require_strictly_greater(
            &ClockScope::Realm {
                last_certificate_timestamp,
                last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp,
            },
            timestamp,
        )?;

        self.run_sequester_pipeline_if_needed(org, &sequester_blob).await?;

        let checkpoint = self
            .db
            .insert_vlob(
                org,
                Vlob {
                    vlob_id,
                    realm_id,
                    versions: vec![VlobVersion {
                        version: 1,
                        blob: blob.clone(),
                        author: author.device_id.clone(),
                        timestamp,
                        key_index,
                        sequester_blob,
                    }],
                },
            )
            .await?;
        self.db.bump_realm_certificate_timestamp(org, &realm_id, timestamp).await?;

        self.publish_vlob_event(org, realm_id, vlob_id, 1, author.device_id.clone(), timestamp, blob, checkpoint)
            .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn vlob_update(
        &self,
        org: &OrganizationId,
        author: &Author,
        vlob_id: VlobId,
        version: u32,
        timestamp: Timestamp,
        blob: Vec<u8>,
        sequester_blob: Option<BTreeMap<SequesterServiceId, Vec<u8>>>,
        server_now: Timestamp,
    ) -> VlobResult<()> {
        require_writer(author.role)?;

        let existing = self.db.get_vlob(org, &vlob_id).await?.ok_or(VlobError::VlobNotFound)?;
        let realm_id = existing.realm_id;

        let _lock = self.db.lock_topic(org, parsec_db::LockTopic::Realm(realm_id)).await?;

        let realm = self.db.get_realm(org, &realm_id).await?.ok_or(VlobError::RealmNotFound)?;
        let latest = existing.latest();
        if version != latest.version + 1 {
            return Err(VlobError::BadVlobVersion);
        }
        let key_index = latest.key_index.max(realm.current_key_index());
        if key_index != realm.current_key_index() {
            return Err(VlobError::BadKeyIndex);
        }

        timestamps_in_the_ballpark(timestamp, server_now, &self.ballpark)?;
        let last_certificate_timestamp = self.db.get_last_certificate_timestamp(org).await?;
        require_strictly_greater(
            &ClockScope::Realm {
                last_certificate_timestamp,
                last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp,
            },
            timestamp,
        )?;

        self.run_sequester_pipeline_if_needed(org, &sequester_blob).await?;

        let checkpoint = self
            .db
            .append_vlob_version(
                org,
                &vlob_id,
                VlobVersion {
                    version,
                    blob: blob.clone(),
                    author: author.device_id.clone(),
                    timestamp,
                    key_index: realm.current_key_index(),
                    sequester_blob,
                },
            )
            .await?;
        self.db.bump_realm_certificate_timestamp(org, &realm_id, timestamp).await?;

        self.publish_vlob_event(org, realm_id, vlob_id, version, author.device_id.clone(), timestamp, blob, checkpoint)
            .await;
        Ok(())
    }

    /// `vlob_read_as_user`: latest version of every requested id, batched.
    pub async fn vlob_read_as_user(
        &self,
        org: &OrganizationId,
        vlob_ids: &[VlobId],
    ) -> VlobResult<Vec<(VlobId, VlobVersion)>> {
        if vlob_ids.len() > MAX_BATCH_SIZE {
            return Err(VlobError::TooManyElements);
        }
        let mut out = Vec::with_capacity(vlob_ids.len());
        for vlob_id in vlob_ids {
            if let Some(vlob) = self.db.get_vlob(org, vlob_id).await? {
                out.push((*vlob_id, vlob.latest().clone()));
            }
        }
        Ok(out)
    }

    pub async fn vlob_poll_changes_as_user(
        &self,
        org: &OrganizationId,
        realm_id: RealmId,
        last_checkpoint: u64,
    ) -> VlobResult<(u64, Vec<(VlobId, u32)>)> {
        Ok(self.db.poll_vlob_changes(org, &realm_id, last_checkpoint).await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn block_create(
        &self,
        org: &OrganizationId,
        author: &Author,
        realm_id: RealmId,
        block_id: VlobId,
        key_index: u32,
        payload: Vec<u8>,
        timestamp: Timestamp,
        server_now: Timestamp,
    ) -> VlobResult<()> {
        require_writer(author.role)?;

        let _lock = self.db.lock_topic(org, parsec_db::LockTopic::Realm(realm_id)).await?;

        let realm = self.db.get_realm(org, &realm_id).await?.ok_or(VlobError::RealmNotFound)?;
        if key_index != realm.current_key_index() {
            return Err(VlobError::BadKeyIndex);
        }

        timestamps_in_the_ballpark(timestamp, server_now, &self.ballpark)?;
        let last_certificate_timestamp = self.db.get_last_certificate_timestamp(org).await?;
        require_strictly_greater(
            &ClockScope::Realm {
                last_certificate_timestamp,
                last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp,
            },
            timestamp,
        )?;

        self.blockstore
            .create(org, &block_id, payload.clone())
            .await
            .map_err(|e| {
                tracing::error!(%block_id, error = %e, "blockstore write failed");
                VlobError::StoreUnavailable
            })?;

        self.db
            .insert_block(
                org,
                Block {
                    block_id,
                    realm_id,
                    key_index,
                    size: payload.len() as u64,
                    author: author.device_id.clone(),
                },
            )
            .await?;
        self.db.bump_realm_certificate_timestamp(org, &realm_id, timestamp).await?;
        Ok(())
    }

    /// Returns `(payload, key_index, needed_realm_certificate_timestamp)`.
    pub async fn block_read(
        &self,
        org: &OrganizationId,
        realm_id: RealmId,
        block_id: VlobId,
    ) -> VlobResult<(Vec<u8>, u32, Timestamp)> {
        let realm = self.db.get_realm(org, &realm_id).await?.ok_or(VlobError::RealmNotFound)?;
        let block = self.db.get_block(org, &block_id).await?.ok_or(VlobError::BlockNotFound)?;

        let payload = self.blockstore.read(org, &block_id).await.map_err(|e| {
            tracing::error!(%block_id, error = %e, "blockstore read failed");
            VlobError::StoreUnavailable
        })?;

        Ok((payload, block.key_index, realm.last_realm_certificate_timestamp))
    }

    async fn run_sequester_pipeline_if_needed(
        &self,
        org: &OrganizationId,
        sequester_blob: &Option<BTreeMap<SequesterServiceId, Vec<u8>>>,
    ) -> VlobResult<()> {
        let services = self.db.get_sequester_services(org).await?;
        let active: Vec<_> = services.into_iter().filter(|s| s.is_active()).collect();

        match (active.is_empty(), sequester_blob) {
            (true, None) => Ok(()),
            (true, Some(_)) => Err(VlobError::OrganizationNotSequestered),
            (false, None) => Err(VlobError::SequesterInconsistency),
            (false, Some(blob)) => {
                sequester::run_sequester_pipeline(&self.http_client, org, &active, blob).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_vlob_event(
        &self,
        org: &OrganizationId,
        realm_id: RealmId,
        vlob_id: VlobId,
        version: u32,
        author: DeviceId,
        timestamp: Timestamp,
        blob: Vec<u8>,
        realm_checkpoint: u64,
    ) {
        let _ = realm_checkpoint;
        let last_certificate_timestamp =
            self.db.get_last_certificate_timestamp(org).await.ok().flatten().unwrap_or(timestamp);
        let payload = vlob_event_payload(
            realm_id,
            vlob_id,
            version,
            author,
            timestamp,
            blob,
            last_certificate_timestamp,
            timestamp,
            EVENT_VLOB_MAX_BLOB_SIZE,
        );
        self.events.publish(org, Event::new(org.clone(), payload));
    }
}

fn require_writer(role: Option<parsec_types::RealmRole>) -> VlobResult<()> {
    match role {
        Some(role) if role.can_write() => Ok(()),
        _ => Err(VlobError::AuthorNotAllowed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_db::{MemoryBlockstore, MemoryDatamodel};
    use parsec_types::{RealmRole, UserId};

    fn org() -> OrganizationId {
        OrganizationId::parse("Acme").unwrap()
    }

    async fn setup() -> (VlobOps, Arc<dyn Datamodel>, RealmId, DeviceId) {
        let db: Arc<dyn Datamodel> = Arc::new(MemoryDatamodel::default());
        let blockstore: Arc<dyn Blockstore> = Arc::new(MemoryBlockstore::new());
        let events = EventBus::new();
        let org = org();
        let owner = UserId::new();
        let device = DeviceId::new(owner, "dev1");
        let realm_id = RealmId::new();
        db.insert_realm(
            &org,
            parsec_db::model::Realm {
                realm_id,
                created_on: Timestamp::from_micros(1),
                roles: vec![parsec_db::model::RealmUserRoleEntry {
                    user_id: owner,
                    role: Some(RealmRole::Owner),
                    certificate: vec![],
                    granted_by: device.clone(),
                    timestamp: Timestamp::from_micros(1),
                }],
                key_rotations: vec![],
                checkpoint: 0,
                last_realm_certificate_timestamp: Timestamp::from_micros(1),
                archived_on: None,
                archiving_configured_by: None,
            },
        )
        .await
        .unwrap();
        (VlobOps::new(db.clone(), blockstore, events), db, realm_id, device)
    }

    #[tokio::test]
    async fn vlob_create_then_update_advances_checkpoint() {
        let (ops, db, realm_id, device) = setup().await;
        let org = org();
        let author = Author { device_id: device.clone(), role: Some(RealmRole::Owner) };
        let vlob_id = VlobId::new();

        ops.vlob_create(&org, &author, realm_id, vlob_id, 0, Timestamp::from_micros(2), b"v1".to_vec(), None, Timestamp::from_micros(3))
            .await
            .unwrap();
        ops.vlob_update(&org, &author, vlob_id, 2, Timestamp::from_micros(4), b"v2".to_vec(), None, Timestamp::from_micros(5))
            .await
            .unwrap();

        let (checkpoint, changes) = ops.vlob_poll_changes_as_user(&org, realm_id, 0).await.unwrap();
        assert_eq!(checkpoint, 2);
        assert_eq!(changes, vec![(vlob_id, 2)]);
        let _ = db;
    }

    #[tokio::test]
    async fn reader_cannot_create_vlob() {
        let (ops, _db, realm_id, device) = setup().await;
        let org = org();
        let author = Author { device_id: device, role: Some(RealmRole::Reader) };
        let err = ops
            .vlob_create(&org, &author, realm_id, VlobId::new(), 0, Timestamp::from_micros(2), b"v1".to_vec(), None, Timestamp::from_micros(3))
            .await
            .unwrap_err();
        assert_eq!(err, VlobError::AuthorNotAllowed);
    }

    #[tokio::test]
    async fn vlob_update_rejects_wrong_version() {
        let (ops, _db, realm_id, device) = setup().await;
        let org = org();
        let author = Author { device_id: device, role: Some(RealmRole::Owner) };
        let vlob_id = VlobId::new();
        ops.vlob_create(&org, &author, realm_id, vlob_id, 0, Timestamp::from_micros(2), b"v1".to_vec(), None, Timestamp::from_micros(3))
            .await
            .unwrap();

        let err = ops
            .vlob_update(&org, &author, vlob_id, 5, Timestamp::from_micros(4), b"v2".to_vec(), None, Timestamp::from_micros(5))
            .await
            .unwrap_err();
        assert_eq!(err, VlobError::BadVlobVersion);
    }

    #[tokio::test]
    async fn vlob_read_as_user_caps_batch_size() {
        let (ops, _db, _realm_id, _device) = setup().await;
        let org = org();
        let ids: Vec<VlobId> = (0..MAX_BATCH_SIZE + 1).map(|_| VlobId::new()).collect();
        let err = ops.vlob_read_as_user(&org, &ids).await.unwrap_err();
        assert_eq!(err, VlobError::TooManyElements);
    }

    #[tokio::test]
    async fn vlob_create_without_sequester_blob_in_sequestered_org_fails() {
        let (ops, db, realm_id, device) = setup().await;
        let org = org();
        db.insert_sequester_service(
            &org,
            parsec_db::model::SequesterService {
                service_id: parsec_types::SequesterServiceId::new(),
                service_type: parsec_types::SequesterServiceType::Storage,
                certificate: vec![],
                created_on: Timestamp::from_micros(1),
                disabled_on: None,
                webhook_url: None,
            },
        )
        .await
        .unwrap();

        let author = Author { device_id: device, role: Some(RealmRole::Owner) };
        let err = ops
            .vlob_create(&org, &author, realm_id, VlobId::new(), 0, Timestamp::from_micros(2), b"v1".to_vec(), None, Timestamp::from_micros(3))
            .await
            .unwrap_err();
        assert_eq!(err, VlobError::OrganizationNotSequestered);
    }

    #[tokio::test]
    async fn block_create_then_read_round_trips() {
        let (ops, _db, realm_id, device) = setup().await;
        let org = org();
        let author = Author { device_id: device, role: Some(RealmRole::Owner) };
        let block_id = VlobId::new();
        ops.block_create(
            &org,
            &author,
            realm_id,
            block_id,
            0,
            b"payload".to_vec(),
            Timestamp::from_micros(2),
            Timestamp::from_micros(3),
        )
        .await
        .unwrap();

        let (payload, key_index, _ts) = ops.block_read(&org, realm_id, block_id).await.unwrap();
        assert_eq!(payload, b"payload");
        assert_eq!(key_index, 0);
    }

    #[tokio::test]
    async fn block_create_advances_realm_certificate_timestamp() {
        let (ops, db, realm_id, device) = setup().await;
        let org = org();
        let author = Author { device_id: device, role: Some(RealmRole::Owner) };
        ops.block_create(
            &org,
            &author,
            realm_id,
            VlobId::new(),
            0,
            b"payload".to_vec(),
            Timestamp::from_micros(2),
            Timestamp::from_micros(3),
        )
        .await
        .unwrap();

        let realm = db.get_realm(&org, &realm_id).await.unwrap().unwrap();
        assert_eq!(realm.last_realm_certificate_timestamp, Timestamp::from_micros(2));
    }

    #[tokio::test]
    async fn block_read_reports_missing_block() {
        let (ops, _db, realm_id, _device) = setup().await;
        let org = org();
        let err = ops.block_read(&org, realm_id, VlobId::new()).await.unwrap_err();
        assert_eq!(err, VlobError::BlockNotFound);
    }
}
