//! Shared application state (spec.md §4.9).
//!
//! One `AppState` per process, built once by `services/parsec-server` and
//! handed to every handler via axum's `State` extractor.

use std::sync::Arc;

use parsec_certs::BallparkConfig;
use parsec_db::{Blockstore, Datamodel};
use parsec_events::EventBus;
use parsec_invite::InviteOps;
use parsec_realm::RealmOps;
use parsec_vlob::VlobOps;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Datamodel>,
    pub events: EventBus,
    pub realm: Arc<RealmOps>,
    pub vlob: Arc<VlobOps>,
    pub invite: Arc<InviteOps>,
    pub ballpark: BallparkConfig,
}

impl AppState {
    pub fn new(db: Arc<dyn Datamodel>, blockstore: Arc<dyn Blockstore>, events: EventBus) -> Self {
        Self::with_ballpark(db, blockstore, events, BallparkConfig::default())
    }

    /// Same as [`AppState::new`], but with a caller-chosen ballpark window,
    /// threaded through every engine plus `organization_bootstrap` (spec.md
    /// §2 Configuration: ballpark offsets).
    pub fn with_ballpark(
        db: Arc<dyn Datamodel>,
        blockstore: Arc<dyn Blockstore>,
        events: EventBus,
        ballpark: BallparkConfig,
    ) -> Self {
        let realm = Arc::new(RealmOps::with_ballpark(db.clone(), events.clone(), ballpark.clone()));
        let vlob = Arc::new(VlobOps::with_ballpark(db.clone(), blockstore, events.clone(), ballpark.clone()));
        let invite = Arc::new(InviteOps::new(db.clone(), events.clone()));
        Self { db, events, realm, vlob, invite, ballpark }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        let db: Arc<dyn Datamodel> = Arc::new(parsec_db::MemoryDatamodel::default());
        let blockstore: Arc<dyn Blockstore> = Arc::new(parsec_db::MemoryBlockstore::new());
        Self::new(db, blockstore, EventBus::new())
    }
}
