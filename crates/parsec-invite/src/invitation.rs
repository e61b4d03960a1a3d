//! Invitation lifecycle: `new_for_user`, `new_for_device`, `cancel`, `list`,
//! `info_as_invited`, and the `conduit_exchange` entry point that layers
//! invitation-status bookkeeping on top of [`crate::conduit::ConduitRegistry`].
//!
//! Mirrors `BaseInviteComponent` (`parsec/components/invite.py`): the
//! `(new_for_user|new_for_device|cancel|list|info_as_invited)` signatures come
//! straight from there, re-expressed against [`parsec_db::Datamodel`] instead
//! of the original's own in-process dataclasses.

use std::sync::Arc;

use parsec_db::model::Invitation;
use parsec_db::Datamodel;
use parsec_events::{Event, EventBus, EventPayload};
use parsec_types::{
    ConduitState, DeviceId, InvitationStatus, InvitationToken, InvitationType, OrganizationId,
    Timestamp, UserId, UserProfile,
};

use crate::conduit::ConduitRegistry;
use crate::error::{InviteError, InviteResult};

pub struct InviteOps {
    db: Arc<dyn Datamodel>,
    events: EventBus,
    conduit: Arc<ConduitRegistry>,
}

/// The pre-resolved identity of the authenticated caller, gathered by the
/// surface layer from the authenticated context plus a user lookup.
pub struct Author {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub profile: UserProfile,
}

impl InviteOps {
    pub fn new(db: Arc<dyn Datamodel>, events: EventBus) -> Self {
        Self { db, events, conduit: Arc::new(ConduitRegistry::new()) }
    }

    /// Invite a new user by email. Only `Admin` authors may do this.
    /// Re-inviting an email with an already-pending invitation is idempotent:
    /// the existing token is returned rather than creating a duplicate.
    pub async fn new_for_user(
        &self,
        org: &OrganizationId,
        author: &Author,
        claimer_email: &str,
        now: Timestamp,
    ) -> InviteResult<InvitationToken> {
        if author.profile != UserProfile::Admin {
            return Err(InviteError::AuthorNotAllowed);
        }
        if self.db.find_user_by_email(org, claimer_email).await?.is_some_and(|u| !u.is_revoked()) {
            return Err(InviteError::ClaimerEmailAlreadyEnrolled);
        }
        if let Some(existing) = self.db.find_pending_user_invitation(org, claimer_email).await? {
            return Ok(existing.token);
        }

        let token = InvitationToken::new();
        self.db
            .insert_invitation(
                org,
                Invitation {
                    token,
                    invitation_type: InvitationType::User,
                    created_by_device_id: author.device_id.clone(),
                    created_on: now,
                    claimer_email: Some(claimer_email.to_string()),
                    claimer_user_id: None,
                    status: InvitationStatus::Pending,
                },
            )
            .await?;
        self.publish_status(org, token, author.user_id, InvitationStatus::Pending);
        Ok(token)
    }

    /// Invite a new device for the author's own user. Any authenticated user
    /// may enroll an additional device for themselves; re-issuing while a
    /// pending device invitation already exists returns that token instead of
    /// creating a duplicate.
    pub async fn new_for_device(
        &self,
        org: &OrganizationId,
        author: &Author,
        now: Timestamp,
    ) -> InviteResult<InvitationToken> {
        let pending_own_device = self
            .db
            .list_invitations(org)
            .await?
            .into_iter()
            .find(|i| {
                i.invitation_type == InvitationType::Device
                    && i.status == InvitationStatus::Pending
                    && i.claimer_user_id == Some(author.user_id)
            });
        if let Some(existing) = pending_own_device {
            return Ok(existing.token);
        }

        let token = InvitationToken::new();
        self.db
            .insert_invitation(
                org,
                Invitation {
                    token,
                    invitation_type: InvitationType::Device,
                    created_by_device_id: author.device_id.clone(),
                    created_on: now,
                    claimer_email: None,
                    claimer_user_id: Some(author.user_id),
                    status: InvitationStatus::Pending,
                },
            )
            .await?;
        self.publish_status(org, token, author.user_id, InvitationStatus::Pending);
        Ok(token)
    }

    pub async fn cancel(&self, org: &OrganizationId, author: &Author, token: InvitationToken) -> InviteResult<()> {
        let invitation = self.fetch(org, token).await?;
        if matches!(invitation.status, InvitationStatus::Cancelled | InvitationStatus::Finished) {
            return Err(InviteError::InvitationAlreadyDeleted);
        }

        self.db.set_invitation_status(org, &token, InvitationStatus::Cancelled).await?;
        self.conduit.cancel(org, token);
        self.publish_status(org, token, author.user_id, InvitationStatus::Cancelled);
        Ok(())
    }

    pub async fn list(&self, org: &OrganizationId) -> InviteResult<Vec<Invitation>> {
        Ok(self.db.list_invitations(org).await?)
    }

    /// Whether the claimer is currently connected and parked at phase 1,
    /// per the in-memory, best-effort liveness signal.
    pub fn is_claimer_ready(&self, org: &OrganizationId, token: InvitationToken) -> bool {
        self.conduit.is_claimer_ready(org, token)
    }

    pub async fn info_as_invited(&self, org: &OrganizationId, token: InvitationToken) -> InviteResult<Invitation> {
        let invitation = self.fetch(org, token).await?;
        if invitation.status == InvitationStatus::Cancelled {
            return Err(InviteError::InvitationDeleted);
        }
        Ok(invitation)
    }

    /// The `conduit_exchange` rendezvous, layering invitation-status checks
    /// and the terminal `Finished` transition on top of the mechanical
    /// [`ConduitRegistry`].
    pub async fn conduit_exchange(
        &self,
        org: &OrganizationId,
        greeter: Option<UserId>,
        token: InvitationToken,
        state: ConduitState,
        payload: Vec<u8>,
        last: bool,
    ) -> InviteResult<(Vec<u8>, bool)> {
        let invitation = self.fetch(org, token).await?;
        match invitation.status {
            InvitationStatus::Cancelled => return Err(InviteError::InvitationDeleted),
            InvitationStatus::Finished => return Err(InviteError::InvitationAlreadyUsed),
            InvitationStatus::Pending | InvitationStatus::Ready => {}
        }

        let outcome = self.conduit.exchange(org, greeter, token, state, payload, last).await?;
        if state == ConduitState::State4Communicate && outcome.1 {
            self.db.set_invitation_status(org, &token, InvitationStatus::Finished).await?;
            self.publish_status(org, token, invitation.created_by_device_id.user_id, InvitationStatus::Finished);
        }
        Ok(outcome)
    }

    async fn fetch(&self, org: &OrganizationId, token: InvitationToken) -> InviteResult<Invitation> {
        self.db.get_invitation(org, &token).await?.ok_or(InviteError::InvitationNotFound)
    }

    fn publish_status(&self, org: &OrganizationId, token: InvitationToken, greeter: UserId, status: InvitationStatus) {
        self.events.publish(org, Event::new(org.clone(), EventPayload::Invitation { token, greeter, status }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_db::model::{HumanHandle, User};
    use parsec_db::MemoryDatamodel;

    fn org() -> OrganizationId {
        OrganizationId::parse("Acme").unwrap()
    }

    fn admin() -> Author {
        let user_id = UserId::new();
        Author { user_id, device_id: DeviceId::new(user_id, "dev1"), profile: UserProfile::Admin }
    }

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    async fn ops() -> (InviteOps, Arc<dyn Datamodel>) {
        let db: Arc<dyn Datamodel> = Arc::new(MemoryDatamodel::default());
        (InviteOps::new(db.clone(), EventBus::new()), db)
    }

    #[tokio::test]
    async fn standard_profile_cannot_invite_a_new_user() {
        let (ops, _db) = ops().await;
        let mut author = admin();
        author.profile = UserProfile::Standard;
        let err = ops.new_for_user(&org(), &author, "alice@example.com", ts(1)).await.unwrap_err();
        assert_eq!(err, InviteError::AuthorNotAllowed);
    }

    #[tokio::test]
    async fn reinviting_the_same_pending_email_is_idempotent() {
        let (ops, _db) = ops().await;
        let author = admin();
        let first = ops.new_for_user(&org(), &author, "alice@example.com", ts(1)).await.unwrap();
        let second = ops.new_for_user(&org(), &author, "alice@example.com", ts(2)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn inviting_an_existing_members_email_is_rejected() {
        let (ops, db) = ops().await;
        let author = admin();
        let existing = UserId::new();
        db.insert_user(
            &org(),
            User {
                user_id: existing,
                human_handle: HumanHandle { email: "bob@example.com".into(), label: "Bob".into() },
                initial_profile: UserProfile::Standard,
                profile_updates: vec![],
                created_on: ts(0),
                revoked_on: None,
                frozen: false,
            },
        )
        .await
        .unwrap();

        let err = ops.new_for_user(&org(), &author, "bob@example.com", ts(1)).await.unwrap_err();
        assert_eq!(err, InviteError::ClaimerEmailAlreadyEnrolled);
    }

    #[tokio::test]
    async fn cancelling_twice_fails_the_second_time() {
        let (ops, _db) = ops().await;
        let author = admin();
        let token = ops.new_for_user(&org(), &author, "alice@example.com", ts(1)).await.unwrap();
        ops.cancel(&org(), &author, token).await.unwrap();
        let err = ops.cancel(&org(), &author, token).await.unwrap_err();
        assert_eq!(err, InviteError::InvitationAlreadyDeleted);
    }

    #[tokio::test]
    async fn conduit_exchange_on_a_cancelled_invitation_is_rejected() {
        let (ops, _db) = ops().await;
        let author = admin();
        let token = ops.new_for_user(&org(), &author, "alice@example.com", ts(1)).await.unwrap();
        ops.cancel(&org(), &author, token).await.unwrap();

        let err = ops
            .conduit_exchange(&org(), None, token, ConduitState::State1WaitPeers, b"hi".to_vec(), false)
            .await
            .unwrap_err();
        assert_eq!(err, InviteError::InvitationDeleted);
    }

    #[tokio::test]
    async fn completing_the_final_phase_marks_the_invitation_finished() {
        let (ops, db) = ops().await;
        let author = admin();
        let greeter = author.user_id;
        let token = ops.new_for_user(&org(), &author, "alice@example.com", ts(1)).await.unwrap();

        // Drive both peers through phases 1 through 3.2 in lockstep.
        for phase in [
            ConduitState::State1WaitPeers,
            ConduitState::State21ClaimerHashedNonce,
            ConduitState::State22GreeterNonce,
            ConduitState::State23ClaimerNonce,
            ConduitState::State31ClaimerTrust,
            ConduitState::State32GreeterTrust,
        ] {
            let (c, g) = tokio::join!(
                ops.conduit_exchange(&org(), None, token, phase, b"c".to_vec(), false),
                ops.conduit_exchange(&org(), Some(greeter), token, phase, b"g".to_vec(), false),
            );
            c.unwrap();
            g.unwrap();
        }

        let (claimer_result, greeter_result) = tokio::join!(
            ops.conduit_exchange(&org(), None, token, ConduitState::State4Communicate, b"cya".to_vec(), false),
            ops.conduit_exchange(&org(), Some(greeter), token, ConduitState::State4Communicate, b"bye".to_vec(), true),
        );

        assert!(claimer_result.unwrap().1);
        assert!(greeter_result.unwrap().1);
        let invitation = db.get_invitation(&org(), &token).await.unwrap().unwrap();
        assert_eq!(invitation.status, InvitationStatus::Finished);
    }
}
