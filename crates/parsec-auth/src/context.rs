//! Client contexts and the request-authentication pipeline (spec.md §4.2).
//!
//! A context is built once per request, before the handler runs. Building it
//! is the only place engines need to distrust the network: once a context
//! exists, its fields are load-bearing truth for the rest of the request.

use std::sync::Arc;

use parsec_db::Datamodel;
use parsec_types::{DeviceId, InvitationStatus, InvitationToken, InvitationType, OrganizationId, UserProfile};

use crate::error::{AuthError, AuthResult};

/// Unauthenticated: only organization bootstrap and PKI enrollment submit
/// are reachable through this context.
#[derive(Debug, Clone)]
pub struct AnonymousClientContext {
    pub organization_id: OrganizationId,
}

/// Authenticated by an `Invitation-Token` header matching a non-terminal
/// invitation. Only the `invite_*_claimer_*` family and `invite_info` are
/// reachable through this context.
#[derive(Debug, Clone)]
pub struct InvitedClientContext {
    pub organization_id: OrganizationId,
    pub token: InvitationToken,
    pub invitation_type: InvitationType,
}

/// Authenticated by a device signature over the request body.
#[derive(Debug, Clone)]
pub struct AuthenticatedClientContext {
    pub organization_id: OrganizationId,
    pub user_id: parsec_types::UserId,
    pub device_id: DeviceId,
    pub device_verify_key: parsec_crypto::VerifyKey,
    pub profile: UserProfile,
}

/// Raw material extracted from an authenticated request's headers, before
/// any lookup happens.
pub struct AuthenticatedRequest<'a> {
    pub device_id: DeviceId,
    pub signature: &'a [u8],
    pub body: &'a [u8],
}

/// Build an [`AnonymousClientContext`], checking only that the organization
/// exists and has not expired.
pub async fn anonymous_context(
    db: &Arc<dyn Datamodel>,
    org: &OrganizationId,
) -> AuthResult<AnonymousClientContext> {
    let organization = organization_not_found_abort(db, org).await?;
    organization_expired_abort(&organization)?;
    Ok(AnonymousClientContext { organization_id: org.clone() })
}

/// Build an [`InvitedClientContext`]: the token must resolve to a
/// non-terminal (`Pending` or `Ready`) invitation.
pub async fn invited_context(
    db: &Arc<dyn Datamodel>,
    org: &OrganizationId,
    token: &InvitationToken,
) -> AuthResult<InvitedClientContext> {
    let organization = organization_not_found_abort(db, org).await?;
    organization_expired_abort(&organization)?;

    let invitation = db
        .get_invitation(org, token)
        .await
        .map_err(|_| AuthError::InvitationInvalid)?
        .ok_or(AuthError::InvitationInvalid)?;

    invitation_invalid_abort(&invitation)?;

    Ok(InvitedClientContext {
        organization_id: org.clone(),
        token: *token,
        invitation_type: invitation.invitation_type,
    })
}

/// Build an [`AuthenticatedClientContext`]: locate the device, verify the
/// user is neither revoked nor frozen, verify the organization is not
/// expired, then verify the signature over the request body.
pub async fn authenticated_context(
    db: &Arc<dyn Datamodel>,
    org: &OrganizationId,
    request: AuthenticatedRequest<'_>,
) -> AuthResult<AuthenticatedClientContext> {
    let organization = organization_not_found_abort(db, org).await?;
    organization_expired_abort(&organization)?;

    let device = db
        .get_device(org, &request.device_id)
        .await
        .map_err(|_| AuthError::AuthorNotFound)?;
    let device = author_not_found_abort(device)?;

    let user = db
        .get_user(org, &request.device_id.user_id)
        .await
        .map_err(|_| AuthError::AuthorNotFound)?;
    let user = author_not_found_abort(user)?;

    author_revoked_abort(&user)?;
    user_frozen_abort(&user)?;

    device
        .verify_key
        .verify(request.body, request.signature)
        .map_err(|_| AuthError::InvalidAuthentication)?;

    Ok(AuthenticatedClientContext {
        organization_id: org.clone(),
        user_id: user.user_id,
        device_id: request.device_id,
        device_verify_key: device.verify_key,
        profile: user.current_profile(),
    })
}

// =============================================================================
// Abort helpers (spec.md §4.2)
// =============================================================================

async fn organization_not_found_abort(
    db: &Arc<dyn Datamodel>,
    org: &OrganizationId,
) -> AuthResult<parsec_db::model::Organization> {
    db.get_organization(org)
        .await
        .map_err(|_| AuthError::OrganizationNotFound)?
        .ok_or(AuthError::OrganizationNotFound)
}

fn organization_expired_abort(organization: &parsec_db::model::Organization) -> AuthResult<()> {
    if organization.is_expired {
        return Err(AuthError::OrganizationExpired);
    }
    Ok(())
}

fn author_not_found_abort<T>(found: Option<T>) -> AuthResult<T> {
    found.ok_or(AuthError::AuthorNotFound)
}

fn author_revoked_abort(user: &parsec_db::model::User) -> AuthResult<()> {
    if user.is_revoked() {
        return Err(AuthError::AuthorRevoked);
    }
    Ok(())
}

fn user_frozen_abort(user: &parsec_db::model::User) -> AuthResult<()> {
    if user.frozen {
        return Err(AuthError::UserFrozen);
    }
    Ok(())
}

fn invitation_invalid_abort(invitation: &parsec_db::model::Invitation) -> AuthResult<()> {
    match invitation.status {
        InvitationStatus::Pending | InvitationStatus::Ready => Ok(()),
        InvitationStatus::Cancelled | InvitationStatus::Finished => Err(AuthError::InvitationInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_crypto::testing::SigningKeyPair;
    use parsec_db::memory::MemoryDatamodel;
    use parsec_db::model::{Device, HumanHandle, Invitation, Organization, User};
    use parsec_types::{Timestamp, UserId};

    fn org_id() -> OrganizationId {
        OrganizationId::parse("AcmeCorp").unwrap()
    }

    async fn bootstrapped_db() -> (Arc<dyn Datamodel>, SigningKeyPair) {
        let db: Arc<dyn Datamodel> = Arc::new(MemoryDatamodel::default());
        let org = org_id();
        db.insert_organization(Organization {
            id: org.clone(),
            root_verify_key: None,
            is_expired: false,
            bootstrap_token: "tok".into(),
            active_users_limit: parsec_db::model::ActiveUsersLimit::Unbounded,
            user_profile_outsider_allowed: true,
            minimum_archiving_period: 2592000,
            allowed_client_agent: parsec_db::model::AllowedClientAgent::NativeOrWeb,
            account_vault_strategy: parsec_db::model::AccountVaultStrategy::Allowed,
            sequester_authority: None,
            tos: None,
            last_certificate_timestamp: None,
        })
        .await
        .unwrap();
        let signer = SigningKeyPair::generate();
        db.bootstrap_organization(&org, signer.verify_key()).await.unwrap();
        (db, signer)
    }

    async fn insert_user_and_device(
        db: &Arc<dyn Datamodel>,
        org: &OrganizationId,
        signer: &SigningKeyPair,
        user_id: UserId,
        device_name: &str,
    ) -> DeviceId {
        db.insert_user(
            org,
            User {
                user_id,
                human_handle: HumanHandle { email: "a@b.com".into(), label: "A".into() },
                initial_profile: UserProfile::Standard,
                profile_updates: vec![],
                created_on: Timestamp::now(),
                revoked_on: None,
                frozen: false,
            },
        )
        .await
        .unwrap();
        let device_id = DeviceId::new(user_id, device_name);
        db.insert_device(
            org,
            Device {
                device_id: device_id.clone(),
                verify_key: signer.verify_key(),
                certificate: vec![],
                created_on: Timestamp::now(),
                device_label: None,
            },
        )
        .await
        .unwrap();
        device_id
    }

    #[tokio::test]
    async fn anonymous_context_rejects_unknown_organization() {
        let db: Arc<dyn Datamodel> = Arc::new(MemoryDatamodel::default());
        let err = anonymous_context(&db, &org_id()).await.unwrap_err();
        assert_eq!(err, AuthError::OrganizationNotFound);
    }

    #[tokio::test]
    async fn authenticated_context_accepts_a_well_signed_request() {
        let (db, signer) = bootstrapped_db().await;
        let org = org_id();
        let device_id = insert_user_and_device(&db, &org, &signer, UserId::new(), "dev1").await;

        let body = b"request-body";
        let signature = signer.sign(body);
        let ctx = authenticated_context(
            &db,
            &org,
            AuthenticatedRequest { device_id: device_id.clone(), signature: &signature, body },
        )
        .await
        .unwrap();
        assert_eq!(ctx.device_id, device_id);
        assert_eq!(ctx.profile, UserProfile::Standard);
    }

    #[tokio::test]
    async fn authenticated_context_rejects_bad_signature() {
        let (db, signer) = bootstrapped_db().await;
        let org = org_id();
        let device_id = insert_user_and_device(&db, &org, &signer, UserId::new(), "dev1").await;

        let body = b"request-body";
        let impostor = SigningKeyPair::generate();
        let bad_signature = impostor.sign(body);
        let err = authenticated_context(
            &db,
            &org,
            AuthenticatedRequest { device_id, signature: &bad_signature, body },
        )
        .await
        .unwrap_err();
        assert_eq!(err, AuthError::InvalidAuthentication);
    }

    #[tokio::test]
    async fn authenticated_context_rejects_unknown_device() {
        let (db, signer) = bootstrapped_db().await;
        let org = org_id();
        let device_id = DeviceId::new(UserId::new(), "dev1");
        let body = b"request-body";
        let signature = signer.sign(body);
        let err = authenticated_context(
            &db,
            &org,
            AuthenticatedRequest { device_id, signature: &signature, body },
        )
        .await
        .unwrap_err();
        assert_eq!(err, AuthError::AuthorNotFound);
    }

    #[tokio::test]
    async fn authenticated_context_rejects_revoked_user() {
        let (db, signer) = bootstrapped_db().await;
        let org = org_id();
        let user_id = UserId::new();
        let device_id = insert_user_and_device(&db, &org, &signer, user_id, "dev1").await;
        db.revoke_user(&org, &user_id, Timestamp::now()).await.unwrap();

        let body = b"request-body";
        let signature = signer.sign(body);
        let err = authenticated_context(
            &db,
            &org,
            AuthenticatedRequest { device_id, signature: &signature, body },
        )
        .await
        .unwrap_err();
        assert_eq!(err, AuthError::AuthorRevoked);
    }

    #[tokio::test]
    async fn authenticated_context_rejects_frozen_user() {
        let (db, signer) = bootstrapped_db().await;
        let org = org_id();
        let user_id = UserId::new();
        let device_id = insert_user_and_device(&db, &org, &signer, user_id, "dev1").await;
        db.set_user_frozen(&org, &user_id, true).await.unwrap();

        let body = b"request-body";
        let signature = signer.sign(body);
        let err = authenticated_context(
            &db,
            &org,
            AuthenticatedRequest { device_id, signature: &signature, body },
        )
        .await
        .unwrap_err();
        assert_eq!(err, AuthError::UserFrozen);
    }

    #[tokio::test]
    async fn invited_context_rejects_cancelled_invitation() {
        let (db, signer) = bootstrapped_db().await;
        let org = org_id();
        let token = InvitationToken::new();
        db.insert_invitation(
            &org,
            Invitation {
                token,
                invitation_type: InvitationType::User,
                created_by_device_id: DeviceId::new(UserId::new(), "dev1"),
                created_on: Timestamp::now(),
                claimer_email: Some("claimer@b.com".into()),
                claimer_user_id: None,
                status: InvitationStatus::Cancelled,
            },
        )
        .await
        .unwrap();
        let _ = signer;
        let err = invited_context(&db, &org, &token).await.unwrap_err();
        assert_eq!(err, AuthError::InvitationInvalid);
    }

    #[tokio::test]
    async fn invited_context_accepts_pending_invitation() {
        let (db, _signer) = bootstrapped_db().await;
        let org = org_id();
        let token = InvitationToken::new();
        db.insert_invitation(
            &org,
            Invitation {
                token,
                invitation_type: InvitationType::Device,
                created_by_device_id: DeviceId::new(UserId::new(), "dev1"),
                created_on: Timestamp::now(),
                claimer_email: None,
                claimer_user_id: Some(UserId::new()),
                status: InvitationStatus::Pending,
            },
        )
        .await
        .unwrap();
        let ctx = invited_context(&db, &org, &token).await.unwrap();
        assert_eq!(ctx.invitation_type, InvitationType::Device);
    }
}
