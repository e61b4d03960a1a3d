//! `/authenticated/<org>` handlers (spec.md §4.4–§4.6): realm/role, vlob &
//! block, and the authenticated half of invitations (`invite_new_*`,
//! `invite_cancel`, `invite_list`), plus the trivial `ping` liveness check.

use parsec_certs::verify_and_load;
use parsec_invite::InviteError;
use parsec_realm::RealmError;
use parsec_types::Timestamp;
use parsec_vlob::VlobError;

use crate::dto::*;
use crate::handlers::ClientContext;
use crate::state::AppState;
use crate::wire;

fn ballpark_or_clock_rep<T>(
    err: parsec_certs::CertificateError,
    ballpark: impl FnOnce(BallparkMismatch) -> T,
    require_greater: impl FnOnce(Timestamp) -> T,
) -> Option<T> {
    match err {
        parsec_certs::CertificateError::TimestampOutOfBallpark { .. } => Some(ballpark(err.into())),
        parsec_certs::CertificateError::RequireGreaterTimestamp { strictly_greater_than } => {
            Some(require_greater(strictly_greater_than))
        }
        _ => None,
    }
}

// =============================================================================
// realm_create / realm_share / realm_unshare / realm_rotate_key
// =============================================================================

pub async fn realm_create(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: RealmCreateReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&RealmCreateRep::RepUnknownStatus),
    };

    let certificate: parsec_certs::RealmRoleCertificate = match verify_and_load(
        &req.realm_role_certificate.raw,
        &req.realm_role_certificate.signature,
        &ctx.device_verify_key,
    ) {
        Ok(cert) => cert,
        Err(_) => return wire::encode(&RealmCreateRep::InvalidCertificate),
    };

    let author = parsec_realm::Author { user_id: ctx.user_id, profile: ctx.profile };
    let rep = match state
        .realm
        .realm_create(&ctx.organization_id, &author, certificate.realm_id, certificate, Timestamp::now())
        .await
    {
        Ok(()) => RealmCreateRep::Ok,
        Err(RealmError::RealmAlreadyExists) => RealmCreateRep::RealmAlreadyExists,
        Err(RealmError::AuthorNotAllowed) => RealmCreateRep::AuthorNotAllowed,
        Err(RealmError::InvalidCertificate) => RealmCreateRep::InvalidCertificate,
        Err(RealmError::Certificate(err)) => ballpark_or_clock_rep(
            err,
            RealmCreateRep::TimestampOutOfBallpark,
            |ts| RealmCreateRep::RequireGreaterTimestamp { strictly_greater_than: ts },
        )
        .unwrap_or(RealmCreateRep::RepUnknownStatus),
        Err(_) => RealmCreateRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

/// `realm_share` and `realm_unshare` are the same wire command as far as
/// the engine is concerned: a role-`None` certificate unshares (spec.md
/// §4.4). Both dispatch table entries point at this handler.
pub async fn realm_share(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: RealmShareReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&RealmShareRep::RepUnknownStatus),
    };

    let certificate: parsec_certs::RealmRoleCertificate = match verify_and_load(
        &req.realm_role_certificate.raw,
        &req.realm_role_certificate.signature,
        &ctx.device_verify_key,
    ) {
        Ok(cert) => cert,
        Err(_) => return wire::encode(&RealmShareRep::InvalidCertificate),
    };

    let recipient = match state.db.get_user(&ctx.organization_id, &certificate.user_id).await {
        Ok(Some(user)) if !user.is_revoked() => user,
        Ok(Some(_)) => return wire::encode(&RealmShareRep::UserRevoked),
        _ => return wire::encode(&RealmShareRep::UserNotFound),
    };

    let author = parsec_realm::Author { user_id: ctx.user_id, profile: ctx.profile };
    let rep = match state
        .realm
        .realm_share(
            &ctx.organization_id,
            &author,
            certificate.realm_id,
            certificate,
            recipient.current_profile(),
            Timestamp::now(),
        )
        .await
    {
        Ok(()) => RealmShareRep::Ok,
        Err(RealmError::RealmNotFound) => RealmShareRep::RealmNotFound,
        Err(RealmError::RoleAlreadyGranted) => RealmShareRep::RoleAlreadyGranted,
        Err(RealmError::UserAlreadyUnshared) => RealmShareRep::UserAlreadyUnshared,
        Err(RealmError::RoleIncompatibleWithOutsider) => RealmShareRep::RoleIncompatibleWithOutsider,
        Err(RealmError::CannotSelfShare) => RealmShareRep::CannotSelfShare,
        Err(RealmError::CannotSelfUnshare) => RealmShareRep::CannotSelfUnshare,
        Err(RealmError::BadKeyIndex) => RealmShareRep::BadKeyIndex,
        Err(RealmError::AuthorNotAllowedToGrant) => RealmShareRep::AuthorNotAllowed,
        Err(RealmError::InvalidCertificate) => RealmShareRep::InvalidCertificate,
        Err(RealmError::Certificate(err)) => ballpark_or_clock_rep(
            err,
            RealmShareRep::TimestampOutOfBallpark,
            |ts| RealmShareRep::RequireGreaterTimestamp { strictly_greater_than: ts },
        )
        .unwrap_or(RealmShareRep::RepUnknownStatus),
        Err(_) => RealmShareRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn realm_rotate_key(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: RealmRotateKeyReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&RealmRotateKeyRep::RepUnknownStatus),
    };

    let certificate: parsec_certs::RealmKeyRotationCertificate = match verify_and_load(
        &req.realm_key_rotation_certificate.raw,
        &req.realm_key_rotation_certificate.signature,
        &ctx.device_verify_key,
    ) {
        Ok(cert) => cert,
        Err(_) => return wire::encode(&RealmRotateKeyRep::InvalidCertificate),
    };

    let author = parsec_realm::Author { user_id: ctx.user_id, profile: ctx.profile };
    let rep = match state
        .realm
        .realm_rotate_key(
            &ctx.organization_id,
            &author,
            certificate.realm_id,
            certificate,
            &req.per_participant_keys_bundle_access,
            Timestamp::now(),
        )
        .await
    {
        Ok(()) => RealmRotateKeyRep::Ok,
        Err(RealmError::RealmNotFound) => RealmRotateKeyRep::RealmNotFound,
        Err(RealmError::RealmArchived) => RealmRotateKeyRep::RealmArchived,
        Err(RealmError::BadKeyIndex) => RealmRotateKeyRep::BadKeyIndex,
        Err(RealmError::AuthorNotAllowedToGrant) => RealmRotateKeyRep::AuthorNotAllowed,
        Err(RealmError::ParticipantMismatch) => RealmRotateKeyRep::ParticipantMismatch,
        Err(RealmError::InvalidCertificate) => RealmRotateKeyRep::InvalidCertificate,
        Err(RealmError::Certificate(err)) => ballpark_or_clock_rep(
            err,
            RealmRotateKeyRep::TimestampOutOfBallpark,
            |ts| RealmRotateKeyRep::RequireGreaterTimestamp { strictly_greater_than: ts },
        )
        .unwrap_or(RealmRotateKeyRep::RepUnknownStatus),
        Err(_) => RealmRotateKeyRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn realm_get_stats(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: RealmGetStatsReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&RealmGetStatsRep::RepUnknownStatus),
    };

    let rep = match state.realm.realm_get_stats(&ctx.organization_id, req.realm_id).await {
        Ok(stats) => RealmGetStatsRep::Ok { blocks_size: stats.blocks_size, vlobs_size: stats.vlobs_size },
        Err(RealmError::RealmNotFound) => RealmGetStatsRep::RealmNotFound,
        Err(_) => RealmGetStatsRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn get_current_realms_for_user(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: GetCurrentRealmsForUserReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&GetCurrentRealmsForUserRep::RepUnknownStatus),
    };

    let rep = match state.realm.get_current_realms_for_user(&ctx.organization_id, req.user_id).await {
        Ok(realms) => GetCurrentRealmsForUserRep::Ok { realms },
        Err(_) => GetCurrentRealmsForUserRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

// =============================================================================
// vlob_create / vlob_update / vlob_read_as_user / vlob_poll_changes_as_user
// =============================================================================

pub async fn vlob_create(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: VlobCreateReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&VlobCreateRep::RepUnknownStatus),
    };

    let realm = match state.db.get_realm(&ctx.organization_id, &req.realm_id).await {
        Ok(Some(realm)) => realm,
        _ => return wire::encode(&VlobCreateRep::RealmNotFound),
    };
    let author =
        parsec_vlob::Author { device_id: ctx.device_id.clone(), role: realm.current_role_for(ctx.user_id) };

    let rep = match state
        .vlob
        .vlob_create(
            &ctx.organization_id,
            &author,
            req.realm_id,
            req.vlob_id,
            req.key_index,
            req.timestamp,
            req.blob,
            req.sequester_blob,
            Timestamp::now(),
        )
        .await
    {
        Ok(()) => VlobCreateRep::Ok,
        Err(VlobError::AuthorNotAllowed) => VlobCreateRep::AuthorNotAllowed,
        Err(VlobError::RealmNotFound) => VlobCreateRep::RealmNotFound,
        Err(VlobError::VlobAlreadyExists) => VlobCreateRep::VlobAlreadyExists,
        Err(VlobError::BadKeyIndex) => {
            VlobCreateRep::BadKeyIndex { last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp }
        }
        Err(VlobError::OrganizationNotSequestered) => VlobCreateRep::OrganizationNotSequestered,
        Err(VlobError::SequesterInconsistency) => VlobCreateRep::SequesterInconsistency,
        Err(VlobError::RejectedBySequesterService { service_id, reason }) => {
            VlobCreateRep::RejectedBySequesterService { service_id, reason }
        }
        Err(VlobError::SequesterServiceUnavailable { service_id }) => {
            VlobCreateRep::SequesterServiceUnavailable { service_id }
        }
        Err(VlobError::Certificate(err)) => ballpark_or_clock_rep(
            err,
            VlobCreateRep::TimestampOutOfBallpark,
            |ts| VlobCreateRep::RequireGreaterTimestamp { strictly_greater_than: ts },
        )
        .unwrap_or(VlobCreateRep::RepUnknownStatus),
        Err(_) => VlobCreateRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn vlob_update(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: VlobUpdateReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&VlobUpdateRep::RepUnknownStatus),
    };

    let existing = match state.db.get_vlob(&ctx.organization_id, &req.vlob_id).await {
        Ok(Some(vlob)) => vlob,
        _ => return wire::encode(&VlobUpdateRep::VlobNotFound),
    };
    let realm = match state.db.get_realm(&ctx.organization_id, &existing.realm_id).await {
        Ok(Some(realm)) => realm,
        _ => return wire::encode(&VlobUpdateRep::RealmNotFound),
    };
    let author =
        parsec_vlob::Author { device_id: ctx.device_id.clone(), role: realm.current_role_for(ctx.user_id) };

    let rep = match state
        .vlob
        .vlob_update(&ctx.organization_id, &author, req.vlob_id, req.version, req.timestamp, req.blob, req.sequester_blob, Timestamp::now())
        .await
    {
        Ok(()) => VlobUpdateRep::Ok,
        Err(VlobError::AuthorNotAllowed) => VlobUpdateRep::AuthorNotAllowed,
        Err(VlobError::VlobNotFound) => VlobUpdateRep::VlobNotFound,
        Err(VlobError::RealmNotFound) => VlobUpdateRep::RealmNotFound,
        Err(VlobError::BadVlobVersion) => VlobUpdateRep::BadVlobVersion,
        Err(VlobError::BadKeyIndex) => {
            VlobUpdateRep::BadKeyIndex { last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp }
        }
        Err(VlobError::OrganizationNotSequestered) => VlobUpdateRep::OrganizationNotSequestered,
        Err(VlobError::SequesterInconsistency) => VlobUpdateRep::SequesterInconsistency,
        Err(VlobError::RejectedBySequesterService { service_id, reason }) => {
            VlobUpdateRep::RejectedBySequesterService { service_id, reason }
        }
        Err(VlobError::SequesterServiceUnavailable { service_id }) => {
            VlobUpdateRep::SequesterServiceUnavailable { service_id }
        }
        Err(VlobError::Certificate(err)) => ballpark_or_clock_rep(
            err,
            VlobUpdateRep::TimestampOutOfBallpark,
            |ts| VlobUpdateRep::RequireGreaterTimestamp { strictly_greater_than: ts },
        )
        .unwrap_or(VlobUpdateRep::RepUnknownStatus),
        Err(_) => VlobUpdateRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn vlob_read_as_user(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: VlobReadAsUserReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&VlobReadAsUserRep::RepUnknownStatus),
    };

    let realm = match state.db.get_realm(&ctx.organization_id, &req.realm_id).await {
        Ok(Some(realm)) => realm,
        _ => return wire::encode(&VlobReadAsUserRep::RealmNotFound),
    };

    let rep = match state.vlob.vlob_read_as_user(&ctx.organization_id, &req.vlob_ids).await {
        Ok(items) => {
            let last_certificate_timestamp =
                state.db.get_last_certificate_timestamp(&ctx.organization_id).await.ok().flatten();
            VlobReadAsUserRep::Ok {
                items: items
                    .into_iter()
                    .map(|(vlob_id, version)| VlobReadItem {
                        vlob_id,
                        version: version.version,
                        author: version.author,
                        timestamp: version.timestamp,
                        blob: version.blob,
                    })
                    .collect(),
                last_common_certificate_timestamp: last_certificate_timestamp.unwrap_or(Timestamp::from_micros(0)),
                last_realm_certificate_timestamp: realm.last_realm_certificate_timestamp,
            }
        }
        Err(VlobError::TooManyElements) => VlobReadAsUserRep::TooManyElements,
        Err(_) => VlobReadAsUserRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn vlob_poll_changes_as_user(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: VlobPollChangesAsUserReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&VlobPollChangesAsUserRep::RepUnknownStatus),
    };

    let rep = match state
        .vlob
        .vlob_poll_changes_as_user(&ctx.organization_id, req.realm_id, req.last_checkpoint)
        .await
    {
        Ok((current_checkpoint, changes)) => VlobPollChangesAsUserRep::Ok { current_checkpoint, changes },
        Err(_) => VlobPollChangesAsUserRep::RealmNotFound,
    };
    wire::encode(&rep)
}

// =============================================================================
// block_create / block_read
// =============================================================================

pub async fn block_create(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: BlockCreateReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&BlockCreateRep::RepUnknownStatus),
    };

    let realm = match state.db.get_realm(&ctx.organization_id, &req.realm_id).await {
        Ok(Some(realm)) => realm,
        _ => return wire::encode(&BlockCreateRep::RealmNotFound),
    };
    let author =
        parsec_vlob::Author { device_id: ctx.device_id.clone(), role: realm.current_role_for(ctx.user_id) };

    let rep = match state
        .vlob
        .block_create(
            &ctx.organization_id,
            &author,
            req.realm_id,
            req.block_id,
            req.key_index,
            req.payload,
            req.timestamp,
            Timestamp::now(),
        )
        .await
    {
        Ok(()) => BlockCreateRep::Ok,
        Err(VlobError::AuthorNotAllowed) => BlockCreateRep::AuthorNotAllowed,
        Err(VlobError::RealmNotFound) => BlockCreateRep::RealmNotFound,
        Err(VlobError::BadKeyIndex) => BlockCreateRep::BadKeyIndex,
        Err(VlobError::StoreUnavailable) => BlockCreateRep::StoreUnavailable,
        Err(VlobError::Certificate(err)) => ballpark_or_clock_rep(
            err,
            BlockCreateRep::TimestampOutOfBallpark,
            |ts| BlockCreateRep::RequireGreaterTimestamp { strictly_greater_than: ts },
        )
        .unwrap_or(BlockCreateRep::RepUnknownStatus),
        Err(_) => BlockCreateRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn block_read(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: BlockReadReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&BlockReadRep::RepUnknownStatus),
    };

    let rep = match state.vlob.block_read(&ctx.organization_id, req.realm_id, req.block_id).await {
        Ok((payload, key_index, needed_realm_certificate_timestamp)) => {
            BlockReadRep::Ok { payload, key_index, needed_realm_certificate_timestamp }
        }
        Err(VlobError::RealmNotFound) => BlockReadRep::RealmNotFound,
        Err(VlobError::BlockNotFound) => BlockReadRep::BlockNotFound,
        Err(VlobError::StoreUnavailable) => BlockReadRep::StoreUnavailable,
        Err(_) => BlockReadRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

// =============================================================================
// invite_new_user / invite_new_device / invite_cancel / invite_list
// =============================================================================

pub async fn invite_new_user(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: InviteNewUserReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&InviteNewUserRep::RepUnknownStatus),
    };

    let author = parsec_invite::Author { user_id: ctx.user_id, device_id: ctx.device_id.clone(), profile: ctx.profile };
    let rep = match state.invite.new_for_user(&ctx.organization_id, &author, &req.claimer_email, Timestamp::now()).await {
        Ok(token) => InviteNewUserRep::Ok { token },
        Err(InviteError::AuthorNotAllowed) => InviteNewUserRep::AuthorNotAllowed,
        Err(InviteError::ClaimerEmailAlreadyEnrolled) => InviteNewUserRep::ClaimerEmailAlreadyEnrolled,
        Err(_) => InviteNewUserRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn invite_new_device(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let rep = match wire::decode::<InviteNewDeviceReq>(&body) {
        Ok(_) => {
            let author =
                parsec_invite::Author { user_id: ctx.user_id, device_id: ctx.device_id.clone(), profile: ctx.profile };
            match state.invite.new_for_device(&ctx.organization_id, &author, Timestamp::now()).await {
                Ok(token) => InviteNewDeviceRep::Ok { token },
                Err(_) => InviteNewDeviceRep::RepUnknownStatus,
            }
        }
        Err(_) => InviteNewDeviceRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn invite_cancel(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let req: InviteCancelReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&InviteCancelRep::RepUnknownStatus),
    };

    let author = parsec_invite::Author { user_id: ctx.user_id, device_id: ctx.device_id.clone(), profile: ctx.profile };
    let rep = match state.invite.cancel(&ctx.organization_id, &author, req.token).await {
        Ok(()) => InviteCancelRep::Ok,
        Err(InviteError::InvitationNotFound) => InviteCancelRep::InvitationNotFound,
        Err(InviteError::InvitationAlreadyDeleted) => InviteCancelRep::InvitationAlreadyDeleted,
        Err(_) => InviteCancelRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

pub async fn invite_list(state: AppState, ctx: ClientContext, _body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_authenticated();
    let rep = match state.invite.list(&ctx.organization_id).await {
        Ok(invitations) => InviteListRep::Ok {
            invitations: invitations
                .into_iter()
                .map(|i| InviteListItem {
                    token: i.token,
                    r#type: i.invitation_type,
                    created_on: i.created_on,
                    status: i.status,
                    claimer_email: i.claimer_email,
                })
                .collect(),
        },
        Err(_) => InviteListRep::Ok { invitations: vec![] },
    };
    wire::encode(&rep)
}

// =============================================================================
// ping
// =============================================================================

pub async fn ping(_state: AppState, _ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let rep = match wire::decode::<PingReq>(&body) {
        Ok(req) => PingRep::Ok { pong: req.ping },
        Err(_) => PingRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}
