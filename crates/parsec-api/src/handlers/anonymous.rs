//! `organization_bootstrap` (spec.md §3, §4.2).
//!
//! No engine crate owns this: it is a one-shot transition of the
//! organization's own bootstrap fields (`root_verify_key`, `bootstrap_token`)
//! plus inserting the very first user and device certificates, so it talks
//! to `parsec-db`/`parsec-certs` directly rather than through a dedicated
//! `*Ops` type, the same way `parsec-auth`'s context builders do.

use std::sync::Arc;

use parsec_certs::{verify_and_load, CertificateError};
use parsec_db::model::{Device, User};
use parsec_db::Datamodel;
use parsec_types::Timestamp;

use crate::dto::{OrganizationBootstrapRep, OrganizationBootstrapReq};
use crate::handlers::ClientContext;
use crate::state::AppState;
use crate::wire;

pub async fn organization_bootstrap(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let org = ctx.unwrap_anonymous().organization_id.clone();
    let rep = organization_bootstrap_inner(&state.db, &org, state.ballpark, body).await;
    wire::encode(&rep)
}

async fn organization_bootstrap_inner(
    db: &Arc<dyn Datamodel>,
    org: &parsec_types::OrganizationId,
    ballpark: parsec_certs::BallparkConfig,
    body: Vec<u8>,
) -> OrganizationBootstrapRep {
    let req: OrganizationBootstrapReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return OrganizationBootstrapRep::RepUnknownStatus,
    };

    let organization = match db.get_organization(org).await {
        Ok(Some(organization)) => organization,
        _ => return OrganizationBootstrapRep::InvalidBootstrapToken,
    };
    if organization.is_bootstrapped() {
        return OrganizationBootstrapRep::OrganizationAlreadyBootstrapped;
    }
    if organization.bootstrap_token != req.bootstrap_token {
        return OrganizationBootstrapRep::InvalidBootstrapToken;
    }

    let user_cert: parsec_certs::UserCertificate = match verify_and_load(
        &req.user_certificate.raw,
        &req.user_certificate.signature,
        &req.root_verify_key,
    ) {
        Ok(cert) => cert,
        Err(_) => return OrganizationBootstrapRep::InvalidCertificate,
    };
    let device_cert: parsec_certs::DeviceCertificate = match verify_and_load(
        &req.device_certificate.raw,
        &req.device_certificate.signature,
        &req.root_verify_key,
    ) {
        Ok(cert) => cert,
        Err(_) => return OrganizationBootstrapRep::InvalidCertificate,
    };

    let server_now = Timestamp::now();
    for certificate_timestamp in [user_cert.timestamp, device_cert.timestamp] {
        if let Err(CertificateError::TimestampOutOfBallpark { .. }) =
            parsec_certs::timestamps_in_the_ballpark(certificate_timestamp, server_now, &ballpark)
        {
            return OrganizationBootstrapRep::TimestampOutOfBallpark(
                parsec_certs::CertificateError::TimestampOutOfBallpark {
                    client_timestamp: certificate_timestamp,
                    server_timestamp: server_now,
                    ballpark_client_early_offset: ballpark.client_early_offset_secs,
                    ballpark_client_late_offset: ballpark.client_late_offset_secs,
                }
                .into(),
            );
        }
    }

    if db
        .bootstrap_organization(org, req.root_verify_key.clone())
        .await
        .is_err()
    {
        return OrganizationBootstrapRep::OrganizationAlreadyBootstrapped;
    }

    let _ = db
        .insert_user(
            org,
            User {
                user_id: user_cert.user_id,
                human_handle: parsec_db::model::HumanHandle {
                    email: user_cert.human_handle_email,
                    label: user_cert.human_handle_label,
                },
                initial_profile: user_cert.profile,
                profile_updates: vec![],
                created_on: user_cert.timestamp,
                revoked_on: None,
                frozen: false,
            },
        )
        .await;
    let _ = db
        .insert_device(
            org,
            Device {
                device_id: device_cert.device_id,
                verify_key: device_cert.verify_key,
                certificate: req.device_certificate.raw,
                created_on: device_cert.timestamp,
                device_label: device_cert.device_label,
            },
        )
        .await;
    let _ = db
        .bump_last_certificate_timestamp(org, device_cert.timestamp.max(user_cert.timestamp))
        .await;

    OrganizationBootstrapRep::Ok
}
