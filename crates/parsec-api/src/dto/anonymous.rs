//! `/anonymous/<org>` family: reachable with no authentication at all
//! (spec.md §4.2). Only `organization_bootstrap` lives here — PKI
//! enrollment has no counterpart engine crate in this workspace and is
//! left unimplemented (see DESIGN.md).

use parsec_crypto::VerifyKey;
use serde::{Deserialize, Serialize};

use super::common::SignedCertificate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationBootstrapReq {
    pub bootstrap_token: String,
    pub root_verify_key: VerifyKey,
    pub user_certificate: SignedCertificate,
    pub device_certificate: SignedCertificate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrganizationBootstrapRep {
    Ok,
    InvalidCertificate,
    TimestampOutOfBallpark(super::common::BallparkMismatch),
    OrganizationAlreadyBootstrapped,
    InvalidBootstrapToken,
    RepUnknownStatus,
}
