//! Certificate payloads and the generic verify-and-load entry point
//! (spec.md §4.3, §3).
//!
//! Every certificate is signed over its msgpack-encoded payload. The
//! envelope carries `author` and `timestamp` fields common to every kind,
//! mirroring the original implementation's `*Certificate.verify_and_load`
//! family (`parsec/components/realm.py`, `invite.py`).

use parsec_crypto::VerifyKey;
use parsec_types::{DeviceId, RealmId, RealmRole, SequesterServiceId, Timestamp, UserId, UserProfile};
use serde::{Deserialize, Serialize};

use crate::error::{CertResult, CertificateError};

/// A certificate whose author is a device (the common case: every
/// certificate except the root bootstrap ones).
pub trait DeviceSignedCertificate: Serialize + for<'de> Deserialize<'de> {
    fn author(&self) -> &DeviceId;
    fn timestamp(&self) -> Timestamp;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCertificate {
    pub author: Option<DeviceId>,
    pub timestamp: Timestamp,
    pub user_id: UserId,
    pub human_handle_email: String,
    pub human_handle_label: String,
    pub profile: UserProfile,
}

impl DeviceSignedCertificate for UserCertificate {
    fn author(&self) -> &DeviceId {
        self.author.as_ref().expect("bootstrap user certificate has no device author")
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCertificate {
    pub author: Option<DeviceId>,
    pub timestamp: Timestamp,
    pub device_id: DeviceId,
    pub verify_key: VerifyKey,
    pub device_label: Option<String>,
}

impl DeviceSignedCertificate for DeviceCertificate {
    fn author(&self) -> &DeviceId {
        self.author.as_ref().expect("bootstrap device certificate has no device author")
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdateCertificate {
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub user_id: UserId,
    pub new_profile: UserProfile,
}

impl DeviceSignedCertificate for UserUpdateCertificate {
    fn author(&self) -> &DeviceId {
        &self.author
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedUserCertificate {
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub user_id: UserId,
}

impl DeviceSignedCertificate for RevokedUserCertificate {
    fn author(&self) -> &DeviceId {
        &self.author
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmRoleCertificate {
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub realm_id: RealmId,
    pub user_id: UserId,
    /// `None` means "unshare".
    pub role: Option<RealmRole>,
}

impl DeviceSignedCertificate for RealmRoleCertificate {
    fn author(&self) -> &DeviceId {
        &self.author
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmKeyRotationCertificate {
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub realm_id: RealmId,
    pub key_index: u32,
}

impl DeviceSignedCertificate for RealmKeyRotationCertificate {
    fn author(&self) -> &DeviceId {
        &self.author
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequesterServiceCertificate {
    pub timestamp: Timestamp,
    pub service_id: SequesterServiceId,
    pub service_label: String,
}

/// Verify a raw msgpack-encoded, Ed25519-signed certificate payload and
/// decode it to `T`. The signature covers the encoded payload bytes
/// directly; there is no detached-signature envelope.
///
/// `expected_author`, when given, must match the certificate's embedded
/// author exactly (spec.md's `AUTHOR_MISMATCH`/`USER_ID_MISMATCH` family of
/// outcomes, generalized here to one check the caller applies as needed).
pub fn verify_and_load<T: DeviceSignedCertificate>(
    raw: &[u8],
    signature: &[u8],
    author_verify_key: &VerifyKey,
) -> CertResult<T> {
    author_verify_key
        .verify(raw, signature)
        .map_err(|_| CertificateError::InvalidCertificate)?;
    rmp_serde::from_slice(raw).map_err(|_| CertificateError::InvalidCertificate)
}

/// Encode and sign a certificate. Only ever used by test fixtures: a real
/// server never holds a signing key (see `parsec_crypto::testing`).
pub fn sign_certificate<T: Serialize>(
    payload: &T,
    signer: &parsec_crypto::testing::SigningKeyPair,
) -> (Vec<u8>, Vec<u8>) {
    let raw = rmp_serde::to_vec_named(payload).expect("certificate payload always serializes");
    let signature = signer.sign(&raw);
    (raw, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_crypto::testing::SigningKeyPair;
    use parsec_types::UserId;

    #[test]
    fn verify_and_load_round_trips_a_well_formed_certificate() {
        let signer = SigningKeyPair::generate();
        let cert = UserUpdateCertificate {
            author: DeviceId::new(UserId::new(), "dev1"),
            timestamp: Timestamp::now(),
            user_id: UserId::new(),
            new_profile: UserProfile::Admin,
        };
        let (raw, signature) = sign_certificate(&cert, &signer);
        let loaded: UserUpdateCertificate =
            verify_and_load(&raw, &signature, &signer.verify_key()).unwrap();
        assert_eq!(loaded.user_id, cert.user_id);
        assert_eq!(loaded.new_profile, cert.new_profile);
    }

    #[test]
    fn verify_and_load_rejects_tampered_payload() {
        let signer = SigningKeyPair::generate();
        let cert = RevokedUserCertificate {
            author: DeviceId::new(UserId::new(), "dev1"),
            timestamp: Timestamp::now(),
            user_id: UserId::new(),
        };
        let (mut raw, signature) = sign_certificate(&cert, &signer);
        raw.push(0xff);
        let result: CertResult<RevokedUserCertificate> =
            verify_and_load(&raw, &signature, &signer.verify_key());
        assert_eq!(result.unwrap_err(), CertificateError::InvalidCertificate);
    }

    #[test]
    fn verify_and_load_rejects_wrong_signer() {
        let signer = SigningKeyPair::generate();
        let impostor = SigningKeyPair::generate();
        let cert = RevokedUserCertificate {
            author: DeviceId::new(UserId::new(), "dev1"),
            timestamp: Timestamp::now(),
            user_id: UserId::new(),
        };
        let (raw, signature) = sign_certificate(&cert, &signer);
        let result: CertResult<RevokedUserCertificate> =
            verify_and_load(&raw, &signature, &impostor.verify_key());
        assert_eq!(result.unwrap_err(), CertificateError::InvalidCertificate);
    }
}
