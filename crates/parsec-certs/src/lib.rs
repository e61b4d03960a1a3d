//! Certificate verification, ballpark check, and the causal clock rule
//! (spec.md §4.3).

pub mod ballpark;
pub mod certificate;
pub mod clock;
pub mod error;

pub use ballpark::{timestamps_in_the_ballpark, BallparkConfig};
pub use certificate::{
    sign_certificate, verify_and_load, DeviceCertificate, DeviceSignedCertificate,
    RealmKeyRotationCertificate, RealmRoleCertificate, RevokedUserCertificate,
    SequesterServiceCertificate, UserCertificate, UserUpdateCertificate,
};
pub use clock::{require_strictly_greater, ClockScope};
pub use error::{CertResult, CertificateError};
