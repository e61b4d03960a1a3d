//! Server-side sanity window around a client-supplied timestamp
//! (spec.md §4.3, §8 Glossary "Ballpark").

use parsec_types::Timestamp;

use crate::error::{CertResult, CertificateError};

#[derive(Debug, Clone, Copy)]
pub struct BallparkConfig {
    /// How far in the future a client timestamp may be before the server
    /// considers it out of ballpark.
    pub client_early_offset_secs: i64,
    /// How far in the past a client timestamp may be.
    pub client_late_offset_secs: i64,
}

impl Default for BallparkConfig {
    fn default() -> Self {
        Self {
            client_early_offset_secs: 300,
            client_late_offset_secs: 320,
        }
    }
}

/// Check `client_timestamp` against `server_timestamp` using `config`'s
/// offsets. `client_timestamp` ahead of the server by more than
/// `client_early_offset_secs`, or behind by more than
/// `client_late_offset_secs`, is rejected.
pub fn timestamps_in_the_ballpark(
    client_timestamp: Timestamp,
    server_timestamp: Timestamp,
    config: &BallparkConfig,
) -> CertResult<()> {
    let skew = client_timestamp.diff_seconds(&server_timestamp);
    if skew > config.client_early_offset_secs as f64 || skew < -(config.client_late_offset_secs as f64) {
        return Err(CertificateError::TimestampOutOfBallpark {
            client_timestamp,
            server_timestamp,
            ballpark_client_early_offset: config.client_early_offset_secs,
            ballpark_client_late_offset: config.client_late_offset_secs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_within_window_is_accepted() {
        let server = Timestamp::now();
        let client = server.checked_add_seconds(10);
        assert!(timestamps_in_the_ballpark(client, server, &BallparkConfig::default()).is_ok());
    }

    #[test]
    fn timestamp_too_far_in_the_future_is_rejected() {
        let server = Timestamp::now();
        let client = server.checked_add_seconds(301);
        let err = timestamps_in_the_ballpark(client, server, &BallparkConfig::default()).unwrap_err();
        assert!(matches!(err, CertificateError::TimestampOutOfBallpark { .. }));
    }

    #[test]
    fn timestamp_too_far_in_the_past_is_rejected() {
        let server = Timestamp::now();
        let client = server.checked_sub_seconds(321);
        let err = timestamps_in_the_ballpark(client, server, &BallparkConfig::default()).unwrap_err();
        assert!(matches!(err, CertificateError::TimestampOutOfBallpark { .. }));
    }

    #[test]
    fn boundary_offsets_are_accepted() {
        let server = Timestamp::now();
        assert!(timestamps_in_the_ballpark(
            server.checked_add_seconds(300),
            server,
            &BallparkConfig::default()
        )
        .is_ok());
        assert!(timestamps_in_the_ballpark(
            server.checked_sub_seconds(320),
            server,
            &BallparkConfig::default()
        )
        .is_ok());
    }
}
