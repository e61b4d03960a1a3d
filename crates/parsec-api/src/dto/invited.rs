//! `/invited/<org>` family: reachable with an `Invitation-Token` header
//! matching a non-terminal invitation (spec.md §4.2, §4.6).
//!
//! The original protocol split the conduit rendezvous into a dozen
//! phase-named commands (`invite_1_claimer_wait_peer`,
//! `invite_2a_greeter_get_hashed_nonce`, ...). The engine already unified
//! them into one `conduit_exchange(state, payload, last)` entry point, so
//! the wire surface does the same: one `invite_conduit_exchange` command
//! carrying `state` as a payload field instead of twelve near-duplicate
//! request/response pairs.

use parsec_types::{ConduitState, InvitationType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteInfoReq {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteInfoRep {
    Ok { r#type: InvitationType },
    RepUnknownStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConduitExchangeReq {
    pub state: ConduitState,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Only meaningful from the greeter side; a claimer always sends `false`
    /// and the engine ignores it from that side (only the greeter's `last`
    /// can close out phase 4, per spec.md §4.6).
    pub last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteConduitExchangeRep {
    Ok {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
        last: bool,
    },
    EnrollmentWrongState,
    InvitationDeleted,
    InvitationAlreadyUsed,
    RepUnknownStatus,
}
