//! `/invited/<org>` handlers (spec.md §4.6): `invite_info` and the unified
//! `invite_conduit_exchange`.

use parsec_invite::InviteError;

use crate::dto::{InviteConduitExchangeRep, InviteConduitExchangeReq, InviteInfoRep, InviteInfoReq};
use crate::handlers::ClientContext;
use crate::state::AppState;
use crate::wire;

pub async fn invite_info(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_invited();
    let rep = match wire::decode::<InviteInfoReq>(&body) {
        Ok(_) => match state.invite.info_as_invited(&ctx.organization_id, ctx.token).await {
            Ok(invitation) => InviteInfoRep::Ok { r#type: invitation.invitation_type },
            Err(_) => InviteInfoRep::RepUnknownStatus,
        },
        Err(_) => InviteInfoRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}

/// The claimer side of the conduit rendezvous: `greeter` is always `None`
/// here, the engine's signal for "this call comes from the claimer, not an
/// authenticated greeter" (spec.md §4.6).
pub async fn invite_conduit_exchange(state: AppState, ctx: ClientContext, body: Vec<u8>) -> Vec<u8> {
    let ctx = ctx.unwrap_invited();
    let req: InviteConduitExchangeReq = match wire::decode(&body) {
        Ok(req) => req,
        Err(_) => return wire::encode(&InviteConduitExchangeRep::RepUnknownStatus),
    };

    let rep = match state
        .invite
        .conduit_exchange(&ctx.organization_id, None, ctx.token, req.state, req.payload, req.last)
        .await
    {
        Ok((payload, last)) => InviteConduitExchangeRep::Ok { payload, last },
        Err(InviteError::EnrollmentWrongState) => InviteConduitExchangeRep::EnrollmentWrongState,
        Err(InviteError::InvitationDeleted) => InviteConduitExchangeRep::InvitationDeleted,
        Err(InviteError::InvitationAlreadyUsed) => InviteConduitExchangeRep::InvitationAlreadyUsed,
        Err(_) => InviteConduitExchangeRep::RepUnknownStatus,
    };
    wire::encode(&rep)
}
