//! `GET /authenticated/<org>/events` (spec.md §4.7): an organization-config
//! handshake frame followed by a stream of `(event_id, type, payload)`
//! frames, with `Last-Event-ID` resume.

use async_stream::stream;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use parsec_db::model::{AccountVaultStrategy, ActiveUsersLimit, AllowedClientAgent};
use parsec_events::event::{AccountVaultStrategyWire, AllowedClientAgentWire, OrganizationConfigFrame};
use parsec_events::Replay;
use parsec_types::EventId;

use crate::handlers::ClientContext;
use crate::state::AppState;
use crate::wire;

/// Sent once, before any event frame, so the client can build its initial
/// view without a separate round trip.
async fn organization_config_frame(state: &AppState, ctx: &parsec_auth::AuthenticatedClientContext) -> OrganizationConfigFrame {
    let organization = state
        .db
        .get_organization(&ctx.organization_id)
        .await
        .ok()
        .flatten()
        .expect("authenticated context guarantees the organization exists");
    let current_realms = state
        .realm
        .get_current_realms_for_user(&ctx.organization_id, ctx.user_id)
        .await
        .unwrap_or_default()
        .into_iter()
        .collect();

    let active_users_limit = match organization.active_users_limit {
        ActiveUsersLimit::Unbounded => None,
        ActiveUsersLimit::Limited(n) => Some(n),
    };
    let allowed_client_agent = match organization.allowed_client_agent {
        AllowedClientAgent::NativeOnly => AllowedClientAgentWire::NativeOnly,
        AllowedClientAgent::NativeOrWeb => AllowedClientAgentWire::NativeOrWeb,
    };
    let account_vault_strategy = match organization.account_vault_strategy {
        AccountVaultStrategy::Allowed => AccountVaultStrategyWire::Allowed,
        AccountVaultStrategy::Forbidden => AccountVaultStrategyWire::Forbidden,
    };

    OrganizationConfigFrame {
        profile: ctx.profile,
        user_profile_outsider_allowed: organization.user_profile_outsider_allowed,
        active_users_limit,
        allowed_client_agent,
        account_vault_strategy,
        current_realms,
    }
}

/// A marker frame telling the client its `Last-Event-ID` has aged out of the
/// replay buffer and it must resync certificates from scratch (spec.md
/// §4.7).
const MISSED_EVENTS_FRAME: &str = "missed_events";

pub async fn events(
    state: AppState,
    ctx: ClientContext,
    last_event_id: Option<EventId>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let ctx = ctx.unwrap_authenticated().clone();

    let stream = stream! {
        let config = organization_config_frame(&state, &ctx).await;
        yield Ok(SseEvent::default().event("organization_config").data(
            String::from_utf8_lossy(&wire::encode(&config)).into_owned(),
        ));

        // Subscribe before resolving the replay snapshot: a receiver created
        // here is guaranteed to see any event published strictly after this
        // point. Resolving the snapshot second can make it overlap with
        // what the receiver already picked up; `seen` dedupes that overlap
        // rather than dropping anything.
        let mut rx = state.events.subscribe(&ctx.organization_id);
        let mut seen = std::collections::HashSet::new();

        let mut missed = false;
        if let Some(last_id) = last_event_id {
            match state.events.replay_since(&ctx.organization_id, last_id) {
                Replay::Events(events) => {
                    for event in events {
                        seen.insert(event.event_id());
                        yield Ok(frame_for(&event));
                    }
                }
                Replay::MissedEvents => missed = true,
            }
        }
        if missed {
            yield Ok(SseEvent::default().event(MISSED_EVENTS_FRAME).data(""));
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if seen.remove(&event.event_id()) {
                        continue;
                    }
                    yield Ok(frame_for(&event));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    yield Ok(SseEvent::default().event(MISSED_EVENTS_FRAME).data(""));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame_for(event: &parsec_events::Event) -> SseEvent {
    SseEvent::default()
        .id(event.event_id().to_hex())
        .event(event_type_name(event))
        .data(String::from_utf8_lossy(&wire::encode(event.payload())).into_owned())
}

fn event_type_name(event: &parsec_events::Event) -> &'static str {
    use parsec_events::event::EventPayload;
    match event.payload() {
        EventPayload::Invitation { .. } => "invitation",
        EventPayload::EnrollmentConduit { .. } => "enrollment_conduit",
        EventPayload::CommonCertificate { .. } => "common_certificate",
        EventPayload::RealmCertificate { .. } => "realm_certificate",
        EventPayload::SequesterCertificate { .. } => "sequester_certificate",
        EventPayload::ShamirRecoveryCertificate { .. } => "shamir_recovery_certificate",
        EventPayload::Vlob { .. } => "vlob",
        EventPayload::Pinged => "pinged",
        EventPayload::OrganizationExpired => "organization_expired",
        EventPayload::OrganizationTosUpdated => "organization_tos_updated",
    }
}
