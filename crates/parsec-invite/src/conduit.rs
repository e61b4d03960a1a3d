//! The conduit rendezvous state machine (spec.md §4.6).
//!
//! Mirrors the original implementation's `BaseInviteComponent.conduit_exchange`
//! (`parsec/components/invite.py`), translated from its event-bus-filtered
//! coroutine into the idiom the REDESIGN FLAGS call for: a per-token mailbox
//! guarded by a lock, with [`tokio::sync::Notify`] standing in for the
//! "greeter-arrived"/"claimer-arrived" condition variables. Unlike the
//! original, state lives entirely in memory here: conduit payloads are never
//! persisted, matching "claimer present" liveness tracking.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use parsec_types::{ConduitState, InvitationToken, OrganizationId, UserId};

use crate::error::{InviteError, InviteResult};

/// One completed phase, held until both peers have collected their half.
struct CompletedExchange {
    state: ConduitState,
    greeter_payload: Vec<u8>,
    claimer_payload: Vec<u8>,
    last: bool,
    greeter_taken: bool,
    claimer_taken: bool,
}

struct ReadyGuard<'a> {
    registry: &'a ConduitRegistry,
    org: OrganizationId,
    token: InvitationToken,
    armed: bool,
}

impl Drop for ReadyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.mark_not_ready(&self.org, self.token);
        }
    }
}

struct Mailbox {
    state: ConduitState,
    greeter_payload: Option<Vec<u8>>,
    claimer_payload: Option<Vec<u8>>,
    greeter_last: bool,
    completed: Option<CompletedExchange>,
    cancelled: bool,
    notify: Arc<tokio::sync::Notify>,
}

impl Mailbox {
    fn fresh() -> Self {
        Self {
            state: ConduitState::State1WaitPeers,
            greeter_payload: None,
            claimer_payload: None,
            greeter_last: false,
            completed: None,
            cancelled: false,
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }
}

/// Per-`(organization_id, token)` conduit state and "claimer ready" set.
/// Process-wide, never persisted; a server restart resets both to empty,
/// which is acceptable per spec.md's liveness note.
#[derive(Default)]
pub struct ConduitRegistry {
    mailboxes: DashMap<(OrganizationId, InvitationToken), Arc<Mutex<Mailbox>>>,
    claimers_ready: DashMap<OrganizationId, std::collections::HashSet<InvitationToken>>,
}

impl ConduitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self, org: &OrganizationId, token: InvitationToken) -> Arc<Mutex<Mailbox>> {
        self.mailboxes
            .entry((org.clone(), token))
            .or_insert_with(|| Arc::new(Mutex::new(Mailbox::fresh())))
            .clone()
    }

    /// Drop the conduit for a cancelled/finished invitation and wake any
    /// party still parked on it.
    pub fn cancel(&self, org: &OrganizationId, token: InvitationToken) {
        if let Some(entry) = self.mailboxes.get(&(org.clone(), token)) {
            let mut mb = entry.lock();
            mb.cancelled = true;
            mb.notify.notify_waiters();
        }
        self.mark_not_ready(org, token);
    }

    fn mark_ready(&self, org: &OrganizationId, token: InvitationToken) {
        self.claimers_ready.entry(org.clone()).or_default().insert(token);
    }

    fn mark_not_ready(&self, org: &OrganizationId, token: InvitationToken) {
        if let Some(mut set) = self.claimers_ready.get_mut(org) {
            set.remove(&token);
        }
    }

    pub fn is_claimer_ready(&self, org: &OrganizationId, token: InvitationToken) -> bool {
        self.claimers_ready.get(org).map(|s| s.contains(&token)).unwrap_or(false)
    }

    /// Clears the claimer's readiness flag whenever its phase-1 call ends,
    /// for any reason (success, cancellation, disconnect) — a `finally`
    /// block, since this is armed only after `mark_ready` fired and dropped
    /// unconditionally when the call's stack frame unwinds, including when
    /// the future itself is dropped mid-`.await`.
    fn ready_guard<'a>(&'a self, org: &OrganizationId, token: InvitationToken) -> ReadyGuard<'a> {
        ReadyGuard { registry: self, org: org.clone(), token, armed: false }
    }

    /// Rendezvous call for phase `state`. `greeter` is `Some(user_id)` for the
    /// greeter side, `None` for the claimer side.
    ///
    /// Returns `(peer_payload, is_last_exchange)` once both sides have
    /// deposited their payload for this phase.
    pub async fn exchange(
        &self,
        org: &OrganizationId,
        greeter: Option<UserId>,
        token: InvitationToken,
        state: ConduitState,
        payload: Vec<u8>,
        last: bool,
    ) -> InviteResult<(Vec<u8>, bool)> {
        let is_greeter = greeter.is_some();
        let mailbox = self.mailbox(org, token);
        // Stable for the mailbox's whole lifetime (resets preserve it), so it
        // can be fetched once and reused to register interest while the
        // mailbox lock is still held below.
        let notify_arc = mailbox.lock().notify.clone();
        let mut ready_guard = self.ready_guard(org, token);

        let result = loop {
            let mut mb = mailbox.lock();

            if mb.cancelled {
                break Err(InviteError::InvitationDeleted);
            }

            // Reset semantics: a claimer re-issuing phase 1 rewinds the
            // conduit, forcing the greeter's in-flight call to fail.
            if !is_greeter && state == ConduitState::State1WaitPeers && mb.state != ConduitState::State1WaitPeers {
                let notify = mb.notify.clone();
                *mb = Mailbox::fresh();
                mb.notify = notify;
                mb.notify.notify_waiters();
            }

            if let Some(completed) = &mut mb.completed {
                if completed.state == state {
                    let peer_payload = if is_greeter {
                        completed.greeter_taken = true;
                        completed.claimer_payload.clone()
                    } else {
                        completed.claimer_taken = true;
                        completed.greeter_payload.clone()
                    };
                    let is_last = completed.last;
                    if completed.greeter_taken && completed.claimer_taken {
                        mb.completed = None;
                    }
                    break Ok((peer_payload, is_last));
                }
            }

            if mb.state != state {
                break Err(InviteError::EnrollmentWrongState);
            }

            if is_greeter {
                if mb.greeter_payload.is_none() {
                    mb.greeter_payload = Some(payload.clone());
                    mb.greeter_last = last;
                }
            } else if mb.claimer_payload.is_none() {
                mb.claimer_payload = Some(payload.clone());
                // The claimer enters phase 1 as soon as it deposits its own
                // half, independent of whether the greeter has shown up yet
                // (spec.md §4.6: "When the claimer enters phase 1, status
                // flips to Ready").
                if state == ConduitState::State1WaitPeers {
                    self.mark_ready(org, token);
                    ready_guard.armed = true;
                }
            }

            if let (Some(gp), Some(cp)) = (mb.greeter_payload.clone(), mb.claimer_payload.clone()) {
                let completed_state = mb.state;
                mb.state = mb.state.next();
                mb.greeter_payload = None;
                mb.claimer_payload = None;
                let last = mb.greeter_last;
                mb.greeter_last = false;

                let peer_payload = if is_greeter { cp.clone() } else { gp.clone() };
                mb.completed = Some(CompletedExchange {
                    state: completed_state,
                    greeter_payload: gp,
                    claimer_payload: cp,
                    last,
                    greeter_taken: is_greeter,
                    claimer_taken: !is_greeter,
                });
                mb.notify.notify_waiters();
                break Ok((peer_payload, last));
            }

            // Registered while still holding `mb`: any peer mutation (which
            // also requires this lock) that happens after we unlock is
            // guaranteed not to be missed, per `Notify`'s contract.
            let notified = notify_arc.notified();
            drop(mb);
            notified.await;
        };

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> OrganizationId {
        OrganizationId::parse("Acme").unwrap()
    }

    #[tokio::test]
    async fn claimer_then_greeter_complete_phase_one() {
        let registry = ConduitRegistry::new();
        let token = InvitationToken::new();
        let greeter = UserId::new();

        let claimer_task = {
            let registry = &registry;
            async move {
                registry
                    .exchange(&org(), None, token, ConduitState::State1WaitPeers, b"claimer-hello".to_vec(), false)
                    .await
            }
        };
        let greeter_task = {
            let registry = &registry;
            async move {
                registry
                    .exchange(
                        &org(),
                        Some(greeter),
                        token,
                        ConduitState::State1WaitPeers,
                        b"greeter-hello".to_vec(),
                        false,
                    )
                    .await
            }
        };

        let (claimer_result, greeter_result) = tokio::join!(claimer_task, greeter_task);
        assert_eq!(claimer_result.unwrap().0, b"greeter-hello");
        assert_eq!(greeter_result.unwrap().0, b"claimer-hello");
        // The claimer's call has already returned, so readiness is cleared.
        assert!(!registry.is_claimer_ready(&org(), token));
    }

    #[tokio::test]
    async fn claimer_is_ready_as_soon_as_it_deposits_its_payload_before_the_greeter_arrives() {
        let registry = Arc::new(ConduitRegistry::new());
        let token = InvitationToken::new();
        let greeter = UserId::new();

        let claimer_registry = registry.clone();
        let claimer_task = tokio::spawn(async move {
            claimer_registry
                .exchange(&org(), None, token, ConduitState::State1WaitPeers, b"claimer-hello".to_vec(), false)
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(registry.is_claimer_ready(&org(), token));

        registry
            .exchange(&org(), Some(greeter), token, ConduitState::State1WaitPeers, b"greeter-hello".to_vec(), false)
            .await
            .unwrap();
        claimer_task.await.unwrap().unwrap();

        assert!(!registry.is_claimer_ready(&org(), token));
    }

    #[tokio::test]
    async fn claimer_readiness_is_cleared_when_its_call_is_cancelled_mid_wait() {
        let registry = Arc::new(ConduitRegistry::new());
        let token = InvitationToken::new();

        let claimer_registry = registry.clone();
        let claimer_task = tokio::spawn(async move {
            claimer_registry
                .exchange(&org(), None, token, ConduitState::State1WaitPeers, b"claimer-hello".to_vec(), false)
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(registry.is_claimer_ready(&org(), token));

        claimer_task.abort();
        let _ = claimer_task.await;
        // The aborted future is dropped mid-`.await`, which must still run
        // the guard's cleanup.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!registry.is_claimer_ready(&org(), token));
    }

    #[tokio::test]
    async fn wrong_phase_is_rejected() {
        let registry = ConduitRegistry::new();
        let token = InvitationToken::new();
        let greeter = UserId::new();
        let err = registry
            .exchange(
                &org(),
                Some(greeter),
                token,
                ConduitState::State31ClaimerTrust,
                b"x".to_vec(),
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err, InviteError::EnrollmentWrongState);
    }

    #[tokio::test]
    async fn claimer_restart_rewinds_and_rejects_stale_greeter_wait() {
        let registry = Arc::new(ConduitRegistry::new());
        let token = InvitationToken::new();
        let greeter = UserId::new();

        // Both peers complete phase 1 together; the conduit advances to 2.1.
        let (c1, g1) = tokio::join!(
            registry.exchange(&org(), None, token, ConduitState::State1WaitPeers, b"c1".to_vec(), false),
            registry.exchange(&org(), Some(greeter), token, ConduitState::State1WaitPeers, b"g1".to_vec(), false),
        );
        c1.unwrap();
        g1.unwrap();

        // The greeter moves on to phase 2.1 and waits for the claimer's half.
        let greeter_registry = registry.clone();
        let greeter_wait = tokio::spawn(async move {
            greeter_registry
                .exchange(
                    &org(),
                    Some(greeter),
                    token,
                    ConduitState::State21ClaimerHashedNonce,
                    b"g2".to_vec(),
                    false,
                )
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // The claimer disconnects and re-issues phase 1, rewinding the
        // conduit. Nobody else re-joins phase 1 in this test, so this call
        // itself parks forever; fire it in the background and only look at
        // its effect on the greeter's already in-flight wait.
        let restart_registry = registry.clone();
        tokio::spawn(async move {
            let _ = restart_registry
                .exchange(&org(), None, token, ConduitState::State1WaitPeers, b"c-restart".to_vec(), false)
                .await;
        });

        let greeter_outcome = greeter_wait.await.unwrap();
        assert_eq!(greeter_outcome.unwrap_err(), InviteError::EnrollmentWrongState);
    }

    #[tokio::test]
    async fn cancellation_wakes_the_waiting_party() {
        let registry = Arc::new(ConduitRegistry::new());
        let token = InvitationToken::new();
        let greeter = UserId::new();

        let waiter_registry = registry.clone();
        let waiter = tokio::spawn(async move {
            waiter_registry
                .exchange(&org(), Some(greeter), token, ConduitState::State1WaitPeers, b"g".to_vec(), false)
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        registry.cancel(&org(), token);

        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.unwrap_err(), InviteError::InvitationDeleted);
    }
}
