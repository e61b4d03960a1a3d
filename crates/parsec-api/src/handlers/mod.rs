//! Command handlers, one module per family (spec.md §4.1).
//!
//! Each handler exhaustively matches its engine's outcome to either an
//! `Ok`/error `Rep` variant or, for the handful of outcomes that are
//! protocol-level aborts even mid-handler (none currently — aborts all
//! happen during context construction), an `ApiError`.

pub mod anonymous;
pub mod authenticated;
pub mod invited;
pub mod sse;

use parsec_auth::{AnonymousClientContext, AuthenticatedClientContext, InvitedClientContext};

/// The context a handler runs with, built once by the dispatcher before the
/// handler is looked up, and unwrapped by each handler to the one variant
/// its registered `Family` guarantees it will receive.
#[derive(Clone)]
pub enum ClientContext {
    Anonymous(AnonymousClientContext),
    Invited(InvitedClientContext),
    Authenticated(AuthenticatedClientContext),
}

impl ClientContext {
    pub fn unwrap_authenticated(&self) -> &AuthenticatedClientContext {
        match self {
            ClientContext::Authenticated(ctx) => ctx,
            _ => unreachable!("dispatcher only routes authenticated commands with this context"),
        }
    }

    pub fn unwrap_invited(&self) -> &InvitedClientContext {
        match self {
            ClientContext::Invited(ctx) => ctx,
            _ => unreachable!("dispatcher only routes invited commands with this context"),
        }
    }

    pub fn unwrap_anonymous(&self) -> &AnonymousClientContext {
        match self {
            ClientContext::Anonymous(ctx) => ctx,
            _ => unreachable!("dispatcher only routes anonymous commands with this context"),
        }
    }
}
