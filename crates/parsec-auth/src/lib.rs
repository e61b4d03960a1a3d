//! Client context construction and request authentication (spec.md §4.2).
//!
//! Every handler receives one of the three context types in [`context`] as
//! its first argument; building that context is this crate's entire job.

pub mod context;
pub mod error;

pub use context::{
    anonymous_context, authenticated_context, invited_context, AnonymousClientContext,
    AuthenticatedClientContext, AuthenticatedRequest, InvitedClientContext,
};
pub use error::{AuthError, AuthResult};
