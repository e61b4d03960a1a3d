//! Invitation lifecycle and conduit rendezvous state machine (spec.md §4.6).
//!
//! [`invitation::InviteOps`] owns both halves: the persisted lifecycle
//! (`new_for_user`/`new_for_device`/`cancel`/`list`/`info_as_invited`) and the
//! ephemeral [`conduit::ConduitRegistry`] that brokers the six-phase
//! greeter/claimer handshake.

pub mod conduit;
pub mod error;
pub mod invitation;

pub use conduit::ConduitRegistry;
pub use error::{InviteError, InviteResult};
pub use invitation::{Author, InviteOps};
