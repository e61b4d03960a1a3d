//! The static `(family, major_version, command_name)` dispatch table
//! (spec.md §4.1, REDESIGN FLAGS: "generate a static dispatch table at
//! build time ... eliminates any runtime reflection").
//!
//! Built once, lazily, on first request rather than literally at compile
//! time (`once_cell::sync::Lazy` is the idiomatic stand-in for that here —
//! no const fn path exists for a `HashMap` of function pointers).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use once_cell::sync::Lazy;

use crate::handlers::{anonymous, authenticated, invited};
use crate::handlers::ClientContext;
use crate::state::AppState;
use crate::wire::Family;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type Handler = fn(AppState, ClientContext, Vec<u8>) -> BoxFuture<'static, Vec<u8>>;

macro_rules! handler {
    ($f:path) => {
        |state, ctx, body| Box::pin($f(state, ctx, body)) as BoxFuture<'static, Vec<u8>>
    };
}

static DISPATCH_TABLE: Lazy<HashMap<(Family, u32, &'static str), Handler>> = Lazy::new(|| {
    let mut table: HashMap<(Family, u32, &'static str), Handler> = HashMap::new();

    table.insert(
        (Family::Anonymous, 4, "organization_bootstrap"),
        handler!(anonymous::organization_bootstrap),
    );

    table.insert((Family::Invited, 4, "invite_info"), handler!(invited::invite_info));
    table.insert(
        (Family::Invited, 4, "invite_conduit_exchange"),
        handler!(invited::invite_conduit_exchange),
    );

    table.insert((Family::Authenticated, 4, "realm_create"), handler!(authenticated::realm_create));
    // `realm_unshare` is `realm_share` with `certificate.role == None`; both
    // wire command names route to the same handler (spec.md §4.4, DESIGN.md).
    table.insert((Family::Authenticated, 4, "realm_share"), handler!(authenticated::realm_share));
    table.insert((Family::Authenticated, 4, "realm_unshare"), handler!(authenticated::realm_share));
    table.insert(
        (Family::Authenticated, 4, "realm_rotate_key"),
        handler!(authenticated::realm_rotate_key),
    );
    table.insert(
        (Family::Authenticated, 4, "realm_get_stats"),
        handler!(authenticated::realm_get_stats),
    );
    table.insert(
        (Family::Authenticated, 4, "get_current_realms_for_user"),
        handler!(authenticated::get_current_realms_for_user),
    );

    table.insert((Family::Authenticated, 4, "vlob_create"), handler!(authenticated::vlob_create));
    table.insert((Family::Authenticated, 4, "vlob_update"), handler!(authenticated::vlob_update));
    table.insert(
        (Family::Authenticated, 4, "vlob_read_as_user"),
        handler!(authenticated::vlob_read_as_user),
    );
    table.insert(
        (Family::Authenticated, 4, "vlob_poll_changes_as_user"),
        handler!(authenticated::vlob_poll_changes_as_user),
    );

    table.insert((Family::Authenticated, 4, "block_create"), handler!(authenticated::block_create));
    table.insert((Family::Authenticated, 4, "block_read"), handler!(authenticated::block_read));

    table.insert((Family::Authenticated, 4, "invite_new_user"), handler!(authenticated::invite_new_user));
    table.insert(
        (Family::Authenticated, 4, "invite_new_device"),
        handler!(authenticated::invite_new_device),
    );
    table.insert((Family::Authenticated, 4, "invite_cancel"), handler!(authenticated::invite_cancel));
    table.insert((Family::Authenticated, 4, "invite_list"), handler!(authenticated::invite_list));

    table.insert((Family::Authenticated, 4, "ping"), handler!(authenticated::ping));

    table
});

pub fn lookup(family: Family, major_version: u32, command: &str) -> Option<Handler> {
    DISPATCH_TABLE.get(&(family, major_version, command)).copied()
}
