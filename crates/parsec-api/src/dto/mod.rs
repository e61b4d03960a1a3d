//! Wire `Req`/`Rep` types, one module per command family (spec.md §4.1,
//! §4.2), plus the substructures shared across all of them.

pub mod anonymous;
pub mod authenticated;
pub mod common;
pub mod invited;

pub use anonymous::*;
pub use authenticated::*;
pub use common::*;
pub use invited::*;
