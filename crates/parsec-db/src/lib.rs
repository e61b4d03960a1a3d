//! Transactional datamodel: entity structs, the [`Datamodel`] trait engines
//! consume, and the in-memory / PostgreSQL backends that implement it.

pub mod blockstore;
pub mod datamodel;
pub mod error;
pub mod locks;
pub mod memory;
pub mod model;
pub mod sql;

pub use blockstore::{Blockstore, MemoryBlockstore, Raid5Blockstore};
pub use datamodel::Datamodel;
pub use error::{DbError, DbResult};
pub use locks::{LockGuard, LockTable, LockTopic};
pub use memory::MemoryDatamodel;
pub use sql::SqlDatamodel;
