//! Persistence layer: record schemas, the [`Store`](store::Store) trait, and
//! its backends.

pub mod memory;
pub mod models;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod storage;
pub mod store;
