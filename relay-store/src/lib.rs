//! Session storage for assistant-relay.
//!
//! Maps a chat channel identifier to the provider thread that carries its
//! conversation. Backends:
//! - `SqliteThreadStore`: durable, survives restarts
//! - `MemoryThreadStore`: process-local, for tests and throwaway runs

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryThreadStore;
pub use sqlite::SqliteThreadStore;
pub use traits::{PersistenceError, Session, StoreResult, ThreadStore};
