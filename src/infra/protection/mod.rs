// Implementations of the protection storage port.

pub mod in_memory_store;
pub mod sqlite_store;

// Re-export for convenience
#[allow(unused_imports)]
pub use in_memory_store::InMemoryProtectionStore;
pub use sqlite_store::SqliteProtectionStore;
