// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "protection/mod.rs"]
pub mod protection;
