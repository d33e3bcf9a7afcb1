//! Storage primitives.
//!
//! Two different things live here:
//!
//! - [`StorageArea`]: a page's own localStorage, as seen by the agent running
//!   inside that page.
//! - [`DurableStore`]: the host's durable key/value space that survives engine
//!   restarts. The origin cache, the pending change set and persisted timers
//!   all live in it.

mod area;
mod durable;
mod types;

pub use area::{InMemoryArea, StorageArea};
pub use durable::in_memory::InMemoryDurableStore;
pub use durable::json::JsonFileStore;
#[cfg(feature = "sqlite_store")]
pub use durable::sqlite::SqliteDurableStore;
pub use durable::{DurableStore, DurableStoreHandle};
pub use types::StorageItem;
