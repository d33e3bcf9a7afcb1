//! csync keeps private-browsing partitions logged in to a chosen set of sites.
//!
//! Cookie changes in the normal partition are coalesced by a durable debounce
//! pipeline and replayed, together with localStorage, into every alternate
//! partition. All browser-facing pieces are traits so the engine can be driven by
//! a real host or by the in-memory implementations shipped here.
pub mod engine;

pub use engine::*;
