//! Pages (tabs) and what happens when one opens in an alternate partition.

mod orchestrator;
mod page;
mod registry;

pub use orchestrator::{PageOutcome, TabOrchestrator};
pub use page::{page_host, PageEvent, PageId, PageInfo};
pub use registry::{InMemoryTabs, PageEvents, TabRegistry, TabRegistryHandle};
