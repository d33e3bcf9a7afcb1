//! Cookies: partition ids, cookie records, the [`CookieStore`] host trait and
//! an in-memory backend.

mod cookies;
mod store;

pub use cookies::{ChangeCause, CookieChange, CookieKey, CookieRecord, CookieWrite, PartitionId, SameSite};

pub use store::CookieChanges;
pub use store::CookieStore;
pub use store::CookieStoreHandle;
pub use store::InMemoryCookieStore;
