//! Thumbnail cache synchronisation for courier.
//!
//! Jobs report every successful move, copy and delete to a shared
//! [`ThumbnailCache`], which relocates, duplicates or drops the cached
//! previews so they keep following their files. Entries are keyed by a
//! stable identity string of the file (see [`cache_key`]).

mod cache;
mod disk;
mod store;

pub use cache::{cache_key, ThumbnailCache};
pub use disk::DiskStore;
pub use store::{MemoryStore, StoreError, ThumbnailEntry, ThumbnailStore};
