#![forbid(unsafe_code)]

//! Foundation utilities shared across the tessera terminal crates.
//!
//! Currently this is home to the fixed-capacity [`LruCache`] used by the
//! image pool's name links and by host-side shaping/atlas caches. The cache
//! allocates all of its storage up front and never allocates again, which
//! matters because it sits on render-adjacent hot paths.

pub mod lru;

pub use lru::{CacheStats, LruCache, NotFound};
