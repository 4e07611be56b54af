//! # Cache Module
//!
//! Disk-backed cache of transformed media.
//!
//! ## Layout
//!
//! ```text
//! <MEDIA_ROOT>/
//!   music/artist/<hash>.jpg     # provider artwork, pruned after CACHE_TTL
//!   music/artist/default.jpg    # protected fallback
//!   music/track/<hash>.jpg
//!   static/<group>/<hash>.<ext> # uploaded assets, never pruned
//! ```
//!
//! - [`key`]: normalization and hashing of lookup keys
//! - [`store`]: atomic reads/writes of entries
//! - [`pruner`]: scheduled TTL eviction
//!
//! The entry's file timestamp is its age; there is no separate index.

pub mod key;
pub mod pruner;
pub mod store;

pub use key::CacheKey;
pub use pruner::{PruneReport, Pruner};
pub use store::{CacheEntry, CacheStore, StoreError};
