//! The two cache tiers backing the [`AssetProvider`](crate::provider::AssetProvider).
//!
//! # Disk cache
//!
//! The [`DiskCache`] is the durable source of truth. Every asset is stored as a single downsampled
//! JPEG file below `<cache_dir>/movie-assets/`, named after the hex-encoded SHA-256 hash of its
//! [`AssetId`](crate::AssetId) (see [`CacheKey`]). Hashing keeps arbitrary ids, including ones
//! containing `/` or `..`, inside the cache directory.
//!
//! Files are written into `<cache_dir>/tmp/` first, validated, and then atomically renamed into
//! place. A file that exists under its final name therefore always contains a complete image. Any
//! file that fails to decode anyway is treated as a cache miss, never as an error.
//!
//! Entries use a "time to idle" expiry: a hit bumps the file `mtime` at most once per hour, and
//! [`DiskCache::cleanup`] removes files that have not been used for `max_unused_for`.
//!
//! # In-memory cache
//!
//! The [`MemoryCache`] keeps decoded assets around, bounded by the total size of their pixel
//! buffers. It is purely an accelerator and may be emptied at any time. Only the
//! [`AssetProvider`](crate::provider::AssetProvider) writes into it, and only resolved assets.

mod cache_error;
mod cache_key;
mod cleanup;
mod fs;
mod memory;


pub use cache_error::{AssetEntry, AssetError};
pub use cache_key::CacheKey;
pub use cleanup::CleanupStats;
pub use fs::{ASSETS_DIR, DiskCache, TMP_DIR};
pub use memory::MemoryCache;
