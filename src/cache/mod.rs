//! Process-wide TTL cache and the cache-aside lookups built on it.
//!
//! The cache holds no authoritative data: every entry is reconstructible
//! from the backing store, so it is safe to flush or evict at any time.
//! - `store` is the raw key/value cache with per-entry TTL and stats
//! - `lookup` layers read-through preference/mapping queries on top
//! - `manage` exposes the purge/flush/stats operations used by event
//!   handlers and the admin HTTP surface

pub mod lookup;
pub mod manage;
pub mod store;

pub use lookup::{CachedLookup, ChannelMapping, ChannelPreference, MappingFilter};
pub use store::{CacheStats, IssueCache, Ttl};
