//! Local cache of church data for offline use.
//!
//! Each collection is one JSON file stamped with `cached_at` and considered
//! stale after 60 minutes. With a passphrase, members, families and visitors
//! are encrypted at rest (see [`crypto`]).

pub mod crypto;
pub mod manager;

pub use crypto::{CacheCipher, CryptoError};
pub use manager::{CacheAges, CacheManager, CachedData};
