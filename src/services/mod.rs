pub mod cache;
pub mod rate_limiter;

pub use cache::{
    CacheBackend, CacheEntry, CacheKey, FileCache, MemoryCache, ResultCache, DEFAULT_CACHE_TTL,
    DEFAULT_FLUSH_INTERVAL,
};
pub use rate_limiter::RateLimiter;
