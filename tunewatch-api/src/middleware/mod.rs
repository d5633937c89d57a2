//! HTTP middleware: caller identity, response caching and write invalidation.

mod invalidation;
mod principal;
mod response_cache;

pub use invalidation::{invalidation_middleware, InvalidationState, X_CACHE_INVALIDATED};
pub use principal::{principal_middleware, TrustedPrincipalHeader};
pub use response_cache::{
    response_cache_middleware, CacheStatus, CachedResponse, X_CACHE, X_CACHE_KEY, X_SKIP_CACHE,
};
