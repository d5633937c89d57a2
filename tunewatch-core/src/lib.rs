//! Tunewatch Core - Shared Types
//!
//! Pure data structures shared by the server cache and the client resilience
//! tier: cache keys and the request fingerprinter, caller identity, priority
//! tiers, per-route cache configuration, the clock abstraction and the error
//! taxonomy. No I/O lives here.

mod clock;
mod error;
mod fingerprint;
mod identity;
mod priority;
mod route;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    CacheError, ConfigError, FetchError, KvError, RetryError, TunewatchError, TunewatchResult,
};
pub use fingerprint::{canonical_json, escape_segment, fingerprint, CacheKey, QueryParams};
pub use identity::{Principal, ANONYMOUS_PRINCIPAL};
pub use priority::Priority;
pub use route::{RouteCacheConfig, RouteRule, RouteTable};

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds, as carried on the wire and in config files.
pub type DurationMs = u64;
