//! Post sources for the harvester: the pull-based source abstraction, the
//! filtered fetch loop, author discovery, and an HTTP client for the v1.1
//! REST API.

pub mod api;
pub mod discovery;
pub mod fetcher;
pub mod memory;
pub mod metrics;
pub mod rate_limiter;
pub mod source;


pub use api::{ApiPostSource, Endpoint, SearchApiClient};
pub use discovery::{DiscoveryOutcome, Qualifier, UserDiscovery};
pub use fetcher::{backfill, fetch, fetch_posts, FetchOutcome, FetchStatus, FilterDecision, PostFilter};
pub use memory::{InMemoryProvider, VecSource};
pub use metrics::{ApiMetrics, MetricsCollector};
pub use rate_limiter::{RateLimitConfig, RateLimitReport, RateLimitStatus, RateLimiter};
pub use source::{PostLookup, PostProvider, PostSource, SearchQuery};
