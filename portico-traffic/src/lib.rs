pub mod cors;
pub mod limiter;

pub use cors::CorsPolicy;
pub use limiter::{BucketSnapshot, Decision, LimiterMetrics, RateLimiter};
