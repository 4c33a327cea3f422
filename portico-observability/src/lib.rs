pub mod request_log;
pub mod snapshotter;

pub use request_log::{LogEntry, LogFilter, LogStats, Observation, RequestLog};
pub use snapshotter::{Snapshotter, SNAPSHOT_INTERVAL_MS};
