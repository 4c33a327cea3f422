pub mod adapter;
pub mod etcd;
pub mod kv;
pub mod schema;

pub use adapter::{KvAdapter, MetricsSnapshot, ShellExcludeEntry, MAX_HISTORY};
pub use etcd::EtcdStore;
pub use kv::{KvStore, MemoryStore};
pub use schema::Schema;
