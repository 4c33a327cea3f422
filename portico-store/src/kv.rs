use async_trait::async_trait;
use portico_core::GatewayError;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The external key-value store seam.
///
/// Keys are structured segment tuples; the implementation decides how to
/// join them (etcd uses `/`-joined paths under a root prefix). Values are
/// opaque bytes; the typed layer lives in [`crate::adapter::KvAdapter`].
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[&str]) -> Result<Option<Vec<u8>>, GatewayError>;

    async fn set(&self, key: &[&str], value: Vec<u8>) -> Result<(), GatewayError>;

    /// Returns true iff the key existed.
    async fn delete(&self, key: &[&str]) -> Result<bool, GatewayError>;

    /// All entries under the key prefix, in key order.
    async fn list(&self, prefix: &[&str]) -> Result<Vec<(String, Vec<u8>)>, GatewayError>;
}

/// In-memory store: the no-etcd fallback and the test backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn join(key: &[&str]) -> String {
        key.join("/")
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &[&str]) -> Result<Option<Vec<u8>>, GatewayError> {
        Ok(self.entries.lock().unwrap().get(&Self::join(key)).cloned())
    }

    async fn set(&self, key: &[&str], value: Vec<u8>) -> Result<(), GatewayError> {
        self.entries.lock().unwrap().insert(Self::join(key), value);
        Ok(())
    }

    async fn delete(&self, key: &[&str]) -> Result<bool, GatewayError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .remove(&Self::join(key))
            .is_some())
    }

    async fn list(&self, prefix: &[&str]) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        let prefix = format!("{}/", Self::join(prefix));
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
