use crate::kv::KvStore;
use crate::schema::Schema;
use async_trait::async_trait;
use portico_core::GatewayError;
use tracing::info;

/// etcd-backed [`KvStore`].
///
/// Structured key segments are joined into `/`-separated paths under the
/// configured root prefix. The client handle is cheap to clone; every
/// operation clones it because the etcd API takes `&mut self`.
pub struct EtcdStore {
    client: etcd_client::Client,
    schema: Schema,
}

impl EtcdStore {
    /// Connect to etcd.
    pub async fn connect(endpoints: &[String], prefix: &str) -> anyhow::Result<Self> {
        let client = etcd_client::Client::connect(endpoints, None).await?;
        info!("Connected to etcd at {:?}", endpoints);
        Ok(Self {
            client,
            schema: Schema::new(prefix),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &[&str]) -> Result<Option<Vec<u8>>, GatewayError> {
        let key = self.schema.key(key);
        let resp = self
            .client
            .clone()
            .get(key.as_bytes(), None)
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn set(&self, key: &[&str], value: Vec<u8>) -> Result<(), GatewayError> {
        let key = self.schema.key(key);
        self.client
            .clone()
            .put(key, value, None)
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &[&str]) -> Result<bool, GatewayError> {
        let key = self.schema.key(key);
        let resp = self
            .client
            .clone()
            .delete(key, None)
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?;
        Ok(resp.deleted() > 0)
    }

    async fn list(&self, prefix: &[&str]) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        let prefix = self.schema.prefix(prefix);
        let resp = self
            .client
            .clone()
            .get(
                prefix.as_bytes(),
                Some(etcd_client::GetOptions::new().with_prefix()),
            )
            .await
            .map_err(|e| GatewayError::Store(e.to_string()))?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }
}
