//! External key-value parameter store
//!
//! The kill switch and the monthly token counter are process-wide across
//! every worker, so they live outside the process: SSM Parameter Store in
//! production, an in-memory map in development and tests.

use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait ParamStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<String>>;
    async fn put(&self, name: &str, value: &str) -> anyhow::Result<()>;
}

/// In-memory store for development and tests.
#[derive(Default)]
pub struct MemoryParamStore {
    values: DashMap<String, String>,
}

impl MemoryParamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParamStore for MemoryParamStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.get(name).map(|v| v.value().clone()))
    }

    async fn put(&self, name: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// SSM-backed store used in production.
pub struct SsmParamStore {
    client: aws_sdk_ssm::Client,
}

impl SsmParamStore {
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_ssm::Client::new(&config),
        }
    }
}

#[async_trait]
impl ParamStore for SsmParamStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<String>> {
        match self.client.get_parameter().name(name).send().await {
            Ok(out) => Ok(out.parameter.and_then(|p| p.value)),
            Err(e) => {
                // Unreadable parameter (missing, IAM) degrades to "unset";
                // the caller decides whether that is fatal.
                tracing::debug!(name, error = %e, "ssm get failed");
                Ok(None)
            }
        }
    }

    async fn put(&self, name: &str, value: &str) -> anyhow::Result<()> {
        self.client
            .put_parameter()
            .name(name)
            .value(value)
            .overwrite(true)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ssm put failed for {name}: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryParamStore::new();
        assert_eq!(store.get("/kenter/x").await.unwrap(), None);
        store.put("/kenter/x", "42").await.unwrap();
        assert_eq!(store.get("/kenter/x").await.unwrap().as_deref(), Some("42"));
        store.put("/kenter/x", "43").await.unwrap();
        assert_eq!(store.get("/kenter/x").await.unwrap().as_deref(), Some("43"));
    }
}
