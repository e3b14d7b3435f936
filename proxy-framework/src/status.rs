//! Proxy status reporting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FrameworkError, Result};

/// Proxy status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStatus {
    /// Proxy name.
    pub proxy: String,
    /// Proxy version.
    pub version: String,
    /// Current status ("running" or "offline").
    pub status: String,
    /// Additional metadata (served proxies, slave counts).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl ProxyStatus {
    /// Create a new status with "running" state.
    pub fn running(proxy: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(proxy, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(proxy: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(proxy, version, "offline")
    }

    fn with_state(proxy: impl Into<String>, version: impl Into<String>, state: &str) -> Self {
        Self {
            proxy: proxy.into(),
            version: version.into(),
            status: state.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Publishes the proxy status on startup and shutdown.
pub struct StatusPublisher {
    session: Arc<zenoh::Session>,
    key: String,
    proxy_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher writing to `key`.
    pub fn new(
        session: Arc<zenoh::Session>,
        key: impl Into<String>,
        proxy_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            session,
            key: key.into(),
            proxy_name: proxy_name.into(),
            version: version.into(),
        }
    }

    /// Key the status is published to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = ProxyStatus::running(&self.proxy_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        self.publish(&status).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        self.publish(&ProxyStatus::offline(&self.proxy_name, &self.version))
            .await
    }

    async fn publish(&self, status: &ProxyStatus) -> Result<()> {
        let payload = serde_json::to_vec(status)?;

        self.session
            .put(&self.key, payload)
            .await
            .map_err(|e| FrameworkError::Publish {
                key: self.key.clone(),
                message: e.to_string(),
            })
    }
}
