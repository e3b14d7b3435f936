//! In-process [`RegisterStore`], used in tests and local runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::warn;

use proxy_common::{DataRow, SlaveRow};

use crate::error::{ProxyError, Result};
use crate::store::{AddressRange, DataQuery, RegisterStore, SlaveFilter};

/// A store holding its rows in memory.
///
/// Updates for rows that do not exist yet insert them, matching how a put
/// behaves against the Zenoh storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<DataRow>>,
    slaves: RwLock<Vec<SlaveRow>>,
    latency: RwLock<Option<Duration>>,
    offline: AtomicBool,
    queries: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a data row.
    pub async fn insert_data(&self, row: DataRow) {
        let mut data = self.data.write().await;
        match data.iter_mut().find(|r| same_register(r, &row)) {
            Some(existing) => *existing = row,
            None => data.push(row),
        }
    }

    /// Add a slave configuration row.
    pub async fn insert_slave(&self, row: SlaveRow) {
        self.slaves.write().await.push(row);
    }

    /// All data rows, in insertion order.
    pub async fn data_rows(&self) -> Vec<DataRow> {
        self.data.read().await.clone()
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// Make every call fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of data queries served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of data updates served.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    async fn simulate_link(&self) -> Result<()> {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProxyError::store("memory store is offline"));
        }
        Ok(())
    }
}

fn same_register(a: &DataRow, b: &DataRow) -> bool {
    a.ip_address == b.ip_address
        && a.ip_port == b.ip_port
        && a.slave_id == b.slave_id
        && a.register_type == b.register_type
        && a.register_address == b.register_address
}

impl RegisterStore for MemoryStore {
    async fn query_data(&self, query: &DataQuery) -> Result<Vec<DataRow>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_link().await?;

        let data = self.data.read().await;
        Ok(data.iter().filter(|r| query.matches(r)).cloned().collect())
    }

    async fn update_data(&self, query: &DataQuery, value: u16) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.simulate_link().await?;

        let AddressRange::Exact(address) = query.range else {
            return Err(ProxyError::store("updates must target a single address"));
        };

        let mut data = self.data.write().await;
        match data.iter_mut().find(|r| query.matches(r)) {
            Some(row) => row.register_data = value,
            None => {
                warn!(
                    unit_id = query.unit_id,
                    register_type = %query.register_type,
                    address,
                    "No row for written register, creating it"
                );
                data.push(DataRow {
                    ip_address: query.proxy.ip_address.clone(),
                    ip_port: query.proxy.ip_port,
                    slave_id: query.unit_id,
                    register_type: query.register_type,
                    register_address: address,
                    register_data: value,
                    timestamp: None,
                })
            }
        }
        Ok(())
    }

    async fn slave_rows(&self, filter: &SlaveFilter) -> Result<Vec<SlaveRow>> {
        self.simulate_link().await?;

        let slaves = self.slaves.read().await;
        Ok(slaves.iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProxyIdentity;
    use proxy_common::RegisterType;
    use tracing_test::traced_test;

    fn query(range: AddressRange) -> DataQuery {
        DataQuery {
            proxy: ProxyIdentity::new("10.0.0.1", 502),
            unit_id: 1,
            register_type: RegisterType::Coil,
            range,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_update_inserts_then_overwrites() {
        let store = MemoryStore::new();

        store.update_data(&query(AddressRange::Exact(4)), 1).await.unwrap();
        store.update_data(&query(AddressRange::Exact(4)), 0).await.unwrap();

        let rows = store.data_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].register_address, 4);
        assert_eq!(rows[0].register_data, 0);
        assert_eq!(store.update_count(), 2);
        assert!(logs_contain("No row for written register, creating it"));
    }

    #[tokio::test]
    async fn test_range_update_rejected() {
        let store = MemoryStore::new();
        let result = store
            .update_data(&query(AddressRange::Span { start: 0, end: 2 }), 1)
            .await;
        assert!(matches!(result, Err(ProxyError::Store(_))));
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let result = store.query_data(&query(AddressRange::Exact(0))).await;
        assert!(matches!(result, Err(ProxyError::Store(_))));
    }
}
