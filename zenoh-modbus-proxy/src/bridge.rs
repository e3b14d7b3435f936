//! Reads and writes of one slave's registers against the remote store.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use proxy_common::{DataRow, RegisterType, Timestamp};

use crate::error::{ProxyError, Result};
use crate::store::{AddressRange, DataQuery, ProxyIdentity, RegisterStore};

/// What a sequential read serves for addresses the store has no row for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapFill {
    /// Serve this value with no timestamp.
    Value(u16),
    /// Fail the read.
    Disabled,
}

impl Default for GapFill {
    fn default() -> Self {
        GapFill::Value(0)
    }
}

/// A register value and the time the field reported it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub value: u16,
    pub timestamp: Option<Timestamp>,
}

impl From<&DataRow> for Sample {
    fn from(row: &DataRow) -> Self {
        Self {
            value: row.register_data,
            timestamp: row.timestamp,
        }
    }
}

/// Store access scoped to one slave.
#[derive(Debug)]
pub struct StoreBridge<S> {
    store: Arc<S>,
    proxy: ProxyIdentity,
    unit_id: u8,
    gap_fill: GapFill,
    timeout: Duration,
}

impl<S: RegisterStore> StoreBridge<S> {
    pub fn new(
        store: Arc<S>,
        proxy: ProxyIdentity,
        unit_id: u8,
        gap_fill: GapFill,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            proxy,
            unit_id,
            gap_fill,
            timeout,
        }
    }

    pub fn proxy(&self) -> &ProxyIdentity {
        &self.proxy
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Read `count` contiguous registers.
    ///
    /// Always yields `count` samples; addresses without a row are filled
    /// according to the gap-fill policy.
    pub async fn read_sequential(
        &self,
        register_type: RegisterType,
        address: u32,
        count: u32,
    ) -> Result<Vec<Sample>> {
        let mut rows = self.read(register_type, address, count).await?;

        (address..address + count)
            .map(|a| match rows.remove(&a) {
                Some(sample) => Ok(sample),
                None => match self.gap_fill {
                    GapFill::Value(value) => {
                        info!(
                            unit_id = self.unit_id,
                            %register_type,
                            address = a,
                            value,
                            "Filling missing register"
                        );
                        Ok(Sample {
                            value,
                            timestamp: None,
                        })
                    }
                    GapFill::Disabled => Err(ProxyError::DataIntegrity {
                        register_type,
                        address: a,
                    }),
                },
            })
            .collect()
    }

    /// Read the registers in `[address, address + count)` the store holds.
    ///
    /// Missing addresses are absent from the result.
    pub async fn read_sparse(
        &self,
        register_type: RegisterType,
        address: u32,
        count: u32,
    ) -> Result<BTreeMap<u32, Sample>> {
        self.read(register_type, address, count).await
    }

    /// Update one register.
    pub async fn write(&self, register_type: RegisterType, address: u32, value: u16) -> Result<()> {
        let query = self.query(register_type, AddressRange::Exact(address));
        debug!(
            proxy = %self.proxy,
            unit_id = self.unit_id,
            %register_type,
            address,
            value,
            "Writing register"
        );
        self.with_timeout(self.store.update_data(&query, value))
            .await
    }

    async fn read(
        &self,
        register_type: RegisterType,
        address: u32,
        count: u32,
    ) -> Result<BTreeMap<u32, Sample>> {
        let query = self.query(register_type, AddressRange::for_request(address, count));
        let rows = self.with_timeout(self.store.query_data(&query)).await?;

        let samples: BTreeMap<u32, Sample> = rows
            .iter()
            .filter(|row| query.matches(row))
            .map(|row| (row.register_address, Sample::from(row)))
            .collect();

        if samples.len() != count as usize {
            warn!(
                proxy = %self.proxy,
                unit_id = self.unit_id,
                %register_type,
                address,
                requested = count,
                returned = samples.len(),
                "Register count mismatch"
            );
        }

        Ok(samples)
    }

    fn query(&self, register_type: RegisterType, range: AddressRange) -> DataQuery {
        DataQuery {
            proxy: self.proxy.clone(),
            unit_id: self.unit_id,
            register_type,
            range,
        }
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use tracing_test::traced_test;

    fn row(address: u32, value: u16) -> DataRow {
        DataRow {
            ip_address: "192.168.1.200".to_string(),
            ip_port: 502,
            slave_id: 1,
            register_type: RegisterType::Holding,
            register_address: address,
            register_data: value,
            timestamp: Some("2019-01-21T07:00:00Z".parse().unwrap()),
        }
    }

    async fn bridge_with(rows: Vec<DataRow>, gap_fill: GapFill) -> StoreBridge<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for r in rows {
            store.insert_data(r).await;
        }
        StoreBridge::new(
            store,
            ProxyIdentity::new("192.168.1.200", 502),
            1,
            gap_fill,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_sequential_gap_fill() {
        let bridge = bridge_with(
            vec![row(5, 50), row(7, 70), row(9, 90)],
            GapFill::Value(0),
        )
        .await;

        let samples = bridge
            .read_sequential(RegisterType::Holding, 5, 5)
            .await
            .unwrap();
        let values: Vec<u16> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![50, 0, 70, 0, 90]);
        assert!(samples[0].timestamp.is_some());
        assert!(samples[1].timestamp.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_short_read_is_reported() {
        let bridge = bridge_with(
            vec![row(5, 50), row(7, 70), row(9, 90)],
            GapFill::Value(0),
        )
        .await;

        let samples = bridge
            .read_sequential(RegisterType::Holding, 5, 5)
            .await
            .unwrap();
        assert_eq!(samples.len(), 5);

        assert!(logs_contain("Register count mismatch"));
        assert!(logs_contain("requested=5"));
        assert!(logs_contain("returned=3"));
        assert!(logs_contain("Filling missing register"));
    }

    #[tokio::test]
    async fn test_sequential_gap_fill_disabled() {
        let bridge = bridge_with(vec![row(5, 50), row(7, 70)], GapFill::Disabled).await;

        let result = bridge.read_sequential(RegisterType::Holding, 5, 3).await;
        assert!(matches!(
            result,
            Err(ProxyError::DataIntegrity { address: 6, .. })
        ));
    }

    #[tokio::test]
    async fn test_sparse_omits_missing() {
        let bridge = bridge_with(vec![row(5, 50), row(9, 90)], GapFill::Value(0)).await;

        let samples = bridge
            .read_sparse(RegisterType::Holding, 5, 5)
            .await
            .unwrap();
        assert_eq!(samples.keys().copied().collect::<Vec<_>>(), vec![5, 9]);
    }

    #[tokio::test]
    async fn test_single_register_uses_exact_filter() {
        let bridge = bridge_with(vec![row(5, 50), row(6, 60)], GapFill::Disabled).await;

        let samples = bridge
            .read_sequential(RegisterType::Holding, 6, 1)
            .await
            .unwrap();
        assert_eq!(samples, vec![Sample::from(&row(6, 60))]);
    }

    #[tokio::test]
    async fn test_other_slaves_ignored() {
        let mut foreign = row(5, 999);
        foreign.slave_id = 2;
        let bridge = bridge_with(vec![foreign], GapFill::Value(7)).await;

        let samples = bridge
            .read_sequential(RegisterType::Holding, 5, 1)
            .await
            .unwrap();
        assert_eq!(samples[0].value, 7);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let bridge = bridge_with(vec![row(5, 50)], GapFill::Disabled).await;

        bridge.write(RegisterType::Holding, 5, 55).await.unwrap();
        let samples = bridge
            .read_sequential(RegisterType::Holding, 5, 1)
            .await
            .unwrap();
        assert_eq!(samples[0].value, 55);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let bridge = bridge_with(vec![row(5, 50)], GapFill::Value(0)).await;
        bridge
            .store
            .set_latency(Some(Duration::from_millis(500)))
            .await;

        let result = bridge.read_sequential(RegisterType::Holding, 5, 1).await;
        assert!(matches!(result, Err(ProxyError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let bridge = bridge_with(vec![row(5, 50)], GapFill::Value(0)).await;
        bridge.store.set_offline(true);

        let result = bridge.write(RegisterType::Holding, 5, 1).await;
        assert!(matches!(result, Err(ProxyError::Store(_))));
    }
}
