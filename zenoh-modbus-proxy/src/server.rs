//! Unit-id table of the slaves behind one proxy address.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use tracing::{error, info, warn};

use proxy_common::SlaveRow;

use crate::error::Result;
use crate::slave::{SlaveContext, SlaveOptions};
use crate::store::{ProxyIdentity, RegisterStore, SlaveFilter};

/// Unit ids a Modbus slave may answer on.
pub const UNIT_IDS: RangeInclusive<u8> = 1..=254;

/// Slave contexts keyed by unit id, built once at startup.
#[derive(Debug)]
pub struct ServerContext<S> {
    slaves: BTreeMap<u8, SlaveContext<S>>,
}

impl<S: RegisterStore> ServerContext<S> {
    /// Load configuration rows from the store and build the table.
    ///
    /// With a proxy address, only that address's rows are used; otherwise
    /// every row carrying a unit id.
    pub async fn discover(
        store: Arc<S>,
        proxy_address: Option<&str>,
        options: &SlaveOptions,
    ) -> Result<Self> {
        let filter = match proxy_address {
            Some(address) => SlaveFilter::ProxyAddress(address.to_string()),
            None => SlaveFilter::AnyUnit,
        };
        let rows = store.slave_rows(&filter).await?;
        Ok(Self::from_rows(&rows, store, options))
    }

    /// Build the table from configuration rows, in row order.
    ///
    /// The first row for a unit id wins; later ones are dropped.
    pub fn from_rows(rows: &[SlaveRow], store: Arc<S>, options: &SlaveOptions) -> Self {
        let mut slaves = BTreeMap::new();

        for row in rows {
            let Some(unit_id) = row.slave_id else {
                warn!(ip_address = %row.ip_address, "Skipping slave row without unit id");
                continue;
            };

            if !UNIT_IDS.contains(&unit_id) {
                error!(
                    unit_id,
                    ip_address = %row.ip_address,
                    "Unit id out of range, skipping slave row"
                );
                continue;
            }

            if slaves.contains_key(&unit_id) {
                warn!(
                    unit_id,
                    ip_address = %row.ip_address,
                    "Duplicate unit id, keeping the first slave"
                );
                continue;
            }

            let context = SlaveContext::from_row(row, unit_id, store.clone(), options);
            slaves.insert(unit_id, context);
        }

        info!(slaves = slaves.len(), "Server context ready");

        Self { slaves }
    }

    pub fn slave(&self, unit_id: u8) -> Option<&SlaveContext<S>> {
        self.slaves.get(&unit_id)
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.slaves.keys().copied()
    }

    pub fn slaves(&self) -> impl Iterator<Item = &SlaveContext<S>> {
        self.slaves.values()
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }
}

/// Distinct proxy addresses found in the configuration rows.
///
/// Each address is served on the port of its first row; a later row with
/// the same address and another port is reported and ignored.
pub async fn discover_proxies<S: RegisterStore>(
    store: &S,
    proxy_address: Option<&str>,
) -> Result<Vec<ProxyIdentity>> {
    let filter = match proxy_address {
        Some(address) => SlaveFilter::ProxyAddress(address.to_string()),
        None => SlaveFilter::AnyAddress,
    };
    let rows = store.slave_rows(&filter).await?;

    let mut proxies: Vec<ProxyIdentity> = Vec::new();
    for row in rows.iter().filter(|r| !r.ip_address.is_empty()) {
        match proxies.iter().find(|p| p.ip_address == row.ip_address) {
            Some(existing) if existing.ip_port != row.ip_port => warn!(
                ip_address = %row.ip_address,
                port = row.ip_port,
                serving_port = existing.ip_port,
                "Proxy address configured with several ports"
            ),
            Some(_) => {}
            None => proxies.push(ProxyIdentity::new(row.ip_address.clone(), row.ip_port)),
        }
    }

    Ok(proxies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn row(ip_address: &str, port: u16, unit_id: Option<u8>, template: &str) -> SlaveRow {
        SlaveRow {
            ip_address: ip_address.to_string(),
            ip_port: port,
            slave_id: unit_id,
            config_file: template.to_string(),
            mobile_id: None,
            last_report_time: None,
        }
    }

    #[test]
    fn test_duplicate_unit_id_first_wins() {
        let rows = vec![
            row("10.0.0.1", 502, Some(3), "/*DEVICE;VendorName=First"),
            row("10.0.0.1", 502, Some(4), ""),
            row("10.0.0.1", 502, Some(3), "/*DEVICE;VendorName=Second"),
            row("10.0.0.1", 502, None, ""),
        ];

        let context = ServerContext::from_rows(
            &rows,
            Arc::new(MemoryStore::new()),
            &SlaveOptions::default(),
        );

        assert_eq!(context.len(), 2);
        assert_eq!(context.unit_ids().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(
            context.slave(3).unwrap().identity().vendor_name.as_deref(),
            Some("First")
        );
        assert!(context.slave(5).is_none());
    }

    #[test]
    fn test_out_of_range_unit_ids_skipped() {
        let rows = vec![
            row("10.0.0.1", 502, Some(0), ""),
            row("10.0.0.1", 502, Some(255), ""),
            row("10.0.0.1", 502, Some(1), ""),
            row("10.0.0.1", 502, Some(254), ""),
        ];

        let context = ServerContext::from_rows(
            &rows,
            Arc::new(MemoryStore::new()),
            &SlaveOptions::default(),
        );

        assert_eq!(context.unit_ids().collect::<Vec<_>>(), vec![1, 254]);
    }

    #[tokio::test]
    async fn test_discover_filters_by_address() {
        let store = Arc::new(MemoryStore::new());
        store.insert_slave(row("10.0.0.1", 502, Some(1), "")).await;
        store.insert_slave(row("10.0.0.2", 502, Some(2), "")).await;
        store.insert_slave(row("", 502, Some(7), "")).await;

        let context = tokio_test::assert_ok!(
            ServerContext::discover(store.clone(), Some("10.0.0.1"), &SlaveOptions::default())
                .await
        );
        assert_eq!(context.unit_ids().collect::<Vec<_>>(), vec![1]);

        let context = ServerContext::discover(store, None, &SlaveOptions::default())
            .await
            .unwrap();
        assert_eq!(context.unit_ids().collect::<Vec<_>>(), vec![1, 2, 7]);
    }

    #[tokio::test]
    async fn test_discover_proxies() {
        let store = MemoryStore::new();
        store.insert_slave(row("10.0.0.1", 502, Some(1), "")).await;
        store.insert_slave(row("10.0.0.1", 502, Some(2), "")).await;
        store.insert_slave(row("10.0.0.1", 1502, Some(3), "")).await;
        store.insert_slave(row("10.0.0.2", 5020, Some(1), "")).await;
        store.insert_slave(row("", 502, Some(9), "")).await;

        let proxies = discover_proxies(&store, None).await.unwrap();
        assert_eq!(
            proxies,
            vec![
                ProxyIdentity::new("10.0.0.1", 502),
                ProxyIdentity::new("10.0.0.2", 5020),
            ]
        );

        let proxies = discover_proxies(&store, Some("10.0.0.2")).await.unwrap();
        assert_eq!(proxies, vec![ProxyIdentity::new("10.0.0.2", 5020)]);
    }
}
