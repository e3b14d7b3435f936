//! [`RegisterStore`] over a Zenoh storage.
//!
//! Rows are kept as serialized [`DataRow`]/[`SlaveRow`] values under the
//! keys built by [`KeyExprBuilder`]. Queries are Zenoh `get`s over a key or
//! wildcard, filtered client-side; updates are `put`s of the whole row.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use zenoh::Session;

use proxy_common::{DataRow, Format, KeyExprBuilder, SlaveRow, decode_auto, encode};

use crate::error::{ProxyError, Result};
use crate::store::{AddressRange, DataQuery, RegisterStore, SlaveFilter};

/// Store backed by a Zenoh session.
pub struct ZenohStore {
    session: Arc<Session>,
    keys: KeyExprBuilder,
    format: Format,
    query_timeout: Duration,
}

impl ZenohStore {
    pub fn new(
        session: Arc<Session>,
        keys: KeyExprBuilder,
        format: Format,
        query_timeout: Duration,
    ) -> Self {
        Self {
            session,
            keys,
            format,
            query_timeout,
        }
    }

    /// Decode every reply to `selector`, skipping undecodable ones.
    async fn fetch<T: DeserializeOwned>(&self, selector: &str) -> Result<Vec<T>> {
        let replies = self
            .session
            .get(selector)
            .timeout(self.query_timeout)
            .await?;

        let mut values = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let payload = sample.payload().to_bytes();
                    match decode_auto::<T>(&payload) {
                        Ok(value) => values.push(value),
                        Err(e) => warn!(
                            key = %sample.key_expr(),
                            error = %e,
                            "Skipping undecodable row"
                        ),
                    }
                }
                Err(err) => {
                    let reason = err
                        .payload()
                        .try_to_string()
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| "<binary>".to_string());
                    warn!(selector, error = %reason, "Store replied with an error");
                }
            }
        }

        debug!(selector, rows = values.len(), "Store query complete");
        Ok(values)
    }
}

/// Key (single address) or wildcard (address range) selecting `query`'s rows.
pub fn data_selector(keys: &KeyExprBuilder, query: &DataQuery) -> String {
    let proxy = &query.proxy;
    match query.range {
        AddressRange::Exact(address) => keys.data_key(
            &proxy.ip_address,
            proxy.ip_port,
            query.unit_id,
            query.register_type,
            address,
        ),
        AddressRange::Span { .. } => keys.data_type_wildcard(
            &proxy.ip_address,
            proxy.ip_port,
            query.unit_id,
            query.register_type,
        ),
    }
}

impl RegisterStore for ZenohStore {
    async fn query_data(&self, query: &DataQuery) -> Result<Vec<DataRow>> {
        let selector = data_selector(&self.keys, query);
        let rows: Vec<DataRow> = self.fetch(&selector).await?;
        Ok(rows.into_iter().filter(|r| query.matches(r)).collect())
    }

    async fn update_data(&self, query: &DataQuery, value: u16) -> Result<()> {
        let AddressRange::Exact(address) = query.range else {
            return Err(ProxyError::store("updates must target a single address"));
        };

        let key = data_selector(&self.keys, query);

        // Keep the stored timestamp; only the value changes
        let existing: Vec<DataRow> = self.fetch(&key).await?;
        let row = match existing.into_iter().find(|r| query.matches(r)) {
            Some(mut row) => {
                row.register_data = value;
                row
            }
            None => {
                warn!(key = %key, "No row for written register, creating it");
                DataRow {
                    ip_address: query.proxy.ip_address.clone(),
                    ip_port: query.proxy.ip_port,
                    slave_id: query.unit_id,
                    register_type: query.register_type,
                    register_address: address,
                    register_data: value,
                    timestamp: None,
                }
            }
        };

        let payload = encode(&row, self.format)?;
        self.session
            .put(&key, payload)
            .await
            .map_err(|e| ProxyError::store(format!("Failed to put {}: {}", key, e)))
    }

    async fn slave_rows(&self, filter: &SlaveFilter) -> Result<Vec<SlaveRow>> {
        let selector = match filter {
            SlaveFilter::ProxyAddress(address) => self.keys.rtus_for_address(address),
            SlaveFilter::AnyUnit | SlaveFilter::AnyAddress => self.keys.rtus_wildcard(),
        };
        let rows: Vec<SlaveRow> = self.fetch(&selector).await?;
        Ok(rows.into_iter().filter(|r| filter.matches(r)).collect())
    }
}
