//! The remote store seam.
//!
//! Register values and slave configuration live in a remote, queryable
//! store. [`RegisterStore`] is the narrow interface the proxy needs from it:
//! a filtered read of data rows, a targeted single-row update, and a
//! filtered read of configuration rows.

use std::fmt;
use std::future::Future;

use proxy_common::{DataRow, RegisterType, SlaveRow};

use crate::error::Result;

/// The `(ip_address, ip_port)` pair a group of outstations is served on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyIdentity {
    pub ip_address: String,
    pub ip_port: u16,
}

impl ProxyIdentity {
    pub fn new(ip_address: impl Into<String>, ip_port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            ip_port,
        }
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.ip_port)
    }
}

/// Address filter of a data query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRange {
    /// A single address.
    Exact(u32),
    /// Addresses in `[start, end)`.
    Span { start: u32, end: u32 },
}

impl AddressRange {
    /// Filter for a request of `count` registers starting at `address`.
    ///
    /// Multi-register requests use a range filter and single-register
    /// requests an equality filter.
    ///
    /// # Example
    /// ```
    /// use zenoh_modbus_proxy::store::AddressRange;
    ///
    /// assert_eq!(AddressRange::for_request(7, 1), AddressRange::Exact(7));
    /// assert_eq!(
    ///     AddressRange::for_request(5, 5),
    ///     AddressRange::Span { start: 5, end: 10 }
    /// );
    /// ```
    pub fn for_request(address: u32, count: u32) -> Self {
        if count > 1 {
            AddressRange::Span {
                start: address,
                end: address + count,
            }
        } else {
            AddressRange::Exact(address)
        }
    }

    pub fn contains(&self, address: u32) -> bool {
        match *self {
            AddressRange::Exact(a) => a == address,
            AddressRange::Span { start, end } => (start..end).contains(&address),
        }
    }
}

/// Filter selecting data rows of one slave and register type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataQuery {
    pub proxy: ProxyIdentity,
    pub unit_id: u8,
    pub register_type: RegisterType,
    pub range: AddressRange,
}

impl DataQuery {
    /// Whether `row` satisfies every field of the filter.
    pub fn matches(&self, row: &DataRow) -> bool {
        row.ip_address == self.proxy.ip_address
            && row.ip_port == self.proxy.ip_port
            && row.slave_id == self.unit_id
            && row.register_type == self.register_type
            && self.range.contains(row.register_address)
    }
}

/// Filter selecting slave configuration rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveFilter {
    /// Rows assigned to one proxy address.
    ProxyAddress(String),
    /// Rows carrying a unit id.
    AnyUnit,
    /// Rows carrying a proxy address.
    AnyAddress,
}

impl SlaveFilter {
    pub fn matches(&self, row: &SlaveRow) -> bool {
        match self {
            SlaveFilter::ProxyAddress(address) => row.ip_address == *address,
            SlaveFilter::AnyUnit => row.slave_id.is_some(),
            SlaveFilter::AnyAddress => !row.ip_address.is_empty(),
        }
    }
}

/// A remote, queryable store of register values and slave configuration.
pub trait RegisterStore: Send + Sync + 'static {
    /// Rows matching `query`, in any order.
    fn query_data(&self, query: &DataQuery) -> impl Future<Output = Result<Vec<DataRow>>> + Send;

    /// Set `register_data` of the row `query` selects.
    ///
    /// `query.range` is always an exact address.
    fn update_data(&self, query: &DataQuery, value: u16)
    -> impl Future<Output = Result<()>> + Send;

    /// Configuration rows matching `filter`.
    fn slave_rows(&self, filter: &SlaveFilter)
    -> impl Future<Output = Result<Vec<SlaveRow>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(address: u32) -> DataRow {
        DataRow {
            ip_address: "192.168.1.200".to_string(),
            ip_port: 502,
            slave_id: 1,
            register_type: RegisterType::Holding,
            register_address: address,
            register_data: 0,
            timestamp: None,
        }
    }

    #[test]
    fn test_query_matches() {
        let query = DataQuery {
            proxy: ProxyIdentity::new("192.168.1.200", 502),
            unit_id: 1,
            register_type: RegisterType::Holding,
            range: AddressRange::for_request(5, 3),
        };

        assert!(query.matches(&row(5)));
        assert!(query.matches(&row(7)));
        assert!(!query.matches(&row(8)));

        let mut other_unit = row(5);
        other_unit.slave_id = 2;
        assert!(!query.matches(&other_unit));

        let mut other_type = row(5);
        other_type.register_type = RegisterType::Input;
        assert!(!query.matches(&other_type));
    }

    #[test]
    fn test_slave_filter() {
        let mut row = SlaveRow {
            ip_address: String::new(),
            ip_port: 502,
            slave_id: None,
            config_file: String::new(),
            mobile_id: None,
            last_report_time: None,
        };

        assert!(!SlaveFilter::AnyUnit.matches(&row));
        assert!(!SlaveFilter::AnyAddress.matches(&row));

        row.slave_id = Some(4);
        row.ip_address = "10.0.0.1".to_string();
        assert!(SlaveFilter::AnyUnit.matches(&row));
        assert!(SlaveFilter::AnyAddress.matches(&row));
        assert!(SlaveFilter::ProxyAddress("10.0.0.1".to_string()).matches(&row));
        assert!(!SlaveFilter::ProxyAddress("10.0.0.2".to_string()).matches(&row));
    }
}
