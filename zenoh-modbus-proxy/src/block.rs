//! Register blocks: a cached view of one register type of one slave.
//!
//! Reads always go to the store first and refresh the cache; the cache only
//! answers for addresses a read did not refresh. Writes go to the store one
//! address at a time and update the cache as they succeed.

use std::collections::BTreeMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use proxy_common::{RegisterType, Timestamp};

use crate::bridge::{Sample, StoreBridge};
use crate::error::{ProxyError, Result};
use crate::layout::AddressSpace;
use crate::store::RegisterStore;

/// Values handed to [`RegisterBlock::set_values`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteValues {
    /// One value at the starting address.
    Single(u16),
    /// Consecutive values; position `i` lands on `address + i`.
    Sequence(Vec<u16>),
    /// Explicit address to value pairs; the starting address is ignored.
    Mapping(BTreeMap<u32, u16>),
}

impl WriteValues {
    /// Absolute `(address, value)` pairs, starting at `address`.
    ///
    /// # Example
    /// ```
    /// use zenoh_modbus_proxy::block::WriteValues;
    ///
    /// let entries = WriteValues::Sequence(vec![7, 8, 9]).entries(10);
    /// assert_eq!(entries, vec![(10, 7), (11, 8), (12, 9)]);
    /// ```
    pub fn entries(&self, address: u32) -> Vec<(u32, u16)> {
        match self {
            WriteValues::Single(value) => vec![(address, *value)],
            WriteValues::Sequence(values) => values
                .iter()
                .zip(address..)
                .map(|(value, a)| (a, *value))
                .collect(),
            WriteValues::Mapping(map) => map.iter().map(|(a, v)| (*a, *v)).collect(),
        }
    }

    /// Apply `f` to the explicit addresses of a mapping.
    pub fn map_addresses(self, f: impl Fn(u32) -> u32) -> Self {
        match self {
            WriteValues::Mapping(map) => {
                WriteValues::Mapping(map.into_iter().map(|(a, v)| (f(a), v)).collect())
            }
            other => other,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WriteValues::Single(_) => 1,
            WriteValues::Sequence(values) => values.len(),
            WriteValues::Mapping(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<u16> for WriteValues {
    fn from(value: u16) -> Self {
        WriteValues::Single(value)
    }
}

impl From<Vec<u16>> for WriteValues {
    fn from(values: Vec<u16>) -> Self {
        WriteValues::Sequence(values)
    }
}

impl From<&[u16]> for WriteValues {
    fn from(values: &[u16]) -> Self {
        WriteValues::Sequence(values.to_vec())
    }
}

impl From<BTreeMap<u32, u16>> for WriteValues {
    fn from(map: BTreeMap<u32, u16>) -> Self {
        WriteValues::Mapping(map)
    }
}

/// Cached registers of one type, backed by the remote store.
#[derive(Debug)]
pub struct RegisterBlock {
    register_type: RegisterType,
    space: AddressSpace,
    cache: Mutex<Vec<Sample>>,
}

impl RegisterBlock {
    /// Build a block over `space`, zero-initialized.
    ///
    /// Returns `None` for an empty space.
    pub fn new(register_type: RegisterType, space: AddressSpace) -> Option<Self> {
        if space.is_empty() {
            return None;
        }
        let cache = vec![Sample::default(); space.len()];
        Some(Self {
            register_type,
            space,
            cache: Mutex::new(cache),
        })
    }

    pub fn register_type(&self) -> RegisterType {
        self.register_type
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.space, AddressSpace::Sparse(_))
    }

    /// Whether `[address, address + count)` lies within the block.
    pub fn validate(&self, address: u32, count: u32) -> bool {
        self.space.contains_range(address, count)
    }

    /// Refresh `[address, address + count)` from the store and return it.
    pub async fn get_values<S: RegisterStore>(
        &self,
        bridge: &StoreBridge<S>,
        address: u32,
        count: u32,
    ) -> Result<Vec<u16>> {
        self.check_range(address, count)?;

        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache[..], bridge, address, count).await?;

        Ok(self.cached(&cache, address, count, |s| s.value))
    }

    /// Write `values` starting at `address`, one store update per address.
    ///
    /// The whole write is rejected before any update if an address falls
    /// outside the block. Updates stop at the first store failure.
    pub async fn set_values<S: RegisterStore>(
        &self,
        bridge: &StoreBridge<S>,
        address: u32,
        values: impl Into<WriteValues>,
    ) -> Result<()> {
        let entries = values.into().entries(address);

        if let Some((bad, _)) = entries.iter().find(|(a, _)| !self.space.contains(*a)) {
            return Err(ProxyError::AddressOutOfRange {
                register_type: self.register_type,
                address: *bad,
                count: 1,
            });
        }

        let mut cache = self.cache.lock().await;

        for (a, value) in entries {
            bridge.write(self.register_type, a, value).await?;
            if let Some(i) = self.space.index_of(a) {
                cache[i].value = value;
            }
        }

        debug!(
            unit_id = bridge.unit_id(),
            register_type = %self.register_type,
            address,
            "Registers written"
        );

        Ok(())
    }

    /// Read one register, compute its new value with `f` and write it back.
    ///
    /// The block stays locked from the read to the write, so concurrent
    /// updates of the same block apply one after the other. Returns the
    /// value written.
    pub async fn update<S: RegisterStore>(
        &self,
        bridge: &StoreBridge<S>,
        address: u32,
        f: impl FnOnce(u16) -> u16,
    ) -> Result<u16> {
        self.check_range(address, 1)?;

        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache[..], bridge, address, 1).await?;

        let Some(i) = self.space.index_of(address) else {
            return Err(ProxyError::AddressOutOfRange {
                register_type: self.register_type,
                address,
                count: 1,
            });
        };

        let value = f(cache[i].value);
        bridge.write(self.register_type, address, value).await?;
        cache[i].value = value;

        debug!(
            unit_id = bridge.unit_id(),
            register_type = %self.register_type,
            address,
            value,
            "Register updated"
        );

        Ok(value)
    }

    /// Cached timestamps of `[address, address + count)`.
    pub async fn timestamps(&self, address: u32, count: u32) -> Result<Vec<Option<Timestamp>>> {
        self.check_range(address, count)?;
        let cache = self.cache.lock().await;
        Ok(self.cached(&cache, address, count, |s| s.timestamp))
    }

    /// Pull `[address, address + count)` from the store into `cache`.
    async fn refresh<S: RegisterStore>(
        &self,
        cache: &mut [Sample],
        bridge: &StoreBridge<S>,
        address: u32,
        count: u32,
    ) -> Result<()> {
        let fresh: Vec<(u32, Sample)> = if self.is_sparse() {
            bridge
                .read_sparse(self.register_type, address, count)
                .await?
                .into_iter()
                .collect()
        } else {
            let samples = bridge
                .read_sequential(self.register_type, address, count)
                .await?;
            (address..).zip(samples).collect()
        };

        let mut refreshed = 0;
        for (a, sample) in fresh {
            if let Some(i) = self.space.index_of(a) {
                cache[i] = sample;
                refreshed += 1;
            }
        }

        if refreshed < count as usize {
            warn!(
                unit_id = bridge.unit_id(),
                register_type = %self.register_type,
                address,
                count,
                refreshed,
                "Serving cached values for registers not refreshed"
            );
        }

        Ok(())
    }

    fn check_range(&self, address: u32, count: u32) -> Result<()> {
        if self.validate(address, count) {
            Ok(())
        } else {
            Err(ProxyError::AddressOutOfRange {
                register_type: self.register_type,
                address,
                count,
            })
        }
    }

    fn cached<T>(
        &self,
        cache: &[Sample],
        address: u32,
        count: u32,
        field: impl Fn(&Sample) -> T,
    ) -> Vec<T> {
        (address..address + count)
            .filter_map(|a| self.space.index_of(a))
            .map(|i| field(&cache[i]))
            .collect()
    }
}
