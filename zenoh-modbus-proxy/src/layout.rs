//! Address spaces built from register descriptors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use proxy_common::RegisterType;

use crate::template::RegisterDescriptor;

/// Upper bound of a sequential address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequentialBound {
    /// `[min, max]`: the highest declared address is served.
    #[default]
    Inclusive,
    /// `[min, max)`: the highest declared address is not served.
    Exclusive,
}

/// Addresses a register block answers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpace {
    /// Every address in `[base, base + len)`.
    Sequential { base: u32, len: u32 },
    /// Exactly the listed addresses.
    Sparse(BTreeSet<u32>),
}

impl AddressSpace {
    /// Number of addresses in the space.
    pub fn len(&self) -> usize {
        match self {
            AddressSpace::Sequential { len, .. } => *len as usize,
            AddressSpace::Sparse(keys) => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: u32) -> bool {
        match self {
            AddressSpace::Sequential { base, len } => {
                address >= *base && address - *base < *len
            }
            AddressSpace::Sparse(keys) => keys.contains(&address),
        }
    }

    /// Whether every address of `[address, address + count)` is in the space.
    pub fn contains_range(&self, address: u32, count: u32) -> bool {
        if count == 0 {
            return false;
        }
        match self {
            AddressSpace::Sequential { base, len } => {
                address >= *base
                    && u64::from(address - *base) + u64::from(count) <= u64::from(*len)
            }
            AddressSpace::Sparse(keys) => match address.checked_add(count) {
                Some(end) => (address..end).all(|a| keys.contains(&a)),
                None => false,
            },
        }
    }

    /// Position of `address` in the space, in ascending address order.
    pub fn index_of(&self, address: u32) -> Option<usize> {
        match self {
            AddressSpace::Sequential { base, len } => {
                (address >= *base && address - *base < *len).then(|| (address - *base) as usize)
            }
            AddressSpace::Sparse(keys) => keys
                .contains(&address)
                .then(|| keys.range(..address).count()),
        }
    }

    /// Addresses of the space in ascending order.
    pub fn addresses(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            AddressSpace::Sequential { base, len } => Box::new(*base..*base + *len),
            AddressSpace::Sparse(keys) => Box::new(keys.iter().copied()),
        }
    }
}

/// The address spaces of one slave, keyed by register type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveLayout {
    spaces: BTreeMap<RegisterType, AddressSpace>,
}

impl SlaveLayout {
    pub fn get(&self, register_type: RegisterType) -> Option<&AddressSpace> {
        self.spaces.get(&register_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterType, &AddressSpace)> {
        self.spaces.iter().map(|(rt, space)| (*rt, space))
    }

    pub fn into_spaces(self) -> impl Iterator<Item = (RegisterType, AddressSpace)> {
        self.spaces.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

/// Partition descriptors by register type and build one space per type.
///
/// Types without a valid address get no space. Descriptors missing either
/// an address or a register type are skipped.
///
/// # Example
/// ```
/// use zenoh_modbus_proxy::layout::{AddressSpace, SequentialBound, build_layout};
/// use zenoh_modbus_proxy::template::parse_template;
/// use proxy_common::RegisterType;
///
/// let parsed = parse_template("paramId=1;address=5;registerType=holding\nparamId=2;address=9;registerType=holding");
/// let layout = build_layout(&parsed.descriptors, false, SequentialBound::Inclusive);
/// assert_eq!(
///     layout.get(RegisterType::Holding),
///     Some(&AddressSpace::Sequential { base: 5, len: 5 })
/// );
/// ```
pub fn build_layout(
    descriptors: &[RegisterDescriptor],
    sparse: bool,
    bound: SequentialBound,
) -> SlaveLayout {
    let mut by_type: BTreeMap<RegisterType, BTreeSet<u32>> = BTreeMap::new();

    for descriptor in descriptors {
        match (descriptor.register_type, descriptor.address) {
            (Some(register_type), Some(address)) => {
                by_type.entry(register_type).or_default().insert(address);
            }
            _ => warn!(
                param_id = descriptor.param_id,
                "Skipping register without address or register type"
            ),
        }
    }

    let mut layout = SlaveLayout::default();
    for (register_type, addresses) in by_type {
        let space = if sparse {
            AddressSpace::Sparse(addresses)
        } else {
            let (Some(&min), Some(&max)) = (addresses.first(), addresses.last()) else {
                continue;
            };
            let len = match bound {
                SequentialBound::Inclusive => max - min + 1,
                SequentialBound::Exclusive => max - min,
            };
            AddressSpace::Sequential { base: min, len }
        };

        if space.is_empty() {
            warn!(%register_type, "Address range is empty, no block built");
            continue;
        }
        layout.spaces.insert(register_type, space);
    }

    layout
}
