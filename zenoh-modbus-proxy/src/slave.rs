//! One served outstation: its template, blocks and store access.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use proxy_common::{RegisterType, SlaveRow, Timestamp};

use crate::block::{RegisterBlock, WriteValues};
use crate::bridge::{GapFill, StoreBridge};
use crate::error::{ProxyError, Result};
use crate::layout::{SequentialBound, build_layout};
use crate::store::{ProxyIdentity, RegisterStore};
use crate::template::{DeviceIdentity, parse_template};

/// Modbus function codes the proxy answers.
pub mod function_code {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const MASK_WRITE_REGISTER: u8 = 0x16;
    pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;
}

/// Register type a function code operates on.
pub fn decode_function_code(code: u8) -> Result<RegisterType> {
    use function_code::*;

    match code {
        READ_COILS | WRITE_SINGLE_COIL | WRITE_MULTIPLE_COILS => Ok(RegisterType::Coil),
        READ_DISCRETE_INPUTS => Ok(RegisterType::Discrete),
        READ_HOLDING_REGISTERS
        | WRITE_SINGLE_REGISTER
        | WRITE_MULTIPLE_REGISTERS
        | MASK_WRITE_REGISTER
        | READ_WRITE_MULTIPLE_REGISTERS => Ok(RegisterType::Holding),
        READ_INPUT_REGISTERS => Ok(RegisterType::Input),
        other => Err(ProxyError::IllegalFunction(other)),
    }
}

/// Settings shared by every slave context.
#[derive(Debug, Clone, Copy)]
pub struct SlaveOptions {
    pub gap_fill: GapFill,
    pub request_timeout: Duration,
    pub sequential_bound: SequentialBound,
}

impl Default for SlaveOptions {
    fn default() -> Self {
        Self {
            gap_fill: GapFill::default(),
            request_timeout: Duration::from_secs(2),
            sequential_bound: SequentialBound::default(),
        }
    }
}

/// Serves one unit id from the store.
#[derive(Debug)]
pub struct SlaveContext<S> {
    zero_mode: bool,
    sparse: bool,
    identity: DeviceIdentity,
    bridge: StoreBridge<S>,
    blocks: BTreeMap<RegisterType, RegisterBlock>,
}

impl<S: RegisterStore> SlaveContext<S> {
    /// Build a context from a configuration row.
    ///
    /// The template's unit id, when present, overrides the row's.
    pub fn from_row(row: &SlaveRow, unit_id: u8, store: Arc<S>, options: &SlaveOptions) -> Self {
        if row.ip_address.is_empty() {
            warn!(
                unit_id,
                "Slave has no proxy address, its unit id may collide with other slaves"
            );
        }

        let parsed = parse_template(&row.config_file);

        let unit_id = match parsed.unit_id {
            Some(template_id) if template_id != unit_id => {
                info!(
                    row_unit_id = unit_id,
                    template_unit_id = template_id,
                    "Template overrides unit id"
                );
                template_id
            }
            _ => unit_id,
        };

        let layout = build_layout(&parsed.descriptors, parsed.sparse, options.sequential_bound);
        let blocks: BTreeMap<_, _> = layout
            .into_spaces()
            .filter_map(|(rt, space)| RegisterBlock::new(rt, space).map(|block| (rt, block)))
            .collect();

        let proxy = ProxyIdentity::new(row.ip_address.clone(), row.ip_port);
        info!(
            %proxy,
            unit_id,
            sparse = parsed.sparse,
            zero_mode = parsed.zero_mode,
            blocks = ?blocks.keys().map(|rt| rt.name()).collect::<Vec<_>>(),
            "Slave context ready"
        );

        Self {
            zero_mode: parsed.zero_mode,
            sparse: parsed.sparse,
            identity: parsed.identity,
            bridge: StoreBridge::new(
                store,
                proxy,
                unit_id,
                options.gap_fill,
                options.request_timeout,
            ),
            blocks,
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.bridge.unit_id()
    }

    pub fn proxy(&self) -> &ProxyIdentity {
        self.bridge.proxy()
    }

    pub fn zero_mode(&self) -> bool {
        self.zero_mode
    }

    pub fn sparse(&self) -> bool {
        self.sparse
    }

    /// Identity strings from the device template.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn block(&self, register_type: RegisterType) -> Option<&RegisterBlock> {
        self.blocks.get(&register_type)
    }

    /// Internal address of a protocol address.
    pub fn normalize(&self, address: u16) -> u32 {
        let address = u32::from(address);
        if self.zero_mode { address } else { address + 1 }
    }

    /// Whether the request addresses registers this slave defines.
    pub fn validate(&self, function_code: u8, address: u16, count: u16) -> bool {
        let Ok(register_type) = decode_function_code(function_code) else {
            return false;
        };
        let address = self.normalize(address);
        debug!(function_code, address, count, "validate");
        self.blocks
            .get(&register_type)
            .is_some_and(|block| block.validate(address, u32::from(count)))
    }

    /// Read `count` values starting at protocol address `address`.
    pub async fn get_values(&self, function_code: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        let block = self.block_for(function_code)?;
        let address = self.normalize(address);
        debug!(function_code, address, count, "getValues");
        block
            .get_values(&self.bridge, address, u32::from(count))
            .await
    }

    /// Write `values` starting at protocol address `address`.
    pub async fn set_values(
        &self,
        function_code: u8,
        address: u16,
        values: impl Into<WriteValues>,
    ) -> Result<()> {
        let block = self.block_for(function_code)?;
        let shift = u32::from(!self.zero_mode);
        let values = values.into().map_addresses(|a| a + shift);
        let address = self.normalize(address);
        debug!(function_code, address, count = values.len(), "setValues");
        block.set_values(&self.bridge, address, values).await
    }

    /// Replace the register at protocol address `address` with `f` of its
    /// current value, as one locked step.
    pub async fn update_value(
        &self,
        function_code: u8,
        address: u16,
        f: impl FnOnce(u16) -> u16,
    ) -> Result<u16> {
        let block = self.block_for(function_code)?;
        let address = self.normalize(address);
        debug!(function_code, address, "updateValue");
        block.update(&self.bridge, address, f).await
    }

    /// Cached timestamps of `count` registers starting at `address`.
    pub async fn timestamps(
        &self,
        function_code: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<Option<Timestamp>>> {
        let block = self.block_for(function_code)?;
        block
            .timestamps(self.normalize(address), u32::from(count))
            .await
    }

    /// Register values live in the store; there is nothing to reset locally.
    pub fn reset(&self) {
        warn!(
            unit_id = self.unit_id(),
            "Reset requested, ignored for store-backed slave"
        );
    }

    fn block_for(&self, function_code: u8) -> Result<&RegisterBlock> {
        let register_type = decode_function_code(function_code)?;
        self.blocks.get(&register_type).ok_or(ProxyError::NoBlock {
            unit_id: self.unit_id(),
            register_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::function_code::*;
    use super::*;
    use crate::memory::MemoryStore;
    use proxy_common::DataRow;

    const TEMPLATE: &str = "\
/*DEVICE;VendorName=Acme;ProductName=Pump
deviceId;networkId=3;plcBaseAddress=1
paramId=1;address=9;registerType=holding
paramId=2;address=12;registerType=holding
paramId=3;address=0;registerType=coil
";

    fn slave_row(template: &str) -> SlaveRow {
        SlaveRow {
            ip_address: "192.168.1.200".to_string(),
            ip_port: 502,
            slave_id: Some(3),
            config_file: template.to_string(),
            mobile_id: None,
            last_report_time: None,
        }
    }

    fn holding_row(address: u32, value: u16) -> DataRow {
        DataRow {
            ip_address: "192.168.1.200".to_string(),
            ip_port: 502,
            slave_id: 3,
            register_type: RegisterType::Holding,
            register_address: address,
            register_data: value,
            timestamp: None,
        }
    }

    fn context(store: &Arc<MemoryStore>) -> SlaveContext<MemoryStore> {
        SlaveContext::from_row(
            &slave_row(TEMPLATE),
            3,
            store.clone(),
            &SlaveOptions::default(),
        )
    }

    #[test]
    fn test_function_code_table() {
        assert_eq!(decode_function_code(1).unwrap(), RegisterType::Coil);
        assert_eq!(decode_function_code(5).unwrap(), RegisterType::Coil);
        assert_eq!(decode_function_code(15).unwrap(), RegisterType::Coil);
        assert_eq!(decode_function_code(2).unwrap(), RegisterType::Discrete);
        assert_eq!(decode_function_code(3).unwrap(), RegisterType::Holding);
        assert_eq!(decode_function_code(6).unwrap(), RegisterType::Holding);
        assert_eq!(decode_function_code(16).unwrap(), RegisterType::Holding);
        assert_eq!(decode_function_code(4).unwrap(), RegisterType::Input);
        assert!(matches!(
            decode_function_code(0x2B),
            Err(ProxyError::IllegalFunction(0x2B))
        ));
    }

    #[test]
    fn test_from_row() {
        let store = Arc::new(MemoryStore::new());
        let slave = context(&store);

        assert_eq!(slave.unit_id(), 3);
        assert!(!slave.zero_mode());
        assert!(!slave.sparse());
        assert_eq!(slave.identity().vendor_name.as_deref(), Some("Acme"));
        assert_eq!(slave.proxy().to_string(), "192.168.1.200:502");
        assert!(slave.block(RegisterType::Holding).is_some());
        assert!(slave.block(RegisterType::Coil).is_some());
        assert!(slave.block(RegisterType::Input).is_none());
    }

    #[test]
    fn test_template_unit_id_overrides_row() {
        let store = Arc::new(MemoryStore::new());
        let slave = SlaveContext::from_row(
            &slave_row("deviceId;networkId=9"),
            3,
            store,
            &SlaveOptions::default(),
        );
        assert_eq!(slave.unit_id(), 9);
    }

    #[test]
    fn test_validate_applies_shift() {
        let store = Arc::new(MemoryStore::new());
        let slave = context(&store);

        // Template addresses 9 and 12 are shifted to 10..=13 internally;
        // protocol addresses are shifted the same way.
        assert!(slave.validate(READ_HOLDING_REGISTERS, 9, 4));
        assert!(!slave.validate(READ_HOLDING_REGISTERS, 8, 1));
        assert!(!slave.validate(READ_HOLDING_REGISTERS, 9, 5));
        assert!(!slave.validate(READ_INPUT_REGISTERS, 9, 1));
        assert!(!slave.validate(0x2B, 9, 1));
    }

    #[tokio::test]
    async fn test_zero_mode_shift_applied_once() {
        let store = Arc::new(MemoryStore::new());
        store.insert_data(holding_row(11, 1100)).await;
        let slave = context(&store);

        for _ in 0..3 {
            let values = slave
                .get_values(READ_HOLDING_REGISTERS, 10, 1)
                .await
                .unwrap();
            assert_eq!(values, vec![1100]);
        }
    }

    #[tokio::test]
    async fn test_write_lands_on_shifted_address() {
        let store = Arc::new(MemoryStore::new());
        let slave = context(&store);

        slave
            .set_values(WRITE_MULTIPLE_REGISTERS, 10, vec![5, 6])
            .await
            .unwrap();

        let mut written: Vec<(u32, u16)> = store
            .data_rows()
            .await
            .iter()
            .map(|r| (r.register_address, r.register_data))
            .collect();
        written.sort();
        assert_eq!(written, vec![(11, 5), (12, 6)]);
    }

    #[tokio::test]
    async fn test_update_value_on_shifted_address() {
        let store = Arc::new(MemoryStore::new());
        store.insert_data(holding_row(11, 0b1100)).await;
        let slave = context(&store);

        let written = slave
            .update_value(MASK_WRITE_REGISTER, 10, |v| v | 0b0001)
            .await
            .unwrap();
        assert_eq!(written, 0b1101);

        let rows = store.data_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].register_address, 11);
        assert_eq!(rows[0].register_data, 0b1101);
    }

    #[tokio::test]
    async fn test_missing_block_is_address_error() {
        let store = Arc::new(MemoryStore::new());
        let slave = context(&store);

        let err = slave
            .get_values(READ_INPUT_REGISTERS, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NoBlock { .. }));
        assert_eq!(
            err.exception_code(),
            tokio_modbus::ExceptionCode::IllegalDataAddress
        );
    }

    #[tokio::test]
    async fn test_timestamps_and_reset() {
        let store = Arc::new(MemoryStore::new());
        let slave = context(&store);

        slave.reset();
        let timestamps = slave
            .timestamps(READ_HOLDING_REGISTERS, 9, 2)
            .await
            .unwrap();
        assert_eq!(timestamps, vec![None, None]);
        assert_eq!(store.query_count(), 0);
    }
}
