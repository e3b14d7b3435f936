use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Provenance timestamp of a field value.
pub type Timestamp = DateTime<Utc>;

/// Modbus register types as stored in the `register_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegisterType {
    /// Holding registers (read/write, 16-bit).
    #[serde(rename = "hr")]
    Holding,
    /// Input registers (read-only, 16-bit).
    #[serde(rename = "ir")]
    Input,
    /// Discrete inputs (read-only, 1-bit).
    #[serde(rename = "di")]
    Discrete,
    /// Coils (read/write, 1-bit).
    #[serde(rename = "co")]
    Coil,
}

impl RegisterType {
    /// All register types, in the order blocks are built.
    pub const ALL: [RegisterType; 4] = [
        RegisterType::Holding,
        RegisterType::Input,
        RegisterType::Discrete,
        RegisterType::Coil,
    ];

    /// Two-letter code used in key expressions and data rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Holding => "hr",
            RegisterType::Input => "ir",
            RegisterType::Discrete => "di",
            RegisterType::Coil => "co",
        }
    }

    /// Human-readable name for log messages.
    pub fn name(&self) -> &'static str {
        match self {
            RegisterType::Holding => "holding",
            RegisterType::Input => "input",
            RegisterType::Discrete => "discrete",
            RegisterType::Coil => "coil",
        }
    }

    /// Whether values of this type are single bits.
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterType::Discrete | RegisterType::Coil)
    }
}

impl FromStr for RegisterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hr" => Ok(RegisterType::Holding),
            "ir" => Ok(RegisterType::Input),
            "di" => Ok(RegisterType::Discrete),
            "co" => Ok(RegisterType::Coil),
            other => Err(Error::InvalidRegisterType(other.to_string())),
        }
    }
}

impl std::fmt::Display for RegisterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A register value row held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRow {
    /// Proxy address assigned to the remote outstation.
    pub ip_address: String,

    /// TCP port of the proxy address.
    pub ip_port: u16,

    /// Modbus unit id.
    pub slave_id: u8,

    /// Register type code.
    pub register_type: RegisterType,

    /// Register address (internal, 0-based model).
    pub register_address: u32,

    /// Latest value reported from the field.
    pub register_data: u16,

    /// When the field reported the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// A slave configuration row: one remote outstation behind a proxy address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveRow {
    /// Proxy address (IPv4) assigned to the outstation.
    #[serde(default)]
    pub ip_address: String,

    /// TCP port of the proxy address.
    #[serde(default = "default_ip_port")]
    pub ip_port: u16,

    /// Modbus unit id; rows without one are not served.
    #[serde(default)]
    pub slave_id: Option<u8>,

    /// Device template text.
    #[serde(default)]
    pub config_file: String,

    /// Satellite terminal identifier (metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_id: Option<String>,

    /// Most recent report from the field (metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report_time: Option<Timestamp>,
}

fn default_ip_port() -> u16 {
    502
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_type_codes() {
        for rt in RegisterType::ALL {
            assert_eq!(rt.as_str().parse::<RegisterType>().unwrap(), rt);
        }
        assert!("xx".parse::<RegisterType>().is_err());
        assert!(RegisterType::Coil.is_bit());
        assert!(!RegisterType::Holding.is_bit());
    }

    #[test]
    fn test_data_row_json() {
        let json = r#"{
            "ip_address": "192.168.1.200",
            "ip_port": 502,
            "slave_id": 1,
            "register_type": "ir",
            "register_address": 0,
            "register_data": 123,
            "timestamp": "2019-01-21T07:00:00Z"
        }"#;

        let row: DataRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.register_type, RegisterType::Input);
        assert_eq!(row.register_data, 123);
        assert!(row.timestamp.is_some());
    }

    #[test]
    fn test_slave_row_defaults() {
        let row: SlaveRow = serde_json::from_str(r#"{"ip_address": "10.0.0.1"}"#).unwrap();
        assert_eq!(row.ip_port, 502);
        assert_eq!(row.slave_id, None);
        assert!(row.config_file.is_empty());
    }
}
