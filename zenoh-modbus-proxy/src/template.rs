//! Device template parsing.
//!
//! A template is plain text, one directive per line, with `;`-separated
//! `tag=value` fields:
//!
//! ```text
//! /*DEVICE;VendorName=Acme;ProductCode=AC-1;sparse=1
//! deviceId=7;networkId=3;plcBaseAddress=1
//! paramId=12;address=40;registerType=holding
//! ```
//!
//! Lines are recognized by their leading marker. Everything else is ignored.
//! Malformed values are logged and skipped; parsing never fails.

use serde::Serialize;
use tracing::{debug, error};

use proxy_common::RegisterType;

/// Marker of the device identity line.
pub const DEVICE_MARKER: &str = "/*DEVICE;";

/// Marker of the network settings line.
pub const NETWORK_MARKER: &str = "deviceId";

/// Marker of a register definition line.
pub const REGISTER_MARKER: &str = "paramId";

/// Field separator within a line.
pub const FIELD_SEPARATOR: char = ';';

/// Highest internal register address a template may declare.
pub const MAX_ADDRESS: i64 = 99_999;

/// Identity strings of the served device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major_minor_revision: Option<String>,
}

/// One register definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub param_id: i64,
    pub address: Option<u32>,
    pub register_type: Option<RegisterType>,
    pub block_size: u32,
}

impl RegisterDescriptor {
    fn new(param_id: i64) -> Self {
        Self {
            param_id,
            address: None,
            register_type: None,
            block_size: 1,
        }
    }
}

/// Everything a template says about a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    pub identity: DeviceIdentity,
    pub sparse: bool,
    /// Unit id from the network line, if valid.
    pub unit_id: Option<u8>,
    /// Addresses are used as-is when set, shifted up by one otherwise.
    pub zero_mode: bool,
    /// Register definitions in order of first appearance of their paramId.
    pub descriptors: Vec<RegisterDescriptor>,
}

impl Default for ParsedTemplate {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::default(),
            sparse: false,
            unit_id: None,
            zero_mode: true,
            descriptors: Vec::new(),
        }
    }
}

/// Map a template register-type token to its register type.
pub fn register_type_from_token(token: &str) -> Option<RegisterType> {
    match token {
        "holding" => Some(RegisterType::Holding),
        "analog" => Some(RegisterType::Input),
        "input" => Some(RegisterType::Discrete),
        "coil" => Some(RegisterType::Coil),
        _ => None,
    }
}

/// Parse a device template.
///
/// # Example
/// ```
/// use zenoh_modbus_proxy::template::parse_template;
///
/// let parsed = parse_template(
///     "deviceId;networkId=3;plcBaseAddress=1\nparamId=1;address=9;registerType=coil",
/// );
/// assert_eq!(parsed.unit_id, Some(3));
/// assert_eq!(parsed.descriptors[0].address, Some(10));
/// ```
pub fn parse_template(text: &str) -> ParsedTemplate {
    let mut parsed = ParsedTemplate::default();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;

        if line.starts_with(DEVICE_MARKER) {
            parse_device_line(&mut parsed, line, line_no);
        } else if line.starts_with(NETWORK_MARKER) {
            parse_network_line(&mut parsed, line, line_no);
        } else if line.starts_with(REGISTER_MARKER) {
            parse_register_line(&mut parsed, line, line_no);
        }
    }

    debug!(
        descriptors = parsed.descriptors.len(),
        sparse = parsed.sparse,
        zero_mode = parsed.zero_mode,
        "Parsed device template"
    );

    parsed
}

fn parse_device_line(parsed: &mut ParsedTemplate, line: &str, line_no: usize) {
    let identity = &mut parsed.identity;

    for field in line.split(FIELD_SEPARATOR) {
        let slot = if let Some(v) = tag_value(field, "VendorName") {
            Some((&mut identity.vendor_name, v))
        } else if let Some(v) = tag_value(field, "ProductCode") {
            Some((&mut identity.product_code, v))
        } else if let Some(v) = tag_value(field, "VendorUrl") {
            Some((&mut identity.vendor_url, v))
        } else if let Some(v) = tag_value(field, "ProductName") {
            Some((&mut identity.product_name, v))
        } else if let Some(v) = tag_value(field, "ModelName") {
            Some((&mut identity.model_name, v))
        } else if let Some(v) = tag_value(field, "MajorMinorRevision") {
            Some((&mut identity.major_minor_revision, v))
        } else {
            None
        };

        if let Some((target, value)) = slot {
            *target = Some(value.to_string());
        } else if let Some(value) = tag_value(field, "sparse") {
            match value.parse::<i64>() {
                Ok(flag) => parsed.sparse = flag != 0,
                Err(_) => error!(line = line_no, value, "Invalid sparse flag"),
            }
        }
    }
}

fn parse_network_line(parsed: &mut ParsedTemplate, line: &str, line_no: usize) {
    for field in line.split(FIELD_SEPARATOR) {
        if let Some(value) = tag_value(field, "networkId") {
            match value.parse::<i64>() {
                Ok(id) if (1..=254).contains(&id) => parsed.unit_id = Some(id as u8),
                Ok(id) => error!(line = line_no, id, "Invalid Modbus unit id"),
                Err(_) => error!(line = line_no, value, "Invalid networkId"),
            }
        } else if let Some(value) = tag_value(field, "plcBaseAddress") {
            match value.parse::<i64>() {
                Ok(base) => parsed.zero_mode = base != 1,
                Err(_) => error!(line = line_no, value, "Invalid plcBaseAddress"),
            }
        }
    }
}

fn parse_register_line(parsed: &mut ParsedTemplate, line: &str, line_no: usize) {
    let mut current: Option<usize> = None;

    for field in line.split(FIELD_SEPARATOR) {
        if let Some(value) = tag_value(field, "paramId") {
            let Ok(param_id) = value.parse::<i64>() else {
                error!(line = line_no, value, "Invalid paramId");
                current = None;
                continue;
            };
            let position = parsed
                .descriptors
                .iter()
                .position(|d| d.param_id == param_id);
            current = Some(position.unwrap_or_else(|| {
                parsed.descriptors.push(RegisterDescriptor::new(param_id));
                parsed.descriptors.len() - 1
            }));
        } else if let Some(value) = tag_value(field, "address") {
            let Ok(raw) = value.parse::<i64>() else {
                error!(line = line_no, value, "Invalid Modbus address");
                continue;
            };
            let address = if parsed.zero_mode { raw } else { raw + 1 };
            if !(0..=MAX_ADDRESS).contains(&address) {
                error!(line = line_no, address, "Modbus address out of range");
                continue;
            }
            match current {
                Some(i) => parsed.descriptors[i].address = Some(address as u32),
                None => error!(line = line_no, address, "Address without paramId"),
            }
        } else if let Some(value) = tag_value(field, "registerType") {
            let Some(register_type) = register_type_from_token(value) else {
                error!(line = line_no, value, "Invalid Modbus register type");
                continue;
            };
            match current {
                Some(i) => parsed.descriptors[i].register_type = Some(register_type),
                None => error!(line = line_no, value, "Register type without paramId"),
            }
        }
    }
}

/// Value of a `tag=value` field, matching the tag case-insensitively.
fn tag_value<'a>(field: &'a str, tag: &str) -> Option<&'a str> {
    let head = field.get(..tag.len())?;
    if !head.eq_ignore_ascii_case(tag) {
        return None;
    }
    field[tag.len()..].strip_prefix('=').map(str::trim)
}
