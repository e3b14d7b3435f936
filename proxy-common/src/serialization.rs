use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Payload format for rows exchanged with the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary, cheaper over constrained links).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Try to auto-detect the format from the data.
///
/// Returns `Json` if the data starts with `{` or `[`, otherwise `Cbor`.
pub fn detect_format(data: &[u8]) -> Format {
    match data.first() {
        Some(b'{') | Some(b'[') => Format::Json,
        _ => Format::Cbor,
    }
}

/// Decode bytes, auto-detecting the format.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let format = detect_format(data);
    decode(data, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{DataRow, RegisterType, SlaveRow};

    fn sample_row() -> DataRow {
        DataRow {
            ip_address: "192.168.1.200".to_string(),
            ip_port: 502,
            slave_id: 1,
            register_type: RegisterType::Holding,
            register_address: 40,
            register_data: 1234,
            timestamp: None,
        }
    }

    #[test]
    fn test_cbor_row() {
        let row = sample_row();
        let encoded = encode(&row, Format::Cbor).unwrap();
        let decoded: DataRow = decode(&encoded, Format::Cbor).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_cbor_is_smaller() {
        let row = sample_row();
        let json = encode(&row, Format::Json).unwrap();
        let cbor = encode(&row, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"{\"key\": \"value\"}"), Format::Json);
        assert_eq!(detect_format(b"[1, 2, 3]"), Format::Json);
        assert_eq!(detect_format(b"\xa1\x63key\x65value"), Format::Cbor);
    }

    #[test]
    fn test_auto_decode_slave_row() {
        let row = SlaveRow {
            ip_address: "10.0.0.1".to_string(),
            ip_port: 502,
            slave_id: Some(3),
            config_file: "deviceId;networkId=3".to_string(),
            mobile_id: None,
            last_report_time: None,
        };

        let json = encode(&row, Format::Json).unwrap();
        let decoded: SlaveRow = decode_auto(&json).unwrap();
        assert_eq!(decoded, row);

        let cbor = encode(&row, Format::Cbor).unwrap();
        let decoded: SlaveRow = decode_auto(&cbor).unwrap();
        assert_eq!(decoded, row);
    }
}
