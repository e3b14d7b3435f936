use thiserror::Error;

/// Common error type for the Modbus proxy components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR serialization error: {0}")]
    Cbor(String),

    #[error("Invalid register type '{0}', expected hr, ir, di or co")]
    InvalidRegisterType(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

/// Result type alias using the proxy's common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterType;

    #[test]
    fn test_register_type_error() {
        let err = "xx".parse::<RegisterType>().unwrap_err();
        assert!(matches!(err, Error::InvalidRegisterType(ref t) if t == "xx"));
        assert_eq!(
            err.to_string(),
            "Invalid register type 'xx', expected hr, ir, di or co"
        );
    }

    #[test]
    fn test_decode_errors_convert() {
        let err: Error = serde_json::from_str::<u16>("{").unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));

        let err: Error = ciborium::from_reader::<u16, _>(&[0xff][..]).unwrap_err().into();
        assert!(matches!(err, Error::Cbor(_)));
    }
}
