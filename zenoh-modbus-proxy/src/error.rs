//! Errors raised while serving Modbus requests.

use std::time::Duration;

use thiserror::Error;
use tokio_modbus::ExceptionCode;

use proxy_common::RegisterType;

/// Result type alias using [`ProxyError`].
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors raised by slave contexts, register blocks and the store bridge.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Function code outside the supported table.
    #[error("Illegal function code: {0}")]
    IllegalFunction(u8),

    /// No slave context for the addressed unit.
    #[error("Unknown unit id: {0}")]
    UnknownUnit(u8),

    /// The slave defines no registers of the addressed type.
    #[error("No {register_type} block defined for unit {unit_id}")]
    NoBlock {
        unit_id: u8,
        register_type: RegisterType,
    },

    /// The request touches addresses outside the block's domain.
    #[error("Address out of range: {register_type} {address} (count {count})")]
    AddressOutOfRange {
        register_type: RegisterType,
        address: u32,
        count: u32,
    },

    /// A sequential read came back with a hole and gap filling is disabled.
    #[error("Store has no {register_type} row for address {address}")]
    DataIntegrity {
        register_type: RegisterType,
        address: u32,
    },

    /// The remote store failed the request.
    #[error("Store error: {0}")]
    Store(String),

    /// The remote store did not answer in time.
    #[error("Store request timed out after {0:?}")]
    Timeout(Duration),

    /// Shared-library failure (serialization, Zenoh session).
    #[error(transparent)]
    Common(#[from] proxy_common::Error),
}

impl ProxyError {
    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Modbus exception returned to the client for this error.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            ProxyError::IllegalFunction(_) => ExceptionCode::IllegalFunction,
            ProxyError::UnknownUnit(_) => ExceptionCode::GatewayTargetDevice,
            ProxyError::NoBlock { .. } | ProxyError::AddressOutOfRange { .. } => {
                ExceptionCode::IllegalDataAddress
            }
            ProxyError::DataIntegrity { .. }
            | ProxyError::Store(_)
            | ProxyError::Timeout(_)
            | ProxyError::Common(_) => ExceptionCode::ServerDeviceFailure,
        }
    }
}

impl From<zenoh::Error> for ProxyError {
    fn from(err: zenoh::Error) -> Self {
        Self::Store(err.to_string())
    }
}
