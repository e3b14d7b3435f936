//! Modbus TCP proxy for remote outstations whose registers live in a Zenoh
//! store.
//!
//! Field devices report register values over a constrained link; those
//! values land in a Zenoh storage. This proxy presents each device to local
//! SCADA clients as an ordinary Modbus TCP slave: reads are answered from the
//! store, writes are forwarded to it.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>/data/<ip_address>/<ip_port>/<slave_id>/<register_type>/<address>
//! <prefix>/rtus/<ip_address>/<ip_port>/<slave_id>
//! ```
//!
//! Where:
//! - `<prefix>` - Configured key prefix (default `modbusproxy`)
//! - `<register_type>` - `hr`, `ir`, `di` or `co`
//! - `<address>` - Internal (0-based) register address
//!
//! # Layers
//!
//! - [`template`] parses the device template of a configuration row
//! - [`layout`] turns register descriptors into address spaces
//! - [`block`] caches one register type and talks to the store through [`bridge`]
//! - [`slave`] and [`server`] route requests by function code and unit id
//! - [`service`] is the tokio-modbus front end
//! - [`store`] is the storage seam, implemented by [`zenoh_store`] and [`memory`]

pub mod block;
pub mod bridge;
pub mod config;
pub mod error;
pub mod layout;
pub mod memory;
pub mod server;
pub mod service;
pub mod slave;
pub mod store;
pub mod template;
pub mod zenoh_store;

pub use error::{ProxyError, Result};
