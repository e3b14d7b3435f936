//! Modbus Proxy Framework
//!
//! Lifecycle plumbing shared by the proxy binary.
//!
//! # Overview
//!
//! This framework provides:
//! - [`ProxyConfig`] trait for configuration loading and validation
//! - [`ProxyRunner`] for managing lifecycle (startup, shutdown, signal handling)
//! - [`ProxyArgs`] for common CLI argument parsing
//! - [`ProxyStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use proxy_framework::{ProxyArgs, ProxyConfig, ProxyRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = ProxyArgs::parse_with_default("myproxy.json5");
//!     let config = MyProxyConfig::load(&args.config)?;
//!
//!     let mut runner = ProxyRunner::new_with_args("myproxy", config, Some(&args)).await?;
//!     runner.spawn(my_listener(runner.session().clone()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;
mod status;

pub use args::ProxyArgs;
pub use config::ProxyConfig;
pub use error::{FrameworkError, Result};
pub use runner::ProxyRunner;
pub use status::{ProxyStatus, StatusPublisher};

// Re-export commonly used types from proxy-common
pub use proxy_common::{Format, LoggingConfig, ZenohConfig};
