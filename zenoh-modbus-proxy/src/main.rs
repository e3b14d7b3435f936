//! Modbus TCP proxy serving register values held in a Zenoh store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use proxy_common::KeyExprBuilder;
use proxy_framework::{ProxyArgs, ProxyConfig, ProxyRunner};

use zenoh_modbus_proxy::config::ModbusProxyConfig;
use zenoh_modbus_proxy::server::{ServerContext, discover_proxies};
use zenoh_modbus_proxy::service;
use zenoh_modbus_proxy::zenoh_store::ZenohStore;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ProxyArgs::parse_with_default("modbus-proxy.json5");

    let config = ModbusProxyConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let runner = ProxyRunner::new_with_args("modbus-proxy", config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let mut runner = runner.with_status_publishing();

    let settings = runner.config().proxy.clone();
    let store = Arc::new(ZenohStore::new(
        runner.session().clone(),
        KeyExprBuilder::new(&settings.key_prefix),
        runner.config().serialization,
        settings.request_timeout(),
    ));
    let options = settings.slave_options();

    let proxies = discover_proxies(store.as_ref(), settings.proxy_address.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load slave configuration: {}", e))?;

    if proxies.is_empty() {
        warn!(
            prefix = %settings.key_prefix,
            "No slave configuration found, nothing to serve"
        );
    }

    let mut served = Vec::new();
    let mut slave_count = 0;

    for proxy in proxies {
        let context = ServerContext::discover(store.clone(), Some(&proxy.ip_address), &options)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to build context for {}: {}", proxy, e))?;

        if context.is_empty() {
            warn!(%proxy, "No slaves with a unit id, skipping");
            continue;
        }

        for slave in context.slaves() {
            info!(
                %proxy,
                unit_id = slave.unit_id(),
                identity = ?slave.identity(),
                "Serving slave"
            );
        }

        let bind = settings
            .bind_address(&proxy)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        slave_count += context.len();
        served.push(serde_json::json!({
            "proxy": proxy.to_string(),
            "listen": bind.to_string(),
            "units": context.unit_ids().collect::<Vec<_>>(),
        }));

        runner.spawn_with_error(
            format!("modbus-{}", proxy),
            service::serve(bind, Arc::new(context)),
        );
    }

    runner.spawn(heartbeat(settings.heartbeat_interval(), slave_count));

    let metadata = serde_json::json!({
        "proxies": served,
        "slaves": slave_count,
        "sequential_bound": settings.sequential_bound,
        "request_timeout_ms": settings.request_timeout_ms,
    });

    runner
        .run_with_metadata(Some(metadata))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}

/// Periodic liveness line in the log.
async fn heartbeat(interval: Duration, slaves: usize) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        info!(slaves, "Modbus proxy heartbeat");
    }
}
