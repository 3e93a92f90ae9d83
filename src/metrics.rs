//! Metric registration and the optional Prometheus exporter.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

/// Pre-register the messaging counters at zero so scrapes see them before
/// the first event occurs.
pub fn initialize_messaging_metrics() {
    metrics::counter!("messaging.published").absolute(0);
    metrics::counter!("messaging.consumed").absolute(0);
    metrics::counter!("messaging.publish.error").absolute(0);
    metrics::counter!("messaging.publish.unroutable").absolute(0);
    metrics::counter!("messaging.consume.decode_error").absolute(0);
    metrics::counter!("messaging.consume.receive_error").absolute(0);
    metrics::counter!("messaging.consume.handler_transient").absolute(0);
    metrics::counter!("messaging.consume.handler_fatal").absolute(0);
    metrics::counter!("messaging.rpc.timeout").absolute(0);
}

/// Install the Prometheus exporter when a port is configured.
pub fn install_exporter(port: Option<u16>) -> Result<()> {
    let Some(port) = port else {
        return Ok(());
    };
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}
