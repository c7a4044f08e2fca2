// metrics/mod.rs
use anyhow::Context;
use metrics::{Unit, describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const COMMANDS_TOTAL: &str = "bridge_commands_total";
pub const ACKS_TOTAL: &str = "bridge_acks_total";
pub const ACK_TIMEOUTS_TOTAL: &str = "bridge_ack_timeouts_total";
pub const BROADCASTS_TOTAL: &str = "bridge_broadcasts_total";
pub const WS_CLIENTS: &str = "bridge_ws_clients";
pub const SPEECH_REQUESTS_TOTAL: &str = "speech_requests_total";

pub fn setup_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to setup metrics exporter")?;

    describe_counter!(COMMANDS_TOTAL, Unit::Count, "Commands written to the serial link");
    describe_counter!(ACKS_TOTAL, Unit::Count, "Acknowledge lines received from the device");
    describe_counter!(
        ACK_TIMEOUTS_TOTAL,
        Unit::Count,
        "Commands whose acknowledgment did not arrive within the grace period"
    );
    describe_counter!(BROADCASTS_TOTAL, Unit::Count, "State broadcasts to websocket clients");
    describe_gauge!(WS_CLIENTS, Unit::Count, "Connected websocket clients");
    describe_counter!(SPEECH_REQUESTS_TOTAL, Unit::Count, "Voice command uploads processed");

    tracing::info!("Prometheus exporter listening on {}", addr);
    Ok(())
}
