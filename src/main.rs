use anyhow::Context;
use shinex_pvinverter_bridge::{
    bus::service_name, AttributeStore, Bridge, BridgeConfig, BusGateway, Publisher, ShineXClient,
};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Queued external writes before the gateway starts rejecting them.
const WRITE_QUEUE_DEPTH: usize = 64;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ShineX PV inverter bridge");
    let config = BridgeConfig::load().context("loading configuration")?;

    let client = ShineXClient::new(&config.access).context("building ShineX client")?;
    let serial = client.fetch().await.serial_number();
    info!(url = %client.display_url(), %serial, "ShineX device");

    let store = AttributeStore::register(service_name(config.device_instance));
    let publisher = Publisher::new(store.clone(), &config, &serial);
    let mut bridge = Bridge::new(client, publisher, &config);

    if let Some(addr) = config.modbus_listen {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        bridge = bridge.with_external_writes(rx);
        let gateway = BusGateway::new(store, tx);
        tokio::spawn(async move {
            if let Err(e) = gateway.bind(addr).await {
                error!(%addr, error = %e, "modbus gateway stopped");
            }
        });
    }

    bridge.run().await;
    Ok(())
}
