use crate::bus::{BusService, ExternalWrite};
use crate::config::BridgeConfig;
use crate::normalizer::{NormalizeError, Normalizer};
use crate::publisher::Publisher;
use crate::shinex_client::ShineXClient;
use std::future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("sample rejected: {0}")]
    Normalize(#[from] NormalizeError),
}

/// What one telemetry cycle ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A reading was published with this update index.
    Published(u8),
    /// The fetch failed; published values were left as they were.
    Skipped,
}

/// Drives fetch, normalize and publish on one task.
///
/// The telemetry tick, the sign-of-life tick and external bus writes are
/// served from a single `select!`, so each runs to completion before the
/// next one starts and the publisher never needs a lock.
pub struct Bridge<B: BusService> {
    client: ShineXClient,
    normalizer: Normalizer,
    publisher: Publisher<B>,
    update_interval: Duration,
    sign_of_life: Option<Duration>,
    external_writes: Option<Receiver<ExternalWrite>>,
}

impl<B: BusService> Bridge<B> {
    pub fn new(client: ShineXClient, publisher: Publisher<B>, config: &BridgeConfig) -> Self {
        Self {
            client,
            normalizer: Normalizer::new(config.phase_wiring),
            publisher,
            update_interval: config.update_interval,
            sign_of_life: config.sign_of_life,
            external_writes: None,
        }
    }

    /// Routes writes made by other bus clients through the loop.
    pub fn with_external_writes(mut self, writes: Receiver<ExternalWrite>) -> Self {
        self.external_writes = Some(writes);
        self
    }

    pub fn publisher(&self) -> &Publisher<B> {
        &self.publisher
    }

    /// One fetch, normalize, publish pass.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let sample = self.client.fetch().await;
        match self.normalizer.normalize(&sample)? {
            Some(reading) => Ok(CycleOutcome::Published(self.publisher.publish(&reading))),
            None => Ok(CycleOutcome::Skipped),
        }
    }

    /// One cycle as the loop runs it: a failure is logged, never returned.
    pub async fn tick(&mut self) -> Option<CycleOutcome> {
        match self.run_cycle().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "telemetry cycle failed");
                None
            }
        }
    }

    /// Runs until the process is stopped. A failing cycle is logged and the
    /// loop waits for the next tick.
    pub async fn run(mut self) {
        info!(
            url = %self.client.display_url(),
            update_interval_ms = self.update_interval.as_millis() as u64,
            sign_of_life_s = self.sign_of_life.map(|period| period.as_secs()),
            "starting telemetry loop"
        );

        let mut telemetry = interval(self.update_interval);
        telemetry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = self.sign_of_life.map(|period| {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks
        });
        let mut writes = self.external_writes.take();

        loop {
            tokio::select! {
                _ = telemetry.tick() => {
                    self.tick().await;
                }
                _ = next_tick(&mut liveness) => self.publisher.sign_of_life(),
                write = next_write(&mut writes) => {
                    self.publisher.accept_external_write(write);
                }
            }
        }
    }
}

/// Ticks of an optional interval; never resolves when disabled.
async fn next_tick(ticks: &mut Option<Interval>) {
    match ticks {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => future::pending().await,
    }
}

/// Next queued write; never resolves once the sender side is gone.
async fn next_write(writes: &mut Option<Receiver<ExternalWrite>>) -> ExternalWrite {
    if let Some(receiver) = writes {
        if let Some(write) = receiver.recv().await {
            return write;
        }
        *writes = None;
    }
    future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{self, service_name, AttributeStore, BusValue};
    use crate::config::{DeviceAccess, PhaseWiring};
    use crate::test_support::capture_logs;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tracing::Level;

    fn config(host: String) -> BridgeConfig {
        BridgeConfig {
            device_instance: 40,
            custom_name: "Roof".to_string(),
            position: 0,
            phase_wiring: PhaseWiring::Auto,
            sign_of_life: None,
            update_interval: Duration::from_millis(50),
            access: DeviceAccess::OnPremise {
                host,
                username: String::new(),
                password: String::new(),
            },
            modbus_listen: None,
        }
    }

    fn bridge(config: &BridgeConfig, timeout: Duration) -> Bridge<AttributeStore> {
        let client = ShineXClient::with_timeout(&config.access, timeout).unwrap();
        let publisher = Publisher::new(
            AttributeStore::register(service_name(config.device_instance)),
            config,
            "A4CF12003B9E",
        );
        Bridge::new(client, publisher, config)
    }

    const PRODUCING: &str = r#"{
        "Mac": "A4:CF:12:00:3B:9E",
        "InverterStatus": 1,
        "PV1InputPower": 320.0,
        "OutputPower": 300.0,
        "TotalGenerateEnergy": 9.0,
        "L1ThreePhaseGridOutputCurrent": 0.5,
        "L1ThreePhaseGridOutputPower": 100.0,
        "L1ThreePhaseGridVoltage": 230.0,
        "L2ThreePhaseGridOutputCurrent": 0.5,
        "L2ThreePhaseGridOutputPower": 100.0,
        "L2ThreePhaseGridVoltage": 230.0,
        "L3ThreePhaseGridOutputCurrent": 0.5,
        "L3ThreePhaseGridOutputPower": 100.0,
        "L3ThreePhaseGridVoltage": 230.0
    }"#;

    #[tokio::test]
    async fn test_cycle_publishes_reading() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PRODUCING)
            .create_async()
            .await;

        let mut bridge = bridge(&config(server.host_with_port()), Duration::from_secs(2));
        assert_eq!(bridge.run_cycle().await.unwrap(), CycleOutcome::Published(1));
        assert_eq!(bridge.run_cycle().await.unwrap(), CycleOutcome::Published(2));

        let store = bridge.publisher().bus();
        assert_eq!(store.value(bus::AC_POWER), Some(BusValue::Float(300.0)));
        assert_eq!(store.value("/Ac/L2/Energy/Forward"), Some(BusValue::Float(3.0)));
        assert_eq!(store.display("/Ac/L1/Power").as_deref(), Some("100.0W"));
    }

    #[tokio::test]
    async fn test_idle_cycle_still_advances_index() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"InverterStatus": 0}"#)
            .create_async()
            .await;

        let mut bridge = bridge(&config(server.host_with_port()), Duration::from_secs(2));
        assert_eq!(bridge.run_cycle().await.unwrap(), CycleOutcome::Published(1));
        assert_eq!(
            bridge.publisher().bus().value(bus::CONNECTED),
            Some(BusValue::Int(0))
        );
    }

    #[tokio::test]
    async fn test_incomplete_sample_is_a_cycle_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"InverterStatus": 1, "PV1InputPower": 10}"#)
            .create_async()
            .await;

        let mut bridge = bridge(&config(server.host_with_port()), Duration::from_secs(2));
        let result = bridge.run_cycle().await;

        assert!(matches!(
            result,
            Err(CycleError::Normalize(NormalizeError::MissingField(
                "TotalGenerateEnergy"
            )))
        ));
        assert_eq!(bridge.publisher().state().update_index, 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_state_and_logs_once() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (logs, _guard) = capture_logs(Level::INFO);

        let mut bridge = bridge(&config(host), Duration::from_millis(200));
        let before = *bridge.publisher().state();

        let outcome = bridge.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(*bridge.publisher().state(), before);
        assert_eq!(
            bridge.publisher().bus().value(bus::AC_POWER),
            Some(BusValue::Invalid)
        );
        let lines = logs.lines();
        assert_eq!(lines.len(), 1, "unexpected log lines: {lines:?}");
        assert!(lines[0].contains("request timeout"));
    }

    #[tokio::test]
    async fn test_sample_without_status_is_logged_as_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Mac": "A4:CF:12:00:3B:9E", "OutputPower": 300}"#)
            .create_async()
            .await;

        let (logs, _guard) = capture_logs(Level::INFO);
        let mut bridge = bridge(&config(server.host_with_port()), Duration::from_secs(2));

        assert_eq!(bridge.tick().await, None);
        assert_eq!(bridge.publisher().state().update_index, 0);
        let lines = logs.lines();
        assert_eq!(lines.len(), 1, "unexpected log lines: {lines:?}");
        assert!(lines[0].contains("ERROR"));
        assert!(lines[0].contains("InverterStatus"));
    }

    #[tokio::test]
    async fn test_html_page_restarts_device_and_skips() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html></html>")
            .create_async()
            .await;
        let restart = server
            .mock("GET", "/restart")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut bridge = bridge(&config(server.host_with_port()), Duration::from_secs(2));
        assert_eq!(bridge.run_cycle().await.unwrap(), CycleOutcome::Skipped);
        assert_eq!(bridge.publisher().state().update_index, 0);
        restart.assert_async().await;
    }

    #[tokio::test]
    async fn test_run_loop_serves_ticks_and_writes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"InverterStatus": 0}"#)
            .expect_at_least(2)
            .create_async()
            .await;

        let mut config = config(server.host_with_port());
        config.sign_of_life = Some(Duration::from_millis(60));
        let store = AttributeStore::register(service_name(config.device_instance));
        let client = ShineXClient::with_timeout(&config.access, Duration::from_secs(2)).unwrap();
        let publisher = Publisher::new(store.clone(), &config, "A4CF12003B9E");
        let (tx, rx) = mpsc::channel(4);
        let bridge = Bridge::new(client, publisher, &config).with_external_writes(rx);

        let handle = tokio::spawn(bridge.run());
        tx.send(ExternalWrite {
            path: bus::AC_ENERGY_FORWARD.to_string(),
            value: BusValue::Float(77.0),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        assert!(matches!(store.value(bus::UPDATE_INDEX), Some(BusValue::Int(n)) if n >= 2));
        assert_eq!(
            store.value(bus::AC_ENERGY_FORWARD),
            Some(BusValue::Float(77.0))
        );
    }
}
