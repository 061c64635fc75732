//! Serves the bus attribute tree over Modbus TCP.
//!
//! Each attribute in [`REGISTER_MAP`] takes two holding registers holding an
//! IEEE-754 f32, high word first. Attributes without a value read as NaN.
//! Writes are not applied here; they are queued to the bridge loop, which
//! owns the publisher.

use crate::bus::{self, AttributeStore, BusService, BusValue, ExternalWrite};
use crate::phase::Phase;
use std::{future, net::SocketAddr};
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};
use tracing::{debug, info, warn};

pub const REGISTER_BASE: u16 = 40_000;

/// Served attributes in register order.
pub const REGISTER_MAP: [&str; 16] = [
    bus::CONNECTED,
    bus::UPDATE_INDEX,
    bus::AC_POWER,
    bus::AC_ENERGY_FORWARD,
    Phase::L1.current_path(),
    Phase::L1.power_path(),
    Phase::L1.voltage_path(),
    Phase::L1.energy_forward_path(),
    Phase::L2.current_path(),
    Phase::L2.power_path(),
    Phase::L2.voltage_path(),
    Phase::L2.energy_forward_path(),
    Phase::L3.current_path(),
    Phase::L3.power_path(),
    Phase::L3.voltage_path(),
    Phase::L3.energy_forward_path(),
];

/// First holding register of a served attribute.
pub fn register_of(path: &str) -> Option<u16> {
    REGISTER_MAP
        .iter()
        .position(|served| *served == path)
        .map(|index| REGISTER_BASE + 2 * index as u16)
}

#[derive(Clone)]
pub struct BusGateway {
    store: AttributeStore,
    writes: Sender<ExternalWrite>,
}

impl tokio_modbus::server::Service for BusGateway {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                self.read_image(addr, cnt).map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(addr, cnt) => {
                self.read_image(addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::WriteMultipleRegisters(addr, words) => self
                .queue_write(addr, &words)
                .map(|cnt| Response::WriteMultipleRegisters(addr, cnt)),
            _ => {
                warn!(?req, "unimplemented function code in modbus request");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

impl BusGateway {
    pub fn new(store: AttributeStore, writes: Sender<ExternalWrite>) -> Self {
        Self { store, writes }
    }

    pub async fn bind(self, socket_addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(socket_addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            addr = ?listener.local_addr().ok(),
            service = self.store.service_name(),
            "serving bus over modbus tcp"
        );
        let server = Server::new(listener);
        let new_service = |_socket_addr| Ok(Some(self.clone()));
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| {
            warn!(error = %err, "modbus gateway connection error");
        };
        server.serve(&on_connected, on_process_error).await?;
        Ok(())
    }

    /// Current register image of the served attributes, starting at
    /// [`REGISTER_BASE`].
    fn register_image(&self) -> Vec<u16> {
        REGISTER_MAP
            .iter()
            .flat_map(|path| {
                let value = self
                    .store
                    .value(path)
                    .and_then(|value| value.as_f64())
                    .map_or(f32::NAN, |value| value as f32);
                split_f32(value)
            })
            .collect()
    }

    /// `cnt` registers from `addr`, all of which must lie inside the map.
    fn read_image(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        let image = self.register_image();
        let start = usize::from(
            addr.checked_sub(REGISTER_BASE)
                .ok_or(ExceptionCode::IllegalDataAddress)?,
        );
        match image.get(start..start + usize::from(cnt)) {
            Some(words) => Ok(words.to_vec()),
            None => {
                debug!(addr, cnt, "modbus read outside the served attributes");
                Err(ExceptionCode::IllegalDataAddress)
            }
        }
    }

    /// Decodes a write covering whole writeable attributes and hands it to
    /// the bridge. Nothing is queued unless every attribute accepts it.
    fn queue_write(&self, addr: u16, words: &[u16]) -> Result<u16, ExceptionCode> {
        let offset = addr
            .checked_sub(REGISTER_BASE)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if offset % 2 != 0 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if words.is_empty() || words.len() % 2 != 0 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let first = usize::from(offset / 2);
        let targets = REGISTER_MAP
            .get(first..first + words.len() / 2)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if let Some(path) = targets.iter().find(|path| !self.store.is_writeable(path)) {
            debug!(path, "modbus write to read-only attribute refused");
            return Err(ExceptionCode::IllegalDataAddress);
        }

        for (path, pair) in targets.iter().zip(words.chunks_exact(2)) {
            let value = merge_u16_f32(pair[0], pair[1]);
            debug!(path, value, "external write received over modbus");
            self.writes
                .try_send(ExternalWrite {
                    path: path.to_string(),
                    value: BusValue::Float(f64::from(value)),
                })
                .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        }
        Ok(words.len() as u16)
    }
}

/// Splits a f32 into two registers, high word first.
fn split_f32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

/// Converts two registers into a f32, high word first.
fn merge_u16_f32(high: u16, low: u16) -> f32 {
    let combined: u32 = ((high as u32) << 16) | (low as u32);
    f32::from_bits(combined)
}
